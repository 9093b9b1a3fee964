use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lambox_docker::ContainerInspect;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::InvalidParams;

pub const LATEST_VERSION: &str = "$LATEST";
pub const DEFAULT_MEMORY_SIZE: i64 = 128;
pub const DEFAULT_TIMEOUT: i64 = 3;

const MAX_NAME_LEN: usize = 64;
const MAX_HANDLER_LEN: usize = 128;
const MAX_DESCRIPTION_LEN: usize = 256;
const MEMORY_RANGE: (i64, i64) = (128, 10240);
const TIMEOUT_RANGE: (i64, i64) = (1, 900);

/// `CreateFunction` request body, as sent by Lambda clients.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFunctionInput {
    pub function_name: Option<String>,
    pub runtime: Option<String>,
    pub handler: Option<String>,
    pub role: Option<String>,
    pub memory_size: Option<i64>,
    pub timeout: Option<i64>,
    pub description: Option<String>,
    pub code: Option<FunctionCode>,
    pub environment: Option<Environment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionCode {
    /// Base64-encoded zip archive.
    pub zip_file: Option<String>,
    #[serde(rename = "S3Bucket")]
    pub s3_bucket: Option<String>,
    #[serde(rename = "S3Key")]
    pub s3_key: Option<String>,
    #[serde(rename = "S3ObjectVersion")]
    pub s3_object_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// A structurally valid `CreateFunction` request.
#[derive(Debug, Clone)]
pub struct CreateFunctionParams {
    pub function_name: String,
    pub runtime: String,
    pub handler: String,
    pub role: String,
    pub memory_size: i64,
    pub timeout: i64,
    pub description: Option<String>,
    pub code: FunctionCode,
    pub environment: BTreeMap<String, String>,
}

impl CreateFunctionInput {
    /// Check presence and bounds of every field, collecting all violations.
    pub fn validate(self) -> Result<CreateFunctionParams, InvalidParams> {
        let mut problems = Vec::new();

        match self.function_name.as_deref() {
            None => problems.push(missing("FunctionName")),
            Some(name) if !is_valid_name(name) => problems.push(format!(
                "invalid FunctionName {name:?}: \
                 1-{MAX_NAME_LEN} characters of letters, digits, '-' or '_'"
            )),
            Some(_) => {}
        }
        if self.code.is_none() {
            problems.push(missing("Code"));
        }
        match self.handler.as_deref() {
            None => problems.push(missing("Handler")),
            Some(h) if h.is_empty() || h.len() > MAX_HANDLER_LEN => problems.push(format!(
                "invalid Handler: length must be 1-{MAX_HANDLER_LEN}"
            )),
            Some(_) => {}
        }
        if self.role.as_deref().is_none_or(str::is_empty) {
            problems.push(missing("Role"));
        }
        if self.runtime.as_deref().is_none_or(str::is_empty) {
            problems.push(missing("Runtime"));
        }
        if let Some(memory) = self.memory_size
            && !(MEMORY_RANGE.0..=MEMORY_RANGE.1).contains(&memory)
        {
            problems.push(format!(
                "invalid MemorySize {memory}: must be {}-{}",
                MEMORY_RANGE.0, MEMORY_RANGE.1
            ));
        }
        if let Some(timeout) = self.timeout
            && !(TIMEOUT_RANGE.0..=TIMEOUT_RANGE.1).contains(&timeout)
        {
            problems.push(format!(
                "invalid Timeout {timeout}: must be {}-{}",
                TIMEOUT_RANGE.0, TIMEOUT_RANGE.1
            ));
        }
        if let Some(description) = &self.description
            && description.len() > MAX_DESCRIPTION_LEN
        {
            problems.push(format!(
                "invalid Description: at most {MAX_DESCRIPTION_LEN} characters"
            ));
        }

        match (self.function_name, self.code, self.handler, self.role, self.runtime) {
            (Some(function_name), Some(code), Some(handler), Some(role), Some(runtime))
                if problems.is_empty() =>
            {
                Ok(CreateFunctionParams {
                    function_name,
                    runtime,
                    handler,
                    role,
                    memory_size: self.memory_size.unwrap_or(DEFAULT_MEMORY_SIZE),
                    timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
                    description: self.description,
                    code,
                    environment: self.environment.map(|e| e.variables).unwrap_or_default(),
                })
            }
            _ => Err(InvalidParams(problems)),
        }
    }
}

fn missing(field: &str) -> String {
    format!("missing required field, {field}")
}

/// Names double as directory and container names, so keep them plain.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One deployed function (`$LATEST` only), serialized as a Lambda
/// `FunctionConfiguration`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionRecord {
    pub function_name: String,
    pub function_arn: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub code_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timeout: i64,
    pub memory_size: i64,
    #[serde(serialize_with = "serialize_last_modified")]
    pub last_modified: DateTime<Utc>,
    pub code_sha256: String,
    pub version: String,
    #[serde(serialize_with = "serialize_environment")]
    pub environment: BTreeMap<String, String>,
    pub revision_id: String,
    #[serde(skip)]
    pub container: ContainerInspect,
}

fn serialize_last_modified<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.format("%Y-%m-%dT%H:%M:%S%.3f+0000").to_string())
}

fn serialize_environment<S: Serializer>(
    variables: &BTreeMap<String, String>,
    s: S,
) -> Result<S::Ok, S::Error> {
    Environment {
        variables: variables.clone(),
    }
    .serialize(s)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvocationType {
    #[default]
    RequestResponse,
    Event,
    DryRun,
}

impl InvocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationType::RequestResponse => "RequestResponse",
            InvocationType::Event => "Event",
            InvocationType::DryRun => "DryRun",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RequestResponse" => Some(InvocationType::RequestResponse),
            "Event" => Some(InvocationType::Event),
            "DryRun" => Some(InvocationType::DryRun),
            _ => None,
        }
    }
}

/// `Invoke` request. `function_name` may be a name or a function ARN.
#[derive(Debug, Clone, Default)]
pub struct InvokeInput {
    pub function_name: String,
    pub payload: Bytes,
    pub invocation_type: InvocationType,
    pub log_type: Option<String>,
    pub client_context: Option<String>,
    pub qualifier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOutput {
    pub status_code: u16,
    pub payload: Bytes,
    pub function_error: Option<String>,
    pub log_result: Option<String>,
    pub executed_version: Option<String>,
}

/// Legacy `InvokeAsync` request.
#[derive(Debug, Clone, Default)]
pub struct InvokeAsyncInput {
    pub function_name: String,
    pub invoke_args: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvokeAsyncOutput {
    pub status: u16,
}
