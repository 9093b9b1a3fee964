use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::types::{InvokeInput, InvokeOutput};

const INVOCATION_TYPE_HEADER: &str = "X-Amz-Invocation-Type";
const LOG_TYPE_HEADER: &str = "X-Amz-Log-Type";
const CLIENT_CONTEXT_HEADER: &str = "X-Amz-Client-Context";
const FUNCTION_ERROR_HEADER: &str = "X-Amz-Function-Error";
const LOG_RESULT_HEADER: &str = "X-Amz-Log-Result";
const EXECUTED_VERSION_HEADER: &str = "X-Amz-Executed-Version";

/// Forwards invocations to the Lambda API a function container serves on
/// its runtime port.
#[derive(Debug, Clone, Default)]
pub struct LambdaInvoker {
    client: reqwest::Client,
}

impl LambdaInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Synchronous `Invoke` against the container at `addr`.
    ///
    /// Function errors come back as a normal response with
    /// `function_error` set; only transport failures are errors here.
    pub async fn invoke(
        &self,
        addr: &str,
        function_name: &str,
        input: &InvokeInput,
    ) -> Result<InvokeOutput, reqwest::Error> {
        let url = format!("http://{addr}/2015-03-31/functions/{function_name}/invocations");
        let mut request = self
            .client
            .post(&url)
            .header(INVOCATION_TYPE_HEADER, input.invocation_type.as_str())
            .body(input.payload.clone());
        if let Some(log_type) = &input.log_type {
            request = request.header(LOG_TYPE_HEADER, log_type);
        }
        if let Some(context) = &input.client_context {
            request = request.header(CLIENT_CONTEXT_HEADER, context);
        }

        let resp = request.send().await?;
        let status_code = resp.status().as_u16();
        let headers = resp.headers().clone();
        let payload = resp.bytes().await?;

        tracing::debug!(
            function = %function_name,
            %addr,
            status = status_code,
            bytes = payload.len(),
            "Invocation returned"
        );
        Ok(InvokeOutput {
            status_code,
            payload,
            function_error: header_value(&headers, FUNCTION_ERROR_HEADER),
            log_result: header_value(&headers, LOG_RESULT_HEADER),
            executed_version: header_value(&headers, EXECUTED_VERSION_HEADER),
        })
    }

    /// Legacy `InvokeAsync`; returns the container's status code.
    pub async fn invoke_async(
        &self,
        addr: &str,
        function_name: &str,
        invoke_args: Bytes,
    ) -> Result<u16, reqwest::Error> {
        let url = format!("http://{addr}/2014-11-13/functions/{function_name}/invoke-async/");
        let resp = self.client.post(&url).body(invoke_args).send().await?;
        let status = resp.status().as_u16();
        tracing::debug!(function = %function_name, %addr, status, "Async invocation accepted");
        Ok(status)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
