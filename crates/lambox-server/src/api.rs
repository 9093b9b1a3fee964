use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use lambox_core::{
    CreateFunctionInput, FunctionRecord, FunctionService, InvalidParams, InvocationType,
    InvokeAsyncInput, InvokeInput, LambdaError,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const ERROR_TYPE_HEADER: &str = "x-amzn-ErrorType";

const INVOCATION_TYPE: HeaderName = HeaderName::from_static("x-amz-invocation-type");
const LOG_TYPE: HeaderName = HeaderName::from_static("x-amz-log-type");
const CLIENT_CONTEXT: HeaderName = HeaderName::from_static("x-amz-client-context");
const FUNCTION_ERROR: HeaderName = HeaderName::from_static("x-amz-function-error");
const LOG_RESULT: HeaderName = HeaderName::from_static("x-amz-log-result");
const EXECUTED_VERSION: HeaderName = HeaderName::from_static("x-amz-executed-version");

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FunctionService>,
    /// Cancelled on shutdown; every request works under a child token.
    pub shutdown: CancellationToken,
}

/// Lambda REST routes served by lambox.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/2015-03-31/functions",
            post(create_function).get(list_functions),
        )
        .route("/2015-03-31/functions/", get(list_functions))
        .route("/2015-03-31/functions/{name}", get(get_function))
        .route("/2015-03-31/functions/{name}/invocations", post(invoke))
        .route("/2014-11-13/functions/{name}/invoke-async/", post(invoke_async))
        .with_state(state)
}

/// Lambda-style error response: status, `x-amzn-ErrorType` and a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error_type: &'static str,
    user_fault: bool,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error_type(&self) -> &'static str {
        self.error_type
    }

    fn invalid_parameter(message: String) -> Self {
        LambdaError::from(InvalidParams(vec![message])).into()
    }
}

impl From<LambdaError> for ApiError {
    fn from(e: LambdaError) -> Self {
        let status = match &e {
            LambdaError::InvalidParameterValue(_)
            | LambdaError::InvalidRuntime(_)
            | LambdaError::InvalidZipFile(_) => StatusCode::BAD_REQUEST,
            LambdaError::ResourceInUse(_) => StatusCode::CONFLICT,
            LambdaError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            LambdaError::Invoke(_) => StatusCode::BAD_GATEWAY,
            LambdaError::Service { .. } | LambdaError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            error_type: e.error_type(),
            user_fault: e.is_user_error(),
            message: e.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.user_fault {
            tracing::debug!(
                status = %self.status,
                error_type = self.error_type,
                message = %self.message,
                "Request rejected"
            );
        } else {
            tracing::error!(
                status = %self.status,
                error_type = self.error_type,
                message = %self.message,
                "Request failed"
            );
        }
        let body = ErrorBody {
            kind: if self.user_fault { "User" } else { "Service" },
            message: &self.message,
        };
        (
            self.status,
            [(ERROR_TYPE_HEADER, self.error_type)],
            Json(body),
        )
            .into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListFunctionsResponse {
    functions: Vec<FunctionRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetFunctionResponse {
    configuration: FunctionRecord,
}

#[derive(Deserialize)]
struct InvokeQuery {
    #[serde(rename = "Qualifier")]
    qualifier: Option<String>,
}

async fn create_function(
    State(state): State<AppState>,
    payload: Result<Json<CreateFunctionInput>, JsonRejection>,
) -> Result<(StatusCode, Json<FunctionRecord>), ApiError> {
    let Json(input) = payload.map_err(|e| ApiError::invalid_parameter(e.body_text()))?;
    let record = state
        .service
        .create(input, &state.shutdown.child_token())
        .await?;
    Ok((StatusCode::CREATED, Json(FunctionRecord::clone(&record))))
}

async fn list_functions(State(state): State<AppState>) -> Json<ListFunctionsResponse> {
    let functions = state
        .service
        .list_functions()
        .iter()
        .map(|r| r.as_ref().clone())
        .collect();
    Json(ListFunctionsResponse { functions })
}

async fn get_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<GetFunctionResponse>, ApiError> {
    let record = state.service.get_function(&name)?;
    Ok(Json(GetFunctionResponse {
        configuration: FunctionRecord::clone(&record),
    }))
}

async fn invoke(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<InvokeQuery>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Response, ApiError> {
    let invocation_type = match header_str(&headers, &INVOCATION_TYPE) {
        None => InvocationType::default(),
        Some(value) => InvocationType::parse(value).ok_or_else(|| {
            ApiError::invalid_parameter(format!("invalid InvocationType: {value}"))
        })?,
    };
    let input = InvokeInput {
        function_name: name,
        payload,
        invocation_type,
        log_type: header_str(&headers, &LOG_TYPE).map(str::to_string),
        client_context: header_str(&headers, &CLIENT_CONTEXT).map(str::to_string),
        qualifier: query.qualifier,
    };

    let output = state
        .service
        .invoke_sync(input, &state.shutdown.child_token())
        .await?;

    let status = StatusCode::from_u16(output.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, output.payload).into_response();
    let out = response.headers_mut();
    set_header(out, &FUNCTION_ERROR, output.function_error);
    set_header(out, &LOG_RESULT, output.log_result);
    set_header(out, &EXECUTED_VERSION, output.executed_version);
    Ok(response)
}

async fn invoke_async(
    State(state): State<AppState>,
    Path(name): Path<String>,
    invoke_args: Bytes,
) -> Result<Response, ApiError> {
    let output = state
        .service
        .invoke_async(
            InvokeAsyncInput {
                function_name: name,
                invoke_args,
            },
            &state.shutdown.child_token(),
        )
        .await?;
    let status = StatusCode::from_u16(output.status).unwrap_or(StatusCode::ACCEPTED);
    Ok((status, Json(output)).into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(headers: &mut HeaderMap, name: &HeaderName, value: Option<String>) {
    if let Some(value) = value
        && let Ok(value) = HeaderValue::from_str(&value)
    {
        headers.insert(name.clone(), value);
    }
}
