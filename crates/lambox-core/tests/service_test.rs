//! Function service tests with a mock container backend.
//!
//! Code is staged into a temp directory; invocations go to a fake runtime
//! API served by axum on a local port.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use lambox_core::{
    CodeStore, CreateFunctionInput, Environment, FunctionCode, FunctionService, InvocationType,
    InvokeAsyncInput, InvokeInput, LambdaError,
};
use lambox_docker::{
    BoxFuture, ContainerBackend, ContainerInspect, DockerError, KillMultiError, RunImageConfig,
};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

// ── Mock backend ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockBackend {
    addr: Option<String>,
    fail_with: Option<String>,
    launch_delay: Option<Duration>,
    runs: Mutex<Vec<RunImageConfig>>,
    killed: Mutex<Vec<String>>,
}

impl MockBackend {
    fn runs(&self) -> Vec<RunImageConfig> {
        self.runs.lock().unwrap().clone()
    }
}

impl ContainerBackend for MockBackend {
    fn run_image<'a>(
        &'a self,
        config: &'a RunImageConfig,
    ) -> BoxFuture<'a, Result<ContainerInspect, DockerError>> {
        Box::pin(async move {
            self.runs.lock().unwrap().push(config.clone());
            if let Some(delay) = self.launch_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.fail_with {
                return Err(DockerError::Engine {
                    status: 404,
                    message: message.clone(),
                });
            }
            Ok(ContainerInspect {
                id: format!("cid-{}", config.name),
                addr: self
                    .addr
                    .clone()
                    .unwrap_or_else(|| format!("{}:9001", config.name)),
            })
        })
    }

    fn kill_multi<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<(), KillMultiError>> {
        Box::pin(async move {
            self.killed.lock().unwrap().extend(ids.iter().cloned());
            Ok(())
        })
    }
}

// ── Fake runtime API ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Invocation {
    path_name: String,
    invocation_type: String,
    log_type: String,
    client_context: String,
    payload: Bytes,
}

#[derive(Default)]
struct FakeRuntime {
    invocations: Mutex<Vec<Invocation>>,
    async_events: Mutex<Vec<(String, Bytes)>>,
}

async fn invocations(
    State(runtime): State<Arc<FakeRuntime>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    runtime.invocations.lock().unwrap().push(Invocation {
        path_name: name,
        invocation_type: header("x-amz-invocation-type"),
        log_type: header("x-amz-log-type"),
        client_context: header("x-amz-client-context"),
        payload: body.clone(),
    });

    let mut response = (
        StatusCode::OK,
        [
            ("x-amz-executed-version", "$LATEST"),
            ("x-amz-log-result", "ZmFrZSBsb2c="),
        ],
        body.clone(),
    )
        .into_response();
    if body.as_ref() == b"\"boom\"" {
        response
            .headers_mut()
            .insert("x-amz-function-error", HeaderValue::from_static("Unhandled"));
    }
    response
}

async fn invoke_async(
    State(runtime): State<Arc<FakeRuntime>>,
    Path(name): Path<String>,
    body: Bytes,
) -> StatusCode {
    runtime.async_events.lock().unwrap().push((name, body));
    StatusCode::ACCEPTED
}

async fn serve_runtime(runtime: Arc<FakeRuntime>) -> SocketAddr {
    let router = Router::new()
        .route("/2015-03-31/functions/{name}/invocations", post(invocations))
        .route("/2014-11-13/functions/{name}/invoke-async/", post(invoke_async))
        .with_state(runtime);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn create_input(name: &str, zip_file: Option<String>) -> CreateFunctionInput {
    CreateFunctionInput {
        function_name: Some(name.into()),
        runtime: Some("go1.x".into()),
        handler: Some("fake".into()),
        role: Some("foobar".into()),
        memory_size: Some(128),
        timeout: Some(16),
        code: Some(FunctionCode {
            zip_file,
            ..Default::default()
        }),
        environment: Some(Environment {
            variables: BTreeMap::from([("hoge".to_string(), "fuga".to_string())]),
        }),
        ..Default::default()
    }
}

fn small_zip() -> String {
    STANDARD.encode(zip_archive(&[("fake", b"#!/bin/sh\necho ok\n")]))
}

struct Harness {
    _tmp: tempfile::TempDir,
    backend: Arc<MockBackend>,
    service: FunctionService,
}

fn harness(backend: MockBackend) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend);
    let service = FunctionService::new(
        backend.clone(),
        CodeStore::new(tmp.path().join("functions")),
        "us-east-1",
    );
    Harness {
        _tmp: tmp,
        backend,
        service,
    }
}

// ── Create ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_without_parameters_is_rejected() {
    let h = harness(MockBackend::default());
    let err = h
        .service
        .create(CreateFunctionInput::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::InvalidParameterValue(_)), "{err}");
    assert!(h.backend.runs().is_empty());
}

#[tokio::test]
async fn unsupported_runtime_fails_before_any_side_effect() {
    let h = harness(MockBackend::default());
    let input = CreateFunctionInput {
        runtime: Some("go1.14".into()),
        ..create_input("mytest", Some(small_zip()))
    };

    let err = h
        .service
        .create(input, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::InvalidRuntime(ref r) if r == "go1.14"));
    assert!(!h.service.code_store().base_dir().exists());
    assert!(h.backend.runs().is_empty());
}

#[tokio::test]
async fn s3_code_location_is_not_supported() {
    let h = harness(MockBackend::default());
    let input = CreateFunctionInput {
        code: Some(FunctionCode {
            s3_bucket: Some("aaaaa".into()),
            s3_key: Some("iiiii".into()),
            ..Default::default()
        }),
        ..create_input("mytest", None)
    };

    let err = h
        .service
        .create(input, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::InvalidZipFile(_)), "{err}");
    assert!(!h.service.code_store().function_dir("mytest").exists());
}

#[tokio::test]
async fn undecodable_archive_is_cleaned_up() {
    let h = harness(MockBackend::default());
    let err = h
        .service
        .create(create_input("mytest", Some("aaaii".into())), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::InvalidZipFile(_)), "{err}");
    assert!(!h.service.code_store().function_dir("mytest").exists());
    assert!(h.backend.runs().is_empty());
}

#[tokio::test]
async fn creates_and_registers_function() {
    let h = harness(MockBackend::default());
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let zip = zip_archive(&[("fake", &payload), ("config/app.json", b"{}")]);
    let zip_b64 = STANDARD.encode(&zip);

    let record = h
        .service
        .create(create_input("mytest", Some(zip_b64.clone())), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.code_size, zip.len() as u64);
    assert_eq!(
        record.function_arn,
        "arn:aws:lambda:us-east-1:000000000000:function:mytest"
    );
    assert!(!record.revision_id.is_empty());
    assert_eq!(record.version, "$LATEST");
    assert_eq!(
        record.code_sha256,
        STANDARD.encode(Sha256::digest(zip_b64.as_bytes()))
    );
    assert_eq!(record.container.id, "cid-lambox-mytest");
    assert_eq!(record.container.addr, "lambox-mytest:9001");

    let runs = h.backend.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "lambox-mytest");
    assert_eq!(runs[0].tag, "go1.x");
    assert_eq!(runs[0].handler, "fake");
    assert_eq!(runs[0].dir, h.service.code_store().function_dir("mytest"));
    assert_eq!(runs[0].envs["hoge"], "fuga");
    assert_eq!(std::fs::read(runs[0].dir.join("fake")).unwrap(), payload);

    let by_name = h.service.registry().get_by_name("mytest").unwrap();
    assert!(Arc::ptr_eq(&record, &by_name));
    let by_arn = h.service.get_function(&record.function_arn).unwrap();
    assert!(Arc::ptr_eq(&record, &by_arn));
}

#[tokio::test]
async fn duplicate_create_is_in_use_and_keeps_original_code() {
    let h = harness(MockBackend::default());
    let cancel = CancellationToken::new();
    let first = STANDARD.encode(zip_archive(&[("fake", b"first")]));
    let second = STANDARD.encode(zip_archive(&[("fake", b"second")]));

    let original = h
        .service
        .create(create_input("mytest", Some(first)), &cancel)
        .await
        .unwrap();
    let err = h
        .service
        .create(create_input("mytest", Some(second)), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::ResourceInUse(_)), "{err}");
    assert_eq!(h.backend.runs().len(), 1);
    let dir = h.service.code_store().function_dir("mytest");
    assert_eq!(std::fs::read(dir.join("fake")).unwrap(), b"first");
    let current = h.service.get_function("mytest").unwrap();
    assert!(Arc::ptr_eq(&original, &current));
}

#[tokio::test]
async fn concurrent_creates_launch_one_container() {
    let h = harness(MockBackend {
        launch_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        h.service.create(create_input("racer", Some(small_zip())), &cancel),
        h.service.create(create_input("racer", Some(small_zip())), &cancel),
    );

    let (created, rejected) = match (a, b) {
        (Ok(record), Err(e)) | (Err(e), Ok(record)) => (record, e),
        (a, b) => panic!("expected one success and one rejection, got {a:?} and {b:?}"),
    };
    assert_eq!(created.function_name, "racer");
    assert!(matches!(rejected, LambdaError::ResourceInUse(_)), "{rejected}");
    assert_eq!(h.backend.runs().len(), 1);
    assert!(h.service.get_function("racer").is_ok());
}

#[tokio::test]
async fn failed_launch_removes_staged_code() {
    let h = harness(MockBackend {
        fail_with: Some("No such image: docker.io/lambci/lambda:go1.x".into()),
        ..Default::default()
    });

    let err = h
        .service
        .create(create_input("mytest", Some(small_zip())), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::Service { .. }));
    assert!(err.to_string().starts_with("failed to start container"), "{err}");
    assert!(h.service.registry().get_by_name("mytest").is_none());
    assert!(!h.service.code_store().function_dir("mytest").exists());

    // The name is free again.
    h.service
        .code_store()
        .stage("mytest", &small_zip())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_create_does_not_register() {
    let h = harness(MockBackend {
        launch_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h
        .service
        .create(create_input("mytest", Some(small_zip())), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::Cancelled));
    assert_eq!(h.backend.runs().len(), 1);
    assert!(h.service.registry().get_by_name("mytest").is_none());
    assert!(!h.service.code_store().function_dir("mytest").exists());
}

#[tokio::test]
async fn already_cancelled_create_stages_nothing() {
    let h = harness(MockBackend::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .service
        .create(create_input("mytest", Some(small_zip())), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::Cancelled));
    assert!(!h.service.code_store().function_dir("mytest").exists());
    assert!(h.backend.runs().is_empty());
}

// ── Invoke ───────────────────────────────────────────────────────────────────

async fn invoke_harness() -> (Harness, Arc<FakeRuntime>) {
    let runtime = Arc::new(FakeRuntime::default());
    let addr = serve_runtime(runtime.clone()).await;
    let h = harness(MockBackend {
        addr: Some(addr.to_string()),
        ..Default::default()
    });
    h.service
        .create(create_input("mytest", Some(small_zip())), &CancellationToken::new())
        .await
        .unwrap();
    (h, runtime)
}

#[tokio::test]
async fn invoke_forwards_payload_and_headers() {
    let (h, runtime) = invoke_harness().await;

    let output = h
        .service
        .invoke_sync(
            InvokeInput {
                function_name: "mytest".into(),
                payload: Bytes::from_static(br#"{"key":"value"}"#),
                log_type: Some("Tail".into()),
                client_context: Some("e30=".into()),
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.status_code, 200);
    assert_eq!(output.payload.as_ref(), br#"{"key":"value"}"#);
    assert_eq!(output.function_error, None);
    assert_eq!(output.log_result.as_deref(), Some("ZmFrZSBsb2c="));
    assert_eq!(output.executed_version.as_deref(), Some("$LATEST"));

    let seen = runtime.invocations.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path_name, "mytest");
    assert_eq!(seen[0].invocation_type, InvocationType::RequestResponse.as_str());
    assert_eq!(seen[0].log_type, "Tail");
    assert_eq!(seen[0].client_context, "e30=");
    assert_eq!(seen[0].payload.as_ref(), br#"{"key":"value"}"#);
}

#[tokio::test]
async fn invoke_by_arn_reports_function_errors() {
    let (h, _runtime) = invoke_harness().await;

    let output = h
        .service
        .invoke_sync(
            InvokeInput {
                function_name: "arn:aws:lambda:us-east-1:000000000000:function:mytest".into(),
                payload: Bytes::from_static(b"\"boom\""),
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.status_code, 200);
    assert_eq!(output.function_error.as_deref(), Some("Unhandled"));
}

#[tokio::test]
async fn invoke_unknown_function_or_version_is_not_found() {
    let (h, runtime) = invoke_harness().await;
    let cancel = CancellationToken::new();

    for input in [
        InvokeInput {
            function_name: "nope".into(),
            ..Default::default()
        },
        InvokeInput {
            function_name: "arn:aws:lambda:eu-west-1:000000000000:function:mytest".into(),
            ..Default::default()
        },
        InvokeInput {
            function_name: "mytest".into(),
            qualifier: Some("1".into()),
            ..Default::default()
        },
    ] {
        let err = h.service.invoke_sync(input, &cancel).await.unwrap_err();
        assert!(matches!(err, LambdaError::ResourceNotFound(_)), "{err}");
    }
    assert!(runtime.invocations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invoke_async_hands_event_to_container() {
    let (h, runtime) = invoke_harness().await;

    let output = h
        .service
        .invoke_async(
            InvokeAsyncInput {
                function_name: "mytest".into(),
                invoke_args: Bytes::from_static(b"{\"event\":1}"),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.status, 202);
    let events = runtime.async_events.lock().unwrap().clone();
    assert_eq!(events, vec![("mytest".to_string(), Bytes::from_static(b"{\"event\":1}"))]);
}

#[tokio::test]
async fn unreachable_container_surfaces_transport_error() {
    let h = harness(MockBackend {
        addr: Some("127.0.0.1:1".into()),
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    h.service
        .create(create_input("mytest", Some(small_zip())), &cancel)
        .await
        .unwrap();

    let err = h
        .service
        .invoke_sync(
            InvokeInput {
                function_name: "mytest".into(),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LambdaError::Invoke(_)), "{err}");
    assert_eq!(err.error_type(), "ServiceException");
}

// ── Close ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_kills_every_registered_container() {
    let h = harness(MockBackend::default());
    let cancel = CancellationToken::new();
    for name in ["alpha", "beta", "gamma"] {
        h.service
            .create(create_input(name, Some(small_zip())), &cancel)
            .await
            .unwrap();
    }

    h.service.close().await.unwrap();

    let mut killed = h.backend.killed.lock().unwrap().clone();
    killed.sort();
    assert_eq!(
        killed,
        vec!["cid-lambox-alpha", "cid-lambox-beta", "cid-lambox-gamma"]
    );
    let names: Vec<_> = h
        .service
        .list_functions()
        .iter()
        .map(|r| r.function_name.clone())
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}
