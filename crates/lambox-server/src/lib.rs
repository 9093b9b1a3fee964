//! Lambda-compatible HTTP surface for lambox.
//!
//! Serves `CreateFunction`, `GetFunction`, `ListFunctions`, `Invoke` and
//! `InvokeAsync` on the standard Lambda REST paths, so AWS SDKs and the CLI
//! can target `--endpoint-url http://127.0.0.1:9000`.

pub mod api;

pub use api::{ApiError, AppState, router};
