//! Function lifecycle for lambox.
//!
//! [`FunctionService`] stages uploaded code with [`CodeStore`], starts one
//! resident runtime container per function through a
//! [`ContainerBackend`](lambox_docker::ContainerBackend), publishes the
//! resulting [`FunctionRecord`] in a [`FunctionRegistry`] and forwards
//! invocations to the container.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lambox_core::{FunctionService, LamboxConfig};
//! use lambox_docker::DockerGateway;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LamboxConfig::default();
//! let gateway = DockerGateway::connect(config.gateway_config()).await?;
//! let service = FunctionService::from_config(&config, Arc::new(gateway));
//!
//! for record in service.list_functions() {
//!     println!("{} -> {}", record.function_arn, record.container.addr);
//! }
//! service.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod arn;
pub mod code_store;
pub mod config;
pub mod error;
pub mod invoker;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod types;

pub use code_store::CodeStore;
pub use config::LamboxConfig;
pub use error::{ConfigError, InvalidParams, LambdaError, StageError};
pub use invoker::LambdaInvoker;
pub use registry::{FunctionRegistry, InMemoryRegistry};
pub use service::FunctionService;
pub use types::{
    CreateFunctionInput, Environment, FunctionCode, FunctionRecord, InvocationType,
    InvokeAsyncInput, InvokeAsyncOutput, InvokeInput, InvokeOutput,
};
