//! Thin client for the slice of the Docker Engine API that lambox needs.
//!
//! Knows nothing about functions: it pulls `lambci/lambda` runtime images,
//! creates and starts containers that stay resident, and kills them in bulk.
//! Requests go over a Unix socket or TCP (`unix://` / `tcp://`).
//!
//! ```rust,no_run
//! use lambox_docker::{ContainerBackend, DockerGateway, GatewayConfig, RunImageConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = DockerGateway::connect(GatewayConfig::new(
//!     "unix:///var/run/docker.sock",
//!     "/var/lib/lambox/functions",
//! ))
//! .await?;
//!
//! let inspect = gateway
//!     .run_image(&RunImageConfig {
//!         name: "lambox-hello".into(),
//!         dir: "/var/lib/lambox/functions/hello".into(),
//!         tag: "python3.8".into(),
//!         handler: "app.handler".into(),
//!         envs: Default::default(),
//!     })
//!     .await?;
//!
//! gateway.kill_multi(&[inspect.id]).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod gateway;
pub mod types;

pub use error::{DockerError, KillFailure, KillMultiError};
pub use gateway::{
    Addressing, BoxFuture, ContainerBackend, ContainerInspect, DEFAULT_NETWORK, DockerGateway,
    EngineSettings, GatewayConfig, LAMBCI_IMAGE, RUNTIME_PORT, RunImageConfig, TASK_ROOT,
};
