use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Semaphore;

use crate::client::{self, BodyLines, EngineClient};
use crate::error::{DockerError, KillFailure, KillMultiError};
use crate::types::{
    ContainerInspectResponse, CreateContainerBody, EmptyObject, EndpointSettings, HostConfig,
    IdResponse, NetworkingConfig, PortBinding, RestartPolicy,
};

/// Repository of the pre-built runtime images, tagged by runtime name.
pub const LAMBCI_IMAGE: &str = "docker.io/lambci/lambda";
/// Port the runtime API listens on inside every function container.
pub const RUNTIME_PORT: u16 = 9001;
/// Where the runtime image expects function code.
pub const TASK_ROOT: &str = "/var/task";
/// Network used when the emulator is not itself running in a container.
pub const DEFAULT_NETWORK: &str = "default";

const STAY_OPEN_ENV: &str = "DOCKER_LAMBDA_STAY_OPEN=1";
const KILL_CONCURRENCY: usize = 3;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters for launching one function container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunImageConfig {
    /// Container name, also registered as its network alias.
    pub name: String,
    /// Staged code directory on the host.
    pub dir: PathBuf,
    /// Runtime tag, e.g. `go1.x`.
    pub tag: String,
    pub handler: String,
    pub envs: BTreeMap<String, String>,
}

/// A started container and the address its runtime API answers on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub addr: String,
}

/// Capability the function service needs from a container engine.
///
/// [`DockerGateway`] is the real implementation; tests substitute their own.
pub trait ContainerBackend: Send + Sync {
    fn run_image<'a>(
        &'a self,
        config: &'a RunImageConfig,
    ) -> BoxFuture<'a, Result<ContainerInspect, DockerError>>;

    fn kill_multi<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<(), KillMultiError>>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `unix:///var/run/docker.sock` or `tcp://host:port`.
    pub host: String,
    /// Explicit network; overrides self-detection and must exist.
    pub network: Option<String>,
    pub image: String,
    /// Root of all staged code directories, used to address code inside a
    /// shared volume.
    pub code_root: PathBuf,
    /// Name to self-inspect with. Defaults to the machine hostname.
    pub hostname: Option<String>,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, code_root: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            network: None,
            image: LAMBCI_IMAGE.into(),
            code_root: code_root.into(),
            hostname: None,
        }
    }
}

/// How callers reach a started container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// `<container-name>:9001` over a shared user-defined network.
    Alias,
    /// `127.0.0.1:<host-port>` through a published port.
    PublishedPort,
}

/// Network and mount settings resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub network: String,
    pub volume: Option<String>,
    pub addressing: Addressing,
}

pub struct DockerGateway {
    client: EngineClient,
    image: String,
    code_root: PathBuf,
    settings: EngineSettings,
}

impl DockerGateway {
    /// Connect to the engine and resolve network/volume settings.
    ///
    /// Self-inspection by hostname tells whether the emulator runs inside a
    /// container; if so its network and `/var/task` volume are reused for
    /// every function container.
    pub async fn connect(config: GatewayConfig) -> Result<Self, DockerError> {
        let client = EngineClient::new(&config.host)?;

        let detected = match own_hostname(config.hostname.as_deref()).await {
            Some(hostname) => inspect_self(&client, &hostname).await?,
            None => None,
        };
        let in_container = detected.is_some();
        let (mut network, volume) = detected.unwrap_or_else(|| (String::new(), None));

        if let Some(explicit) = &config.network {
            inspect_network(&client, explicit).await?;
            network = explicit.clone();
        }
        if network.is_empty() {
            network = DEFAULT_NETWORK.into();
        }

        let addressing = if in_container && is_user_defined(&network) {
            Addressing::Alias
        } else {
            Addressing::PublishedPort
        };

        let settings = EngineSettings {
            network,
            volume,
            addressing,
        };
        tracing::info!(
            host = %config.host,
            network = %settings.network,
            volume = ?settings.volume,
            addressing = ?settings.addressing,
            "Container gateway ready"
        );

        Ok(Self {
            client,
            image: config.image,
            code_root: config.code_root,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn pull_image(&self, tag: &str) -> Result<(), DockerError> {
        tracing::info!(image = %self.image, tag, "Pulling runtime image");
        let resp = self
            .client
            .post("/images/create", &[("fromImage", self.image.as_str()), ("tag", tag)])
            .await?;
        let resp = client::expect_success(resp).await?;

        let mut lines = BodyLines::new(resp.into_body());
        while let Some(line) = lines.next_line().await? {
            if !line.is_empty() {
                tracing::debug!(progress = %line, "Image pull");
            }
        }
        Ok(())
    }

    async fn create_container(&self, config: &RunImageConfig) -> Result<String, DockerError> {
        let body = self.container_body(config)?;
        let resp = self
            .client
            .post_json("/containers/create", &[("name", config.name.as_str())], &body)
            .await?;
        let resp = client::expect_success(resp).await?;
        let created: IdResponse = client::read_json(resp).await?;

        if let Some(warnings) = created.warnings.filter(|w| !w.is_empty()) {
            tracing::warn!(container = %config.name, ?warnings, "Engine warnings on create");
        }
        Ok(created.id)
    }

    fn container_body(&self, config: &RunImageConfig) -> Result<CreateContainerBody, DockerError> {
        let mut env = vec![STAY_OPEN_ENV.to_string()];
        env.extend(config.envs.iter().map(|(k, v)| format!("{k}={v}")));

        let (bind, command) = match &self.settings.volume {
            Some(volume) => {
                let relative = relative_code_dir(&self.code_root, &config.dir);
                (
                    format!("{volume}:{TASK_ROOT}:ro,delegated"),
                    relative.join(&config.handler).to_string_lossy().into_owned(),
                )
            }
            None => {
                let dir = std::path::absolute(&config.dir)?;
                (
                    format!("{}:{TASK_ROOT}:ro,delegated", dir.display()),
                    config.handler.clone(),
                )
            }
        };

        let port_key = runtime_port_key();
        let port_bindings = (self.settings.addressing == Addressing::PublishedPort).then(|| {
            HashMap::from([(
                port_key.clone(),
                vec![PortBinding {
                    host_ip: "127.0.0.1".into(),
                    host_port: String::new(),
                }],
            )])
        });
        let networking_config = is_user_defined(&self.settings.network).then(|| NetworkingConfig {
            endpoints_config: HashMap::from([(
                self.settings.network.clone(),
                EndpointSettings {
                    aliases: vec![config.name.clone()],
                },
            )]),
        });

        Ok(CreateContainerBody {
            env,
            cmd: vec![command],
            image: format!("{}:{}", self.image, config.tag),
            exposed_ports: HashMap::from([(port_key, EmptyObject {})]),
            host_config: HostConfig {
                binds: vec![bind],
                network_mode: self.settings.network.clone(),
                auto_remove: true,
                restart_policy: RestartPolicy::never(),
                port_bindings,
            },
            networking_config,
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        let resp = self.client.post(&format!("/containers/{id}/start"), &[]).await?;
        client::expect_success(resp).await?;
        Ok(())
    }

    async fn published_addr(&self, id: &str) -> Result<String, DockerError> {
        let resp = self.client.get(&format!("/containers/{id}/json")).await?;
        let resp = client::expect_success(resp).await?;
        let inspect: ContainerInspectResponse = client::read_json(resp).await?;

        let port_key = runtime_port_key();
        let host_port = inspect
            .network_settings
            .as_ref()
            .and_then(|s| s.host_port(&port_key))
            .ok_or_else(|| DockerError::PortNotBound {
                id: id.to_string(),
                port: port_key.clone(),
            })?;
        Ok(format!("127.0.0.1:{host_port}"))
    }

    /// Force-remove a container that never became usable. Best effort.
    async fn remove_container(&self, id: &str) {
        let removed = match self
            .client
            .delete(&format!("/containers/{id}"), &[("force", "true")])
            .await
        {
            Ok(resp) => client::expect_success(resp).await.map(drop),
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => tracing::debug!(container_id = %id, "Removed failed container"),
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Failed to remove container");
            }
        }
    }

    async fn start_and_address(
        &self,
        config: &RunImageConfig,
        id: &str,
    ) -> Result<String, DockerError> {
        self.start_container(id).await?;
        match self.settings.addressing {
            Addressing::Alias => Ok(format!("{}:{RUNTIME_PORT}", config.name)),
            Addressing::PublishedPort => self.published_addr(id).await,
        }
    }

    async fn run(&self, config: &RunImageConfig) -> Result<ContainerInspect, DockerError> {
        self.pull_image(&config.tag).await?;
        let id = self.create_container(config).await?;

        // AutoRemove only fires on exit, so a container that never started
        // would keep holding its name.
        let addr = match self.start_and_address(config, &id).await {
            Ok(addr) => addr,
            Err(e) => {
                self.remove_container(&id).await;
                return Err(e);
            }
        };
        tracing::info!(container = %config.name, container_id = %id, %addr, "Container started");
        Ok(ContainerInspect { id, addr })
    }

    async fn kill_one(&self, gate: &Semaphore, id: &str) -> Result<(), DockerError> {
        let _permit = gate.acquire().await?;
        let resp = self.client.post(&format!("/containers/{id}/kill"), &[]).await?;
        client::expect_success(resp).await?;
        tracing::debug!(container_id = %id, "Container killed");
        Ok(())
    }

    async fn kill_all(&self, ids: &[String]) -> Result<(), KillMultiError> {
        let gate = Semaphore::new(KILL_CONCURRENCY);
        let attempts = ids.iter().map(|id| {
            let gate = &gate;
            async move { (id, self.kill_one(gate, id).await) }
        });
        let failures: Vec<KillFailure> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(id, result)| {
                result.err().map(|error| KillFailure {
                    id: id.clone(),
                    error,
                })
            })
            .collect();

        if failures.is_empty() {
            tracing::info!(count = ids.len(), "All containers killed");
            Ok(())
        } else {
            tracing::warn!(
                count = ids.len(),
                failed = failures.len(),
                "Some containers could not be killed"
            );
            Err(KillMultiError { failures })
        }
    }
}

impl ContainerBackend for DockerGateway {
    fn run_image<'a>(
        &'a self,
        config: &'a RunImageConfig,
    ) -> BoxFuture<'a, Result<ContainerInspect, DockerError>> {
        Box::pin(self.run(config))
    }

    fn kill_multi<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<(), KillMultiError>> {
        Box::pin(self.kill_all(ids))
    }
}

fn runtime_port_key() -> String {
    format!("{RUNTIME_PORT}/tcp")
}

/// Built-in networks do not accept aliases.
fn is_user_defined(network: &str) -> bool {
    !matches!(network, "" | "default" | "bridge" | "host" | "none")
        && !network.starts_with("container:")
}

fn relative_code_dir(code_root: &Path, dir: &Path) -> PathBuf {
    match dir.strip_prefix(code_root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => dir.file_name().map(PathBuf::from).unwrap_or_default(),
    }
}

async fn own_hostname(configured: Option<&str>) -> Option<String> {
    if let Some(name) = configured {
        return Some(name.to_string());
    }
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return Some(name.trim().to_string());
    }
    tokio::fs::read_to_string("/etc/hostname")
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Returns the network mode and `/var/task` volume of the named container,
/// or `None` when the engine does not know it.
async fn inspect_self(
    client: &EngineClient,
    hostname: &str,
) -> Result<Option<(String, Option<String>)>, DockerError> {
    let resp = client.get(&format!("/containers/{hostname}/json")).await?;
    if resp.status() == http::StatusCode::NOT_FOUND {
        tracing::debug!(hostname, "Not running inside a container");
        return Ok(None);
    }
    let resp = client::expect_success(resp).await?;
    let inspect: ContainerInspectResponse = client::read_json(resp).await?;

    let network = inspect
        .host_config
        .map(|h| h.network_mode)
        .unwrap_or_default();
    let volume = inspect
        .mounts
        .into_iter()
        .find(|m| m.kind == "volume" && m.destination == TASK_ROOT)
        .and_then(|m| m.name);
    Ok(Some((network, volume)))
}

async fn inspect_network(client: &EngineClient, name: &str) -> Result<(), DockerError> {
    let resp = client.get(&format!("/networks/{name}")).await?;
    match client::expect_success(resp).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Err(DockerError::NetworkNotFound(name.to_string())),
        Err(e) => Err(e),
    }
}
