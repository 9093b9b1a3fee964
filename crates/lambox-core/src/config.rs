use std::path::{Path, PathBuf};

use lambox_docker::{GatewayConfig, LAMBCI_IMAGE};
use serde::Deserialize;

use crate::code_store::CodeStore;
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct LamboxConfig {
    /// Region embedded in every function ARN.
    #[serde(default = "default_region")]
    pub region: String,
    /// Where function code is staged, one directory per function.
    #[serde(default = "CodeStore::default_path")]
    pub code_dir: PathBuf,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_host")]
    pub host: String,
    /// Network to attach function containers to instead of the detected one.
    pub network: Option<String>,
    #[serde(default = "default_image")]
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_region() -> String {
    std::env::var("AWS_REGION")
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "us-east-1".into())
}
fn default_docker_host() -> String {
    std::env::var("DOCKER_HOST")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unix:///var/run/docker.sock".into())
}
fn default_image() -> String {
    LAMBCI_IMAGE.into()
}
fn default_listen() -> String {
    "127.0.0.1:9000".into()
}

impl Default for LamboxConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            code_dir: CodeStore::default_path(),
            docker: DockerConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: default_docker_host(),
            network: None,
            image: default_image(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl LamboxConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            network: self.docker.network.clone(),
            image: self.docker.image.clone(),
            ..GatewayConfig::new(self.docker.host.clone(), self.code_dir.clone())
        }
    }
}
