use std::time::Duration;

use hookdeploy::{DeploymentTarget, Route};
use log::info;

use crate::dispatch::{RouteTable, RouteTableError};

const DEFAULT_SECRET_ENV: &str = "SECRET";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 900;
// GitHub caps webhook payloads at 25 MB
const DEFAULT_MAX_BODY_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SerializedConfig {
    address: String,
    workspace: String,
    #[serde(default)]
    secret_env: Option<String>,
    #[serde(default)]
    stage_timeout_secs: Option<u64>,
    #[serde(default)]
    max_body_bytes: Option<u64>,
    targets: Vec<DeploymentTarget>,
    routes: Vec<Route>,
}

#[derive(Debug)]
pub struct Config {
    pub address: std::net::SocketAddr,
    /// Directory that target repositories are relative to
    pub workspace: String,
    pub secret: Vec<u8>,
    /// Per-stage timeout, `None` when disabled
    pub stage_timeout: Option<Duration>,
    /// Largest request body accepted, in bytes
    pub max_body: u64,
    pub routes: RouteTable,
}

impl Config {
    pub fn read(path: &str) -> Result<Self, ConfigError> {
        info!("Reading config from: {}", path);
        let file =
            std::fs::File::open(path).map_err(|err| ConfigError::file(String::from(path), err))?;
        let serde_config: SerializedConfig = serde_json::from_reader(file)?;
        Self::resolve(serde_config, |name| std::env::var(name).ok())
    }

    fn resolve(
        SerializedConfig {
            address,
            workspace,
            secret_env,
            stage_timeout_secs,
            max_body_bytes,
            targets,
            routes,
        }: SerializedConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let address = address.parse()?;
        let secret_env = secret_env.unwrap_or_else(|| String::from(DEFAULT_SECRET_ENV));
        let secret = env(&secret_env)
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::MissingSecret { var: secret_env })?
            .into_bytes();
        let stage_timeout = match stage_timeout_secs.unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let max_body = max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
        let routes = RouteTable::build(&targets, &routes)?;
        Ok(Config {
            address,
            workspace,
            secret,
            stage_timeout,
            max_body,
            routes,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    File { path: String, inner: std::io::Error },
    Parsing { inner: serde_json::Error },
    Address { inner: std::net::AddrParseError },
    MissingSecret { var: String },
    Routes { inner: RouteTableError },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::File { path, inner } => write!(f, "could not read ({}): {}", path, inner),
            ConfigError::Parsing { inner } => write!(f, "could not parse: {}", inner),
            ConfigError::Address { inner } => write!(f, "bad address: {}", inner),
            ConfigError::MissingSecret { var } => {
                write!(f, "shared secret not set: environment variable {}", var)
            }
            ConfigError::Routes { inner } => write!(f, "bad route table: {}", inner),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    fn file(path: String, inner: std::io::Error) -> Self {
        ConfigError::File { path, inner }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(inner: serde_json::Error) -> Self {
        ConfigError::Parsing { inner }
    }
}

impl From<std::net::AddrParseError> for ConfigError {
    fn from(inner: std::net::AddrParseError) -> Self {
        ConfigError::Address { inner }
    }
}

impl From<RouteTableError> for ConfigError {
    fn from(inner: RouteTableError) -> Self {
        ConfigError::Routes { inner }
    }
}
