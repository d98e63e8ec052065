//! Connection parameter resolution
//!
//! Priority: environment variables > `~/.vk/db_config.json` > host detection.
//! The result is never cached; every connection request resolves again so a
//! rotated password or a freshly opened tunnel is picked up immediately.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Direct RDS endpoint reachable from inside the VPC
pub const RDS_HOST: &str = "datauploader-instance-1.ci6sgcrhrg7k.us-west-1.rds.amazonaws.com";
pub const RDS_PORT: u16 = 5432;
/// Local end of the SSH tunnel to the bastion
pub const TUNNEL_HOST: &str = "localhost";
pub const TUNNEL_PORT: u16 = 5433;
pub const DEFAULT_DATABASE: &str = "data_uploader";
pub const DEFAULT_USER: &str = "postgres";

/// Per-user config file, relative to the home directory
pub const CONFIG_FILE: &str = ".vk/db_config.json";

const METADATA_ENDPOINT: (&str, u16) = ("169.254.169.254", 80);
const METADATA_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const HOSTNAME_MARKERS: [&str; 3] = ["ec2", "ip-", "aws"];

// =============================================================================
// CONNECTION CONFIG
// =============================================================================

/// Resolved connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Empty means "let the driver find one" (`PGPASSWORD`, `.pgpass`)
    pub password: String,
}

impl ConnectionConfig {
    /// Preset for a detected deployment, without a compiled-in credential
    pub fn preset(deployment: Deployment) -> Self {
        let (host, port) = deployment.endpoint();
        Self {
            host: host.to_string(),
            port,
            database: DEFAULT_DATABASE.to_string(),
            user: DEFAULT_USER.to_string(),
            password: String::new(),
        }
    }

    /// Connection URL with the password masked, safe for logs
    pub fn masked_url(&self) -> String {
        let password = if self.password.is_empty() { "" } else { ":***" };
        format!(
            "postgresql://{}{}@{}:{}/{}",
            self.user, password, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// HOST ENVIRONMENT
// =============================================================================

/// Where the job is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Inside AWS; talks to RDS directly
    Ec2,
    /// Developer machine; goes through the SSH tunnel
    Local,
}

impl Deployment {
    pub fn endpoint(self) -> (&'static str, u16) {
        match self {
            Self::Ec2 => (RDS_HOST, RDS_PORT),
            Self::Local => (TUNNEL_HOST, TUNNEL_PORT),
        }
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ec2 => f.write_str("ec2"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Facts about the host the resolver reads
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    fn home_dir(&self) -> Option<PathBuf>;

    fn hostname(&self) -> Option<String>;

    fn is_windows(&self) -> bool;

    /// Whether the cloud metadata endpoint accepts a TCP connection
    async fn metadata_endpoint_reachable(&self) -> bool;

    fn config_file(&self) -> Option<PathBuf> {
        self.home_dir().map(|home| home.join(CONFIG_FILE))
    }
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

#[async_trait]
impl HostEnvironment for SystemEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    fn hostname(&self) -> Option<String> {
        sysinfo::System::host_name()
    }

    fn is_windows(&self) -> bool {
        cfg!(windows)
    }

    async fn metadata_endpoint_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(
                METADATA_CONNECT_TIMEOUT,
                tokio::net::TcpStream::connect(METADATA_ENDPOINT),
            )
            .await,
            Ok(Ok(_))
        )
    }
}

/// Detect the deployment; every failed check counts as "not EC2"
pub async fn detect_deployment(env: &dyn HostEnvironment) -> Deployment {
    if env.metadata_endpoint_reachable().await {
        debug!("metadata endpoint reachable");
        return Deployment::Ec2;
    }

    if let Some(hostname) = env.hostname() {
        let hostname = hostname.to_lowercase();
        if HOSTNAME_MARKERS.iter().any(|m| hostname.contains(m)) {
            debug!(%hostname, "hostname matches EC2 marker");
            return Deployment::Ec2;
        }
    }

    if env.var("VK_ENV").as_deref() == Some("EC2") {
        return Deployment::Ec2;
    }

    // Default user on Windows EC2 images
    if env.is_windows() && env.var("USERNAME").as_deref() == Some("Administrator") {
        return Deployment::Ec2;
    }

    Deployment::Local
}

// =============================================================================
// RESOLVER
// =============================================================================

#[derive(Debug, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<PortField>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u64),
    Text(String),
}

impl PortField {
    fn to_port(&self) -> Option<u16> {
        match self {
            Self::Number(n) => u16::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Resolves [`ConnectionConfig`] from the configuration cascade
#[derive(Clone)]
pub struct ConfigResolver {
    env: Arc<dyn HostEnvironment>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::system()
    }
}

impl ConfigResolver {
    pub fn new(env: Arc<dyn HostEnvironment>) -> Self {
        Self { env }
    }

    /// Resolver reading the real process environment
    pub fn system() -> Self {
        Self::new(Arc::new(SystemEnvironment))
    }

    pub async fn detect_deployment(&self) -> Deployment {
        detect_deployment(self.env.as_ref()).await
    }

    /// Run the cascade; the first source that applies wins
    pub async fn resolve(&self) -> Result<ConnectionConfig, ConfigError> {
        if let Some(config) = self.env_var_config()? {
            info!("Using database config from environment variables");
            return Ok(config);
        }

        if let Some(path) = self.env.config_file() {
            if let Some(config) = self.file_config(&path).await? {
                info!(path = %path.display(), "Using database config from file");
                return Ok(config);
            }
        }

        let deployment = self.detect_deployment().await;
        match deployment {
            Deployment::Ec2 => info!("Detected EC2 environment - using direct RDS connection"),
            Deployment::Local => info!(
                "Detected local environment - using SSH tunnel (port {})",
                TUNNEL_PORT
            ),
        }
        Ok(ConnectionConfig::preset(deployment))
    }

    /// Priority 1: `DB_PASSWORD` switches everything to environment variables
    fn env_var_config(&self) -> Result<Option<ConnectionConfig>, ConfigError> {
        let Some(password) = self.env.var("DB_PASSWORD").filter(|p| !p.is_empty()) else {
            return Ok(None);
        };

        let port = match self.env.var("DB_PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort {
                value: raw,
                origin: "DB_PORT",
            })?,
            None => RDS_PORT,
        };

        Ok(Some(ConnectionConfig {
            host: self.env.var("DB_HOST").unwrap_or_else(|| RDS_HOST.to_string()),
            port,
            database: self
                .env
                .var("DB_NAME")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            user: self
                .env
                .var("DB_USER")
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
            password,
        }))
    }

    /// Priority 2: the per-user JSON file. A missing password is fatal,
    /// anything else wrong with the file falls through to detection.
    async fn file_config(&self, path: &Path) -> Result<Option<ConnectionConfig>, ConfigError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = %path.display(), "Could not read config file: {}", e);
                return Ok(None);
            }
        };

        let file: FileConfig = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), "Could not parse config file: {}", e);
                return Ok(None);
            }
        };

        let password = file.password.ok_or_else(|| ConfigError::MissingField {
            path: path.to_path_buf(),
            field: "password",
        })?;

        let port = match &file.port {
            Some(field) => match field.to_port() {
                Some(port) => port,
                None => {
                    warn!(path = %path.display(), "Invalid port '{}' in config file", field);
                    return Ok(None);
                }
            },
            None => TUNNEL_PORT,
        };

        let explicit_host = file
            .host
            .filter(|h| !h.is_empty() && h != TUNNEL_HOST);

        let (host, port) = match explicit_host {
            Some(host) => (host, port),
            None => {
                let (host, port) = self.detect_deployment().await.endpoint();
                (host.to_string(), port)
            }
        };

        Ok(Some(ConnectionConfig {
            host,
            port,
            database: file.database.unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            user: file.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            password,
        }))
    }
}

/// In-memory [`HostEnvironment`] for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    pub vars: HashMap<String, String>,
    pub home: Option<PathBuf>,
    pub hostname: Option<String>,
    pub windows: bool,
    pub metadata_reachable: bool,
}

impl StaticEnvironment {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }
}

#[async_trait]
impl HostEnvironment for StaticEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }

    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    fn is_windows(&self) -> bool {
        self.windows
    }

    async fn metadata_endpoint_reachable(&self) -> bool {
        self.metadata_reachable
    }
}
