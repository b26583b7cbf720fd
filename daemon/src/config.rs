use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use incidentdb_core::CollectionPolicy;
use serde::Deserialize;

use crate::error::{DaemonError, Result};

const DEFAULT_CONFIG_ENV: &str = "INCIDENTDB_DAEMON_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub working_directory: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub umask: Option<u32>,
    pub log_level: Option<String>,
    pub daemonize: bool,
    pub storage: StorageSettings,
    pub server: ServerSettings,
    pub resolution: ResolutionSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("/"),
            pid_file: Some(PathBuf::from("incidentdb-daemon.pid")),
            stdin: None,
            stdout: Some(PathBuf::from("incidentdb-daemon.log")),
            stderr: None,
            umask: Some(0o027),
            log_level: Some(String::from("info")),
            daemonize: true,
            storage: StorageSettings::default(),
            server: ServerSettings::default(),
            resolution: ResolutionSettings::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_sources(cli_path: Option<&str>) -> Result<Self> {
        let env_path = std::env::var(DEFAULT_CONFIG_ENV).ok();

        if let Some(path) = cli_path {
            if path.is_empty() {
                return Err(DaemonError::Config(
                    "configuration path must not be empty".into(),
                ));
            }
        }

        let config = if let Some(path) = cli_path {
            Self::load_from_path(path)?
        } else if let Some(path) = env_path.as_deref().filter(|p| !p.is_empty()) {
            Self::load_from_path(path)?
        } else {
            let mut cfg = Self::default();
            cfg.normalize_paths(&std::env::current_dir()?);
            cfg
        };

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let raw = fs::read_to_string(&absolute_path)?;
        let mut config: DaemonConfig = toml::from_str(&raw)?;
        let base = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.normalize_paths(&base);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(DaemonError::Config(
                "working_directory must not be empty".into(),
            ));
        }

        if let StorageBackendKind::Simple = self.storage.backend {
            if self.storage.directory.is_none() {
                return Err(DaemonError::Config(
                    "storage.directory must be set when using simple backend".into(),
                ));
            }
        }

        let limits = [
            ("server.concurrency_limit", self.server.concurrency_limit),
            ("server.body_limit", self.server.body_limit),
            ("server.worker_threads", self.server.worker_threads),
        ];
        for (name, limit) in limits {
            if limit == Some(0) {
                return Err(DaemonError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self
            .server
            .allowed_origins
            .iter()
            .any(|origin| origin.trim().is_empty())
        {
            return Err(DaemonError::Config(
                "server.allowed_origins must not contain empty entries".into(),
            ));
        }

        self.socket_addr().map(|_| ())
    }

    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    pub fn stdout(&self) -> Option<&Path> {
        self.stdout.as_deref()
    }

    pub fn stderr(&self) -> Option<&Path> {
        self.stderr.as_deref()
    }

    pub fn stdin(&self) -> Option<&Path> {
        self.stdin.as_deref()
    }

    pub fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|err| DaemonError::Config(format!("invalid bind_address: {err}")))?;
        Ok(SocketAddr::new(addr, self.server.port))
    }

    pub fn server(&self) -> &ServerSettings {
        &self.server
    }

    pub fn resolution(&self) -> &ResolutionSettings {
        &self.resolution
    }

    fn normalize_paths(&mut self, base: &Path) {
        if self.working_directory.is_relative() {
            self.working_directory = base.join(&self.working_directory);
        }

        normalize_optional_path(&mut self.pid_file, base);
        normalize_optional_path(&mut self.stdin, base);
        normalize_optional_path(&mut self.stdout, base);
        normalize_optional_path(&mut self.stderr, base);
        self.storage.normalize(base);
    }
}

fn normalize_optional_path(target: &mut Option<PathBuf>, base: &Path) {
    if let Some(path) = target {
        if path.is_relative() {
            *path = base.join(&*path);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Memory,
    Simple,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackendKind,
    pub directory: Option<PathBuf>,
    /// Reference-catalog seed file loaded at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            directory: None,
            seed_file: None,
        }
    }
}

impl StorageSettings {
    fn normalize(&mut self, base: &Path) {
        normalize_optional_path(&mut self.directory, base);
        normalize_optional_path(&mut self.seed_file, base);
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    pub http2_only: bool,
    pub tcp_nodelay: bool,
    pub worker_threads: Option<usize>,
    pub concurrency_limit: Option<usize>,
    pub body_limit: Option<usize>,
    /// Origins allowed by CORS; empty disables the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8080,
            http2_only: false,
            tcp_nodelay: true,
            worker_threads: None,
            concurrency_limit: None,
            body_limit: None,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn worker_threads(&self) -> Option<usize> {
        self.worker_threads
    }
}

/// Collection policy per list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolutionSettings {
    pub incidents: CollectionPolicy,
    pub incidents_by_factory: CollectionPolicy,
    pub factories: CollectionPolicy,
    pub workers: CollectionPolicy,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            incidents: CollectionPolicy::SkipAndContinue,
            incidents_by_factory: CollectionPolicy::SkipAndContinue,
            factories: CollectionPolicy::FailFast,
            workers: CollectionPolicy::SkipAndContinue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("incidentdb.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn relative_paths_resolve_against_config_directory() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            working_directory = "run"
            pid_file = "run/incidentdb.pid"

            [storage]
            backend = "simple"
            directory = "data"
            seed_file = "catalog.json"
            "#,
        );

        let config = DaemonConfig::load_from_path(&path).unwrap();

        assert_eq!(config.working_directory, dir.path().join("run"));
        assert_eq!(config.pid_file(), Some(dir.path().join("run/incidentdb.pid").as_path()));
        assert_eq!(config.storage.backend, StorageBackendKind::Simple);
        assert_eq!(config.storage.directory, Some(dir.path().join("data")));
        assert_eq!(config.storage.seed_file, Some(dir.path().join("catalog.json")));
    }

    #[test]
    fn resolution_policies_parse_and_default() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [resolution]
            factories = "skip_and_continue"
            incidents = "fail_fast"
            "#,
        );

        let config = DaemonConfig::load_from_path(&path).unwrap();

        assert_eq!(config.resolution.incidents, CollectionPolicy::FailFast);
        assert_eq!(config.resolution.factories, CollectionPolicy::SkipAndContinue);
        assert_eq!(
            config.resolution.workers,
            ResolutionSettings::default().workers
        );
    }

    #[test]
    fn simple_backend_requires_directory() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[storage]\nbackend = \"simple\"\n");

        let err = DaemonConfig::from_sources(path.to_str()).unwrap_err();
        assert!(matches!(err, DaemonError::Config(msg) if msg.contains("storage.directory")));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[server]\nconcurrency_limit = 0\n");

        let err = DaemonConfig::from_sources(path.to_str()).unwrap_err();
        assert!(matches!(err, DaemonError::Config(msg) if msg.contains("concurrency_limit")));
    }

    #[test]
    fn invalid_bind_address_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[server]\nbind_address = \"not-an-ip\"\n");

        let err = DaemonConfig::from_sources(path.to_str()).unwrap_err();
        assert!(matches!(err, DaemonError::Config(msg) if msg.contains("bind_address")));
    }

    #[test]
    fn empty_cli_path_is_rejected() {
        let err = DaemonConfig::from_sources(Some("")).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }
}
