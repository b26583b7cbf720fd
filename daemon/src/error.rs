use std::io;

use incidentdb_core::{RegistryError, ResolveError, SeedError, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
    #[error("logger initialization failed: {0}")]
    Logger(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid schema: {0}")]
    Registry(#[from] RegistryError),
    #[error("seeding failed: {0}")]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
