use crate::sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] aria2::Error),
    #[error("download daemon is not connected")]
    Disconnected,
    #[error("download daemon did not answer {0} in time")]
    Timeout(&'static str),
    #[error("database error: {0}")]
    Database(InternalError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] envy::Error),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl Error {
    /// Wraps a repository failure so it is distinguishable from other
    /// internal errors.
    pub fn database(err: InternalError) -> Self {
        Self::Database(err)
    }
}

pub type InternalError = anyhow::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
