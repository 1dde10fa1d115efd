//! Typed error taxonomy for the core (spec §7).
//!
//! Deep core functions return `Result<T, SurekError>`; call sites that only
//! need to propagate use `anyhow::Result` with `.context(...)`, mirroring how
//! the teacher layers `anyhow::Context` over a typed `DockerError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurekError {
    #[error("config error: {0}")]
    Config(String),

    #[error("stack config error: {0}")]
    StackConfig(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("stacks error: {0}")]
    Stacks(String),

    #[error("deploy error: {0}")]
    Deploy(String),
}

impl SurekError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn stack_config(msg: impl Into<String>) -> Self {
        Self::StackConfig(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn stacks(msg: impl Into<String>) -> Self {
        Self::Stacks(msg.into())
    }

    pub fn deploy(msg: impl Into<String>) -> Self {
        Self::Deploy(msg.into())
    }
}
