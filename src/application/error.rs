use thiserror::Error;

use crate::{
    application::{compiler::CompileError, pool::DispatchError},
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    /// Compiler diagnostics, carried verbatim.
    #[error("{0}")]
    Compile(String),
    #[error(transparent)]
    Dispatch(DispatchError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl RenderError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<DispatchError> for RenderError {
    fn from(error: DispatchError) -> Self {
        match error {
            // A worker-side job failure is the compiler speaking.
            DispatchError::Job(message) => RenderError::Compile(message),
            other => RenderError::Dispatch(other),
        }
    }
}

impl From<CompileError> for RenderError {
    fn from(error: CompileError) -> Self {
        match error {
            CompileError::Rules(message) => RenderError::Compile(message),
            other => RenderError::Unexpected(other.to_string()),
        }
    }
}
