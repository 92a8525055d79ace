use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{message}")]
    Validation { message: String },
    #[error("no migration path from `{from}` to `{to}`")]
    NoMigrationPath { from: String, to: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn no_migration_path(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::NoMigrationPath {
            from: from.into(),
            to: to.into(),
        }
    }
}
