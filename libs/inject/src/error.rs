//! Error types for dependency resolution

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("No provider registered for {type_name}")]
    MissingDependency { type_name: &'static str },

    #[error("Circular dependency while resolving {type_name}: {}", path.join(" -> "))]
    CircularDependency {
        type_name: &'static str,
        path: Vec<&'static str>,
    },

    #[error("Failed to construct {type_name}: {reason}")]
    ConstructionFailed {
        type_name: &'static str,
        reason: String,
    },

    #[error("Cannot resolve {type_name}: request scope already released")]
    ScopeReleased { type_name: &'static str },

    #[error("Provider for {type_name} registered more than once")]
    DuplicateRegistration { type_name: &'static str },

    #[error("Stored instance does not match requested type {type_name}")]
    TypeMismatch { type_name: &'static str },
}

impl Error {
    /// Build a [`Error::ConstructionFailed`] for `T` from any displayable cause.
    pub fn construction<T: ?Sized>(reason: impl std::fmt::Display) -> Self {
        Error::ConstructionFailed {
            type_name: std::any::type_name::<T>(),
            reason: reason.to_string(),
        }
    }

    /// Name of the dependency the error is about.
    pub fn type_name(&self) -> &'static str {
        match self {
            Error::MissingDependency { type_name }
            | Error::CircularDependency { type_name, .. }
            | Error::ConstructionFailed { type_name, .. }
            | Error::ScopeReleased { type_name }
            | Error::DuplicateRegistration { type_name }
            | Error::TypeMismatch { type_name } => type_name,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
