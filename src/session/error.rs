//! Error taxonomy returned by the session manager.
//!
//! Provider and store failures are mapped here, at the manager boundary, so
//! callers only ever see [`AuthError`].

use thiserror::Error;

use super::validator::Violation;
use crate::identity::ProviderError;
use crate::profile::ProfileError;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid input: {}", describe(.0))]
    Validation(Vec<Violation>),
    #[error("invalid credentials provided")]
    InvalidCredentials,
    #[error("this email is already registered")]
    EmailAlreadyInUse,
    #[error("user not found")]
    UnknownIdentity,
    #[error("network connection failed: {0}")]
    Network(String),
    #[error("no user is currently signed in")]
    NoActiveSession,
    #[error("identity provider configuration error: {0}")]
    ProviderConfiguration(String),
    #[error("stored document could not be decoded: {0}")]
    Decoding(String),
    #[error("{0}")]
    Unknown(String),
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl AuthError {
    /// Stable machine-readable code for presentation layers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidCredentials => "invalid_credentials",
            Self::EmailAlreadyInUse => "email_already_in_use",
            Self::UnknownIdentity => "unknown_identity",
            Self::Network(_) => "network_error",
            Self::NoActiveSession => "no_active_session",
            Self::ProviderConfiguration(_) => "provider_configuration_error",
            Self::Decoding(_) => "decoding_error",
            Self::Unknown(_) => "unknown",
        }
    }

    pub(crate) fn validation(violation: Violation) -> Self {
        Self::Validation(vec![violation])
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials => Self::InvalidCredentials,
            ProviderError::EmailAlreadyInUse => Self::EmailAlreadyInUse,
            ProviderError::UserNotFound => Self::UnknownIdentity,
            ProviderError::NoCurrentUser => Self::NoActiveSession,
            ProviderError::Network(message) => Self::Network(message),
            ProviderError::Configuration(message) => Self::ProviderConfiguration(message),
            other @ ProviderError::Other { .. } => Self::Unknown(other.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Decoding { .. } => Self::Decoding(err.to_string()),
            StoreError::Unavailable(message) => Self::Network(message),
            StoreError::NotFound { .. }
            | StoreError::Backend(_)
            | StoreError::LimitExceeded { .. } => Self::Unknown(err.to_string()),
        }
    }
}

impl From<ProfileError> for AuthError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::Store(store) => store.into(),
            other @ (ProfileError::LimitReached { .. } | ProfileError::NotFound(_)) => {
                Self::Unknown(other.to_string())
            }
        }
    }
}
