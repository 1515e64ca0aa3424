//! Identity provider boundary.
//!
//! The provider issues and verifies credentials, owns tokens, and publishes a
//! stream of identity changes. The session manager only consumes the
//! [`IdentityProvider`] trait; concrete adapters live in submodules.
//!
//! Flow Overview: every state change on the provider side (sign-in, sign-out,
//! account deletion, initial session check) is published as an
//! [`IdentityEvent`] carrying a strictly increasing sequence number. Consumers
//! use the sequence to drop stale or duplicated notifications.

pub mod firebase;
pub mod memory;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use utoipa::ToSchema;

/// Externally issued principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// One notification from the provider's change stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityEvent {
    pub sequence: u64,
    pub identity: Option<Identity>,
}

/// Receiver side of the provider change stream.
///
/// The value is `None` while the provider's initial session check is pending.
pub type IdentityStream = watch::Receiver<Option<IdentityEvent>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FederatedProvider {
    Google,
    Apple,
}

impl FederatedProvider {
    #[must_use]
    pub const fn provider_id(self) -> &'static str {
        match self {
            Self::Google => "google.com",
            Self::Apple => "apple.com",
        }
    }
}

impl fmt::Display for FederatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_id())
    }
}

/// Token issued by Google or Apple, exchanged for a provider session.
pub struct FederatedCredential {
    pub provider: FederatedProvider,
    pub id_token: SecretString,
    pub access_token: Option<SecretString>,
    pub raw_nonce: Option<String>,
}

impl FederatedCredential {
    #[must_use]
    pub fn google(id_token: SecretString, access_token: Option<SecretString>) -> Self {
        Self {
            provider: FederatedProvider::Google,
            id_token,
            access_token,
            raw_nonce: None,
        }
    }

    #[must_use]
    pub fn apple(id_token: SecretString, raw_nonce: String) -> Self {
        Self {
            provider: FederatedProvider::Apple,
            id_token,
            access_token: None,
            raw_nonce: Some(raw_nonce),
        }
    }

    pub(crate) fn has_id_token(&self) -> bool {
        !self.id_token.expose_secret().trim().is_empty()
    }
}

// Token material is never printed.
impl fmt::Debug for FederatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedCredential")
            .field("provider", &self.provider)
            .field("id_token", &"[REDACTED]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("raw_nonce", &self.raw_nonce.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Provider-defined failure codes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email already in use")]
    EmailAlreadyInUse,
    #[error("user not found")]
    UserNotFound,
    #[error("no user is signed in")]
    NoCurrentUser,
    #[error("network failure: {0}")]
    Network(String),
    #[error("provider misconfigured: {0}")]
    Configuration(String),
    #[error("provider error {code}: {message}")]
    Other { code: String, message: String },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribe to identity changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> IdentityStream;

    /// Latest published notification, `None` while the initial check is pending.
    fn current(&self) -> Option<IdentityEvent>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, ProviderError>;

    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, ProviderError>;

    async fn sign_in_with_federated_token(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Identity, ProviderError>;

    async fn send_password_reset_email(&self, email: &str) -> Result<(), ProviderError>;

    async fn send_email_verification(&self) -> Result<(), ProviderError>;

    /// Set the display name of the signed-in identity.
    async fn update_profile(&self, display_name: &str) -> Result<Identity, ProviderError>;

    async fn update_password(&self, new_password: &SecretString) -> Result<(), ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn delete_current_account(&self) -> Result<(), ProviderError>;
}

/// Sequenced publisher shared by the provider adapters.
///
/// Publishing and reading the counter happen under one lock so sequence
/// numbers observed by subscribers are strictly increasing.
pub(crate) struct IdentityFeed {
    sender: watch::Sender<Option<IdentityEvent>>,
    sequence: Mutex<u64>,
}

impl IdentityFeed {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender,
            sequence: Mutex::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> IdentityStream {
        self.sender.subscribe()
    }

    pub(crate) fn current(&self) -> Option<IdentityEvent> {
        self.sender.borrow().clone()
    }

    pub(crate) fn current_identity(&self) -> Option<Identity> {
        self.sender
            .borrow()
            .as_ref()
            .and_then(|event| event.identity.clone())
    }

    pub(crate) fn publish(&self, identity: Option<Identity>) -> u64 {
        let mut sequence = self
            .sequence
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *sequence += 1;
        let event = IdentityEvent {
            sequence: *sequence,
            identity,
        };
        self.sender.send_replace(Some(event));
        *sequence
    }
}
