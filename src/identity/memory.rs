//! In-process identity provider for local development and tests.
//!
//! Accounts live in memory and vanish with the process. Federated tokens must
//! be registered up front with [`MemoryIdentityProvider::register_federated`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::{
    FederatedCredential, FederatedProvider, Identity, IdentityEvent, IdentityFeed,
    IdentityProvider, IdentityStream, ProviderError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailKind {
    PasswordReset,
    VerifyEmail,
}

/// Out-of-band email the provider would have delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEmail {
    pub kind: EmailKind,
    pub to: String,
}

struct Account {
    identity: Identity,
    password: SecretString,
}

// Never hold the directory lock across `feed.publish`.
#[derive(Default)]
struct Directory {
    // keyed by lowercase email
    accounts: HashMap<String, Account>,
    federated: HashMap<(FederatedProvider, String), Identity>,
    outbox: Vec<OutboundEmail>,
}

pub struct MemoryIdentityProvider {
    feed: IdentityFeed,
    directory: Mutex<Directory>,
    requests: AtomicUsize,
    fail_next: Mutex<Option<ProviderError>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    /// Create a provider whose initial session check is still pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            feed: IdentityFeed::new(),
            directory: Mutex::new(Directory::default()),
            requests: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
        }
    }

    /// Create a provider that already reported "nobody signed in".
    #[must_use]
    pub fn signed_out() -> Self {
        let provider = Self::new();
        provider.complete_initial_check(None);
        provider
    }

    /// Publish the result of the initial session check.
    pub fn complete_initial_check(&self, restored: Option<Identity>) -> u64 {
        self.feed.publish(restored)
    }

    /// Accept `id_token` for `provider`, resolving to `identity`.
    pub fn register_federated(&self, provider: FederatedProvider, id_token: &str, identity: Identity) {
        self.directory()
            .federated
            .insert((provider, id_token.to_string()), identity);
    }

    /// Number of provider operations issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Make the next provider operation fail with `error`.
    pub fn fail_next(&self, error: ProviderError) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(error);
    }

    /// Emails the provider would have sent.
    pub fn outbox(&self) -> Vec<OutboundEmail> {
        self.directory().outbox.clone()
    }

    fn directory(&self) -> std::sync::MutexGuard<'_, Directory> {
        self.directory
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin(&self) -> Result<(), ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_next
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        injected.map_or(Ok(()), Err)
    }

    fn signed_in(&self) -> Result<Identity, ProviderError> {
        self.feed
            .current_identity()
            .ok_or(ProviderError::NoCurrentUser)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn subscribe(&self) -> IdentityStream {
        self.feed.subscribe()
    }

    fn current(&self) -> Option<IdentityEvent> {
        self.feed.current()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, ProviderError> {
        self.begin()?;
        let identity = {
            let directory = self.directory();
            let account = directory
                .accounts
                .get(&email.to_lowercase())
                .ok_or(ProviderError::UserNotFound)?;
            if account.password.expose_secret() != password.expose_secret() {
                return Err(ProviderError::InvalidCredentials);
            }
            account.identity.clone()
        };
        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, ProviderError> {
        self.begin()?;
        let identity = {
            let mut directory = self.directory();
            let key = email.to_lowercase();
            if directory.accounts.contains_key(&key) {
                return Err(ProviderError::EmailAlreadyInUse);
            }
            let identity = Identity {
                id: Uuid::new_v4().simple().to_string(),
                email: Some(email.to_string()),
                display_name: None,
                photo_url: None,
            };
            directory.accounts.insert(
                key,
                Account {
                    identity: identity.clone(),
                    password: password.clone(),
                },
            );
            identity
        };
        debug!(user_id = %identity.id, "memory account created");
        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in_with_federated_token(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Identity, ProviderError> {
        self.begin()?;
        if credential.provider == FederatedProvider::Apple && credential.raw_nonce.is_none() {
            return Err(ProviderError::InvalidCredentials);
        }
        let identity = self
            .directory()
            .federated
            .get(&(
                credential.provider,
                credential.id_token.expose_secret().to_string(),
            ))
            .cloned()
            .ok_or(ProviderError::InvalidCredentials)?;
        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn send_password_reset_email(&self, email: &str) -> Result<(), ProviderError> {
        self.begin()?;
        let mut directory = self.directory();
        if !directory.accounts.contains_key(&email.to_lowercase()) {
            return Err(ProviderError::UserNotFound);
        }
        directory.outbox.push(OutboundEmail {
            kind: EmailKind::PasswordReset,
            to: email.to_string(),
        });
        Ok(())
    }

    async fn send_email_verification(&self) -> Result<(), ProviderError> {
        self.begin()?;
        let identity = self.signed_in()?;
        let to = identity.email.unwrap_or_default();
        self.directory().outbox.push(OutboundEmail {
            kind: EmailKind::VerifyEmail,
            to,
        });
        Ok(())
    }

    async fn update_profile(&self, display_name: &str) -> Result<Identity, ProviderError> {
        self.begin()?;
        let mut identity = self.signed_in()?;
        identity.display_name = Some(display_name.to_string());
        {
            let mut directory = self.directory();
            if let Some(account) = directory
                .accounts
                .values_mut()
                .find(|account| account.identity.id == identity.id)
            {
                account.identity.display_name = identity.display_name.clone();
            }
        }
        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn update_password(&self, new_password: &SecretString) -> Result<(), ProviderError> {
        self.begin()?;
        let identity = self.signed_in()?;
        let mut directory = self.directory();
        let account = directory
            .accounts
            .values_mut()
            .find(|account| account.identity.id == identity.id)
            .ok_or(ProviderError::UserNotFound)?;
        account.password = new_password.clone();
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.begin()?;
        self.feed.publish(None);
        Ok(())
    }

    async fn delete_current_account(&self) -> Result<(), ProviderError> {
        self.begin()?;
        let identity = self.signed_in()?;
        {
            let mut directory = self.directory();
            directory
                .accounts
                .retain(|_, account| account.identity.id != identity.id);
            directory
                .federated
                .retain(|_, federated| federated.id != identity.id);
        }
        self.feed.publish(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    #[tokio::test]
    async fn create_then_sign_in_round_trip() {
        let provider = MemoryIdentityProvider::signed_out();
        let created = provider
            .create_account("Ann@Example.com", &secret("password1"))
            .await;
        assert!(created.is_ok());

        provider.sign_out().await.ok();
        let signed_in = provider
            .sign_in_with_password("ann@example.com", &secret("password1"))
            .await;
        assert_eq!(
            signed_in.map(|identity| identity.email),
            Ok(Some("Ann@Example.com".to_string()))
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let provider = MemoryIdentityProvider::signed_out();
        provider
            .create_account("a@b.com", &secret("password1"))
            .await
            .ok();
        let second = provider.create_account("A@B.com", &secret("password2")).await;
        assert_eq!(second, Err(ProviderError::EmailAlreadyInUse));
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let provider = MemoryIdentityProvider::signed_out();
        provider
            .create_account("a@b.com", &secret("password1"))
            .await
            .ok();
        let result = provider
            .sign_in_with_password("a@b.com", &secret("password2"))
            .await;
        assert_eq!(result, Err(ProviderError::InvalidCredentials));
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let provider = MemoryIdentityProvider::signed_out();
        provider.fail_next(ProviderError::Network("offline".to_string()));
        assert_eq!(
            provider.sign_out().await,
            Err(ProviderError::Network("offline".to_string()))
        );
        assert_eq!(provider.sign_out().await, Ok(()));
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn apple_requires_nonce() {
        let provider = MemoryIdentityProvider::signed_out();
        let identity = Identity {
            id: "apple-1".to_string(),
            email: None,
            display_name: None,
            photo_url: None,
        };
        provider.register_federated(FederatedProvider::Apple, "tok", identity.clone());

        let mut credential = FederatedCredential::apple(secret("tok"), "nonce".to_string());
        assert_eq!(
            provider.sign_in_with_federated_token(&credential).await,
            Ok(identity)
        );

        credential.raw_nonce = None;
        assert_eq!(
            provider.sign_in_with_federated_token(&credential).await,
            Err(ProviderError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn federated_tokens_are_scoped_per_provider() {
        let provider = MemoryIdentityProvider::signed_out();
        let google = Identity {
            id: "google-1".to_string(),
            email: Some("g@b.com".to_string()),
            display_name: None,
            photo_url: None,
        };
        provider.register_federated(FederatedProvider::Google, "shared", google.clone());

        let credential = FederatedCredential::google(secret("shared"), None);
        assert_eq!(
            provider.sign_in_with_federated_token(&credential).await,
            Ok(google)
        );

        let apple = FederatedCredential::apple(secret("shared"), "nonce".to_string());
        assert_eq!(
            provider.sign_in_with_federated_token(&apple).await,
            Err(ProviderError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn password_reset_records_outbound_email() {
        let provider = MemoryIdentityProvider::signed_out();
        provider
            .create_account("a@b.com", &secret("password1"))
            .await
            .ok();
        assert_eq!(provider.send_password_reset_email("a@b.com").await, Ok(()));
        assert_eq!(
            provider.outbox(),
            vec![OutboundEmail {
                kind: EmailKind::PasswordReset,
                to: "a@b.com".to_string(),
            }]
        );
        assert_eq!(
            provider.send_password_reset_email("nobody@b.com").await,
            Err(ProviderError::UserNotFound)
        );
    }

    #[tokio::test]
    async fn delete_requires_signed_in_user() {
        let provider = MemoryIdentityProvider::signed_out();
        assert_eq!(
            provider.delete_current_account().await,
            Err(ProviderError::NoCurrentUser)
        );
    }
}
