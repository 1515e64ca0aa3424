//! Authentication session manager.
//!
//! Flow Overview: the manager subscribes to the identity provider's change
//! stream at startup and derives [`SessionState`] from it. Imperative
//! operations validate input locally, call the provider, bootstrap the profile
//! document, then synchronize with the provider's latest notification through
//! the same transition used by the listener. All writes to the state go
//! through `watch::Sender::send_if_modified`, which serializes them.
//!
//! Sign-out clears local state first and raises the applied-sequence floor, so
//! a notification produced before the sign-out can never re-authenticate.

pub mod error;
pub mod nonce;
mod state;
pub mod validator;


use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

pub use error::AuthError;
pub use state::SessionState;
use state::Transitions;
use validator::{
    Violation, display_name_violation, password_violation, validate_email, validate_registration,
};

use crate::identity::{
    FederatedCredential, Identity, IdentityEvent, IdentityProvider, IdentityStream,
};
use crate::profile::ProfileService;

/// State shared with the listener task.
struct Shared {
    state: watch::Sender<SessionState>,
    transitions: Mutex<Transitions>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        Self {
            state,
            transitions: Mutex::new(Transitions::new()),
        }
    }

    fn apply(&self, event: &IdentityEvent) -> bool {
        self.state.send_if_modified(|state| {
            self.transitions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(state, event)
        })
    }

    fn clear(&self, floor: u64) -> bool {
        self.state.send_if_modified(|state| {
            self.transitions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear(state, floor)
        })
    }
}

pub struct SessionManager {
    shared: Arc<Shared>,
    provider: Arc<dyn IdentityProvider>,
    profiles: ProfileService,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Start a session bound to `provider` and spawn its notification listener.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(provider: Arc<dyn IdentityProvider>, profiles: ProfileService) -> Self {
        let shared = Arc::new(Shared::new());
        let stream = provider.subscribe();
        if let Some(event) = provider.current() {
            shared.apply(&event);
        }
        let listener = tokio::spawn(listen(shared.clone(), stream));
        Self {
            shared,
            provider,
            profiles,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn current_identity(&self) -> Option<Identity> {
        self.shared.state.borrow().identity().cloned()
    }

    #[must_use]
    pub const fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    /// Wait until the provider's initial session check has resolved.
    pub async fn ready(&self) -> SessionState {
        let mut receiver = self.watch();
        match receiver.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.clone(),
            // sender lives as long as `self`
            Err(_) => self.state(),
        }
    }

    /// # Errors
    /// Returns `Validation` for a malformed email or password, otherwise the
    /// mapped provider or store failure.
    #[instrument(skip(self, email, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, AuthError> {
        let email = email.trim();
        if !validate_email(email) {
            return Err(AuthError::validation(Violation::InvalidEmail));
        }
        if let Some(violation) = password_violation(password.expose_secret()) {
            return Err(AuthError::validation(violation));
        }

        let identity = self.provider.sign_in_with_password(email, password).await?;
        self.finish_sign_in(identity).await
    }

    /// Create an account, set its display name and bootstrap its profile.
    ///
    /// # Errors
    /// Returns every `Validation` violation before any provider call, or the
    /// mapped provider or store failure.
    #[instrument(skip(self, email, password, confirm_password, display_name))]
    pub async fn register_with_password(
        &self,
        email: &str,
        password: &SecretString,
        confirm_password: &SecretString,
        display_name: &str,
    ) -> Result<Identity, AuthError> {
        let email = email.trim();
        let display_name = display_name.trim();
        let violations = validate_registration(
            email,
            password.expose_secret(),
            confirm_password.expose_secret(),
            display_name,
        );
        if !violations.is_empty() {
            return Err(AuthError::Validation(violations));
        }

        let created = self.provider.create_account(email, password).await?;
        info!(user_id = %created.id, "Account created");

        let identity = match self.provider.update_profile(display_name).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!("Failed to set display name on new account: {err}");
                Identity {
                    display_name: Some(display_name.to_string()),
                    ..created
                }
            }
        };

        if let Err(err) = self.provider.send_email_verification().await {
            warn!("Failed to send verification email: {err}");
        }

        self.finish_sign_in(identity).await
    }

    /// Exchange a Google or Apple token for a session.
    ///
    /// # Errors
    /// Returns `InvalidCredentials` for an empty token, otherwise the mapped
    /// provider or store failure.
    #[instrument(skip(self, credential), fields(provider = %credential.provider))]
    pub async fn sign_in_with_federated_token(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Identity, AuthError> {
        if !credential.has_id_token() {
            return Err(AuthError::InvalidCredentials);
        }
        let identity = self
            .provider
            .sign_in_with_federated_token(credential)
            .await?;
        self.finish_sign_in(identity).await
    }

    /// # Errors
    /// Returns `Validation` for a malformed email, otherwise the mapped
    /// provider failure.
    #[instrument(skip(self, email))]
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if !validate_email(email) {
            return Err(AuthError::validation(Violation::InvalidEmail));
        }
        self.provider.send_password_reset_email(email).await?;
        Ok(())
    }

    /// Clear the local session, then revoke the provider session.
    ///
    /// Revocation failures are logged; the local session is gone either way.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        if self.revoke().await {
            info!("Signed out");
        }
    }

    /// Delete the provider account, then its profile document.
    ///
    /// # Errors
    /// Returns `NoActiveSession` when nobody is signed in, otherwise the mapped
    /// provider failure. Profile cleanup failures are only logged.
    #[instrument(skip(self))]
    pub async fn delete_account(&self) -> Result<(), AuthError> {
        let identity = self.require_identity()?;
        self.provider.delete_current_account().await?;
        info!(user_id = %identity.id, "Account deleted");

        if let Err(err) = self.profiles.delete_profile(&identity.id).await {
            warn!("Failed to delete profile document: {err}");
        }
        self.sync();
        Ok(())
    }

    /// # Errors
    /// Returns `NoActiveSession`, `Validation`, or the mapped provider failure.
    #[instrument(skip(self, new_password))]
    pub async fn update_password(&self, new_password: &SecretString) -> Result<(), AuthError> {
        self.require_identity()?;
        if let Some(violation) = password_violation(new_password.expose_secret()) {
            return Err(AuthError::validation(violation));
        }
        self.provider.update_password(new_password).await?;
        Ok(())
    }

    /// Rename the signed-in identity and mirror it into the profile.
    ///
    /// # Errors
    /// Returns `NoActiveSession`, `Validation`, or the mapped provider or
    /// store failure.
    #[instrument(skip(self, display_name))]
    pub async fn update_display_name(&self, display_name: &str) -> Result<Identity, AuthError> {
        self.require_identity()?;
        let display_name = display_name.trim();
        if let Some(violation) = display_name_violation(display_name) {
            return Err(AuthError::validation(violation));
        }

        let identity = self.provider.update_profile(display_name).await?;
        self.profiles.ensure_profile(&identity).await?;
        self.profiles
            .update_display_name(&identity.id, display_name)
            .await?;
        self.sync();
        Ok(identity)
    }

    /// Change the email recorded in the signed-in reader's profile.
    ///
    /// # Errors
    /// Returns `NoActiveSession`, `Validation`, or the mapped store failure.
    #[instrument(skip(self, email))]
    pub async fn update_email(&self, email: &str) -> Result<(), AuthError> {
        let identity = self.require_identity()?;
        let email = email.trim();
        if !validate_email(email) {
            return Err(AuthError::validation(Violation::InvalidEmail));
        }
        self.profiles.update_email(&identity.id, email).await?;
        Ok(())
    }

    /// Stop listening to provider notifications. The state freezes.
    pub fn shutdown(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
            debug!("Session listener stopped");
        }
    }

    fn require_identity(&self) -> Result<Identity, AuthError> {
        self.current_identity().ok_or(AuthError::NoActiveSession)
    }

    /// A sign-in only counts once the profile exists; otherwise the provider
    /// session is revoked and the error returned.
    async fn finish_sign_in(&self, identity: Identity) -> Result<Identity, AuthError> {
        if let Err(err) = self.profiles.ensure_profile(&identity).await {
            warn!(user_id = %identity.id, "Profile bootstrap failed: {err}");
            self.revoke().await;
            return Err(err.into());
        }
        self.sync();
        info!(user_id = %identity.id, "Signed in");
        Ok(identity)
    }

    /// Clear local state above the provider's latest sequence, then revoke the
    /// provider session. Returns `true` when the local state changed.
    async fn revoke(&self) -> bool {
        let floor = self.provider.current().map_or(0, |event| event.sequence);
        let cleared = self.shared.clear(floor);
        if let Err(err) = self.provider.sign_out().await {
            warn!("Failed to revoke provider session: {err}");
        }
        self.sync();
        cleared
    }

    /// Apply the provider's latest notification.
    fn sync(&self) {
        if let Some(event) = self.provider.current() {
            self.shared.apply(&event);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen(shared: Arc<Shared>, mut stream: IdentityStream) {
    loop {
        let event = stream.borrow_and_update().clone();
        if let Some(event) = event
            && shared.apply(&event)
        {
            debug!(sequence = event.sequence, "Session state changed");
        }
        if stream.changed().await.is_err() {
            debug!("Identity provider stream closed");
            break;
        }
    }
}
