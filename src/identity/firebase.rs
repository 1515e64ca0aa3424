//! Firebase Identity Toolkit adapter.
//!
//! Talks to the public REST surface (`accounts:*` and the secure-token
//! endpoint). Tokens returned by the provider stay in memory only and are
//! never logged. The API key is a project identifier, not a secret in the
//! cryptographic sense, but it is still wrapped so it stays out of `Debug`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{Instrument, debug, info_span, instrument, warn};
use url::form_urlencoded;

use super::{
    FederatedCredential, Identity, IdentityEvent, IdentityFeed, IdentityProvider,
    IdentityStream, ProviderError,
};

const DEFAULT_IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
const DEFAULT_IDP_REQUEST_URI: &str = "http://localhost";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, Debug)]
pub struct FirebaseConfig {
    api_key: SecretString,
    identity_toolkit_url: String,
    secure_token_url: String,
    idp_request_uri: String,
    timeout: Duration,
}

impl FirebaseConfig {
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            identity_toolkit_url: DEFAULT_IDENTITY_TOOLKIT_URL.to_string(),
            secure_token_url: DEFAULT_SECURE_TOKEN_URL.to_string(),
            idp_request_uri: DEFAULT_IDP_REQUEST_URI.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_identity_toolkit_url(mut self, url: String) -> Self {
        self.identity_toolkit_url = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_secure_token_url(mut self, url: String) -> Self {
        self.secure_token_url = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_idp_request_uri(mut self, uri: String) -> Self {
        self.idp_request_uri = uri;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn identity_toolkit_url(&self) -> &str {
        &self.identity_toolkit_url
    }

    #[must_use]
    pub fn secure_token_url(&self) -> &str {
        &self.secure_token_url
    }
}

/// Tokens for the signed-in user.
struct FirebaseSession {
    identity: Identity,
    id_token: SecretString,
    refresh_token: SecretString,
}

pub struct FirebaseIdentityProvider {
    config: FirebaseConfig,
    client: Client,
    feed: IdentityFeed,
    session: Mutex<Option<FirebaseSession>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OobRequest<'a> {
    request_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdTokenRequest<'a> {
    id_token: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    #[serde(alias = "profilePicture")]
    photo_url: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountResponse>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Empty {}

impl AccountResponse {
    fn identity(&self) -> Identity {
        Identity {
            id: self.local_id.clone(),
            email: self.email.clone().filter(|email| !email.is_empty()),
            display_name: self.display_name.clone().filter(|name| !name.is_empty()),
            photo_url: self.photo_url.clone().filter(|url| !url.is_empty()),
        }
    }
}

/// Map an Identity Toolkit error message to a provider error.
///
/// Messages look like `EMAIL_EXISTS` or `WEAK_PASSWORD : Password should be ...`.
pub(crate) fn map_error_message(message: &str) -> ProviderError {
    let code = message
        .split(" : ")
        .next()
        .map_or(message, str::trim)
        .to_string();
    match code.as_str() {
        "EMAIL_EXISTS" => ProviderError::EmailAlreadyInUse,
        "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => ProviderError::UserNotFound,
        "INVALID_PASSWORD"
        | "INVALID_LOGIN_CREDENTIALS"
        | "INVALID_IDP_RESPONSE"
        | "INVALID_ID_TOKEN"
        | "MISSING_OR_INVALID_NONCE" => ProviderError::InvalidCredentials,
        "CONFIGURATION_NOT_FOUND"
        | "INVALID_API_KEY"
        | "OPERATION_NOT_ALLOWED"
        | "PROJECT_NOT_FOUND" => ProviderError::Configuration(code),
        _ if code.starts_with("API key not valid") => ProviderError::Configuration(code),
        _ => ProviderError::Other {
            code,
            message: message.to_string(),
        },
    }
}

fn map_transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        ProviderError::Network(err.to_string())
    } else {
        ProviderError::Other {
            code: "TRANSPORT".to_string(),
            message: err.to_string(),
        }
    }
}

/// Build the `postBody` form understood by `accounts:signInWithIdp`.
pub(crate) fn idp_post_body(credential: &FederatedCredential) -> String {
    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("id_token", credential.id_token.expose_secret());
    form.append_pair("providerId", credential.provider.provider_id());
    if let Some(access_token) = &credential.access_token {
        form.append_pair("access_token", access_token.expose_secret());
    }
    if let Some(nonce) = &credential.raw_nonce {
        form.append_pair("nonce", nonce);
    }
    form.finish()
}

impl FirebaseIdentityProvider {
    /// Build the adapter. The initial session check is pending until
    /// [`FirebaseIdentityProvider::initialize`] runs.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: FirebaseConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| ProviderError::Configuration(err.to_string()))?;
        Ok(Self {
            config,
            client,
            feed: IdentityFeed::new(),
            session: Mutex::new(None),
        })
    }

    /// Run the initial session check, restoring a persisted refresh token when
    /// one is supplied. Always publishes exactly one notification.
    pub async fn initialize(&self, refresh_token: Option<SecretString>) {
        let restored = match refresh_token {
            Some(token) => match self.restore(&token).await {
                Ok(session) => {
                    let identity = session.identity.clone();
                    self.store_session(Some(session));
                    Some(identity)
                }
                Err(err) => {
                    warn!("Failed to restore provider session: {err}");
                    None
                }
            },
            None => None,
        };
        self.feed.publish(restored);
    }

    async fn restore(&self, refresh_token: &SecretString) -> Result<FirebaseSession, ProviderError> {
        let url = format!("{}/token", self.config.secure_token_url);
        let refreshed: RefreshResponse = self
            .post(
                url,
                &RefreshRequest {
                    grant_type: "refresh_token",
                    refresh_token: refresh_token.expose_secret(),
                },
            )
            .await?;
        let lookup: LookupResponse = self
            .call(
                "lookup",
                &IdTokenRequest {
                    id_token: &refreshed.id_token,
                },
            )
            .await?;
        let account = lookup
            .users
            .first()
            .ok_or(ProviderError::UserNotFound)?;
        Ok(FirebaseSession {
            identity: account.identity(),
            id_token: SecretString::from(refreshed.id_token),
            refresh_token: SecretString::from(refreshed.refresh_token),
        })
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/accounts:{method}", self.config.identity_toolkit_url);
        self.post(url, body).await
    }

    async fn post<B, R>(&self, url: String, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let span = info_span!("identity.request", http.url = %url);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.expose_secret())])
            .json(body)
            .send()
            .instrument(span)
            .await
            .map_err(|err| map_transport_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorEnvelope>().await {
                Ok(envelope) => envelope.error.message,
                Err(_) => format!("HTTP {status}"),
            };
            debug!(%status, "identity provider rejected request: {message}");
            return Err(map_error_message(&message));
        }

        response.json::<R>().await.map_err(|err| ProviderError::Other {
            code: "DECODE".to_string(),
            message: err.to_string(),
        })
    }

    fn store_session(&self, session: Option<FirebaseSession>) {
        *self
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = session;
    }

    fn id_token(&self) -> Result<SecretString, ProviderError> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|session| session.id_token.clone())
            .ok_or(ProviderError::NoCurrentUser)
    }

    /// Store tokens from a sign-in response and publish the identity.
    fn accept(&self, account: &AccountResponse) -> Result<Identity, ProviderError> {
        let (Some(id_token), Some(refresh_token)) = (&account.id_token, &account.refresh_token)
        else {
            return Err(ProviderError::Other {
                code: "MISSING_TOKEN".to_string(),
                message: "sign-in response did not include tokens".to_string(),
            });
        };
        let identity = account.identity();
        self.store_session(Some(FirebaseSession {
            identity: identity.clone(),
            id_token: SecretString::from(id_token.clone()),
            refresh_token: SecretString::from(refresh_token.clone()),
        }));
        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    /// Apply a profile/password update response, rotating tokens if present.
    fn refresh_from(&self, account: &AccountResponse) -> Identity {
        let identity = account.identity();
        let mut guard = self
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(session) = guard.as_mut() {
            session.identity = identity.clone();
            if let Some(id_token) = &account.id_token {
                session.id_token = SecretString::from(id_token.clone());
            }
            if let Some(refresh_token) = &account.refresh_token {
                session.refresh_token = SecretString::from(refresh_token.clone());
            }
        }
        identity
    }

    /// Refresh token of the current session, for callers that persist it.
    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|session| session.refresh_token.clone())
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    fn subscribe(&self) -> IdentityStream {
        self.feed.subscribe()
    }

    fn current(&self) -> Option<IdentityEvent> {
        self.feed.current()
    }

    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, ProviderError> {
        let account: AccountResponse = self
            .call(
                "signInWithPassword",
                &PasswordRequest {
                    email,
                    password: password.expose_secret(),
                    return_secure_token: true,
                },
            )
            .await?;
        self.accept(&account)
    }

    #[instrument(skip(self, password))]
    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Identity, ProviderError> {
        let account: AccountResponse = self
            .call(
                "signUp",
                &PasswordRequest {
                    email,
                    password: password.expose_secret(),
                    return_secure_token: true,
                },
            )
            .await?;
        self.accept(&account)
    }

    #[instrument(skip(self, credential), fields(provider = %credential.provider))]
    async fn sign_in_with_federated_token(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Identity, ProviderError> {
        let account: AccountResponse = self
            .call(
                "signInWithIdp",
                &IdpRequest {
                    post_body: idp_post_body(credential),
                    request_uri: &self.config.idp_request_uri,
                    return_idp_credential: true,
                    return_secure_token: true,
                },
            )
            .await?;
        self.accept(&account)
    }

    #[instrument(skip(self))]
    async fn send_password_reset_email(&self, email: &str) -> Result<(), ProviderError> {
        let _: Empty = self
            .call(
                "sendOobCode",
                &OobRequest {
                    request_type: "PASSWORD_RESET",
                    email: Some(email),
                    id_token: None,
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn send_email_verification(&self) -> Result<(), ProviderError> {
        let id_token = self.id_token()?;
        let _: Empty = self
            .call(
                "sendOobCode",
                &OobRequest {
                    request_type: "VERIFY_EMAIL",
                    email: None,
                    id_token: Some(id_token.expose_secret()),
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_profile(&self, display_name: &str) -> Result<Identity, ProviderError> {
        let id_token = self.id_token()?;
        let account: AccountResponse = self
            .call(
                "update",
                &UpdateRequest {
                    id_token: id_token.expose_secret(),
                    display_name: Some(display_name),
                    password: None,
                    return_secure_token: true,
                },
            )
            .await?;
        let identity = self.refresh_from(&account);
        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    #[instrument(skip(self, new_password))]
    async fn update_password(&self, new_password: &SecretString) -> Result<(), ProviderError> {
        let id_token = self.id_token()?;
        let account: AccountResponse = self
            .call(
                "update",
                &UpdateRequest {
                    id_token: id_token.expose_secret(),
                    display_name: None,
                    password: Some(new_password.expose_secret()),
                    return_secure_token: true,
                },
            )
            .await?;
        self.refresh_from(&account);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        // Client sessions are local token pairs; dropping them revokes the session
        // for this process.
        self.store_session(None);
        self.feed.publish(None);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_current_account(&self) -> Result<(), ProviderError> {
        let id_token = self.id_token()?;
        let _: Empty = self
            .call(
                "delete",
                &IdTokenRequest {
                    id_token: id_token.expose_secret(),
                },
            )
            .await?;
        self.store_session(None);
        self.feed.publish(None);
        Ok(())
    }
}
