use clap::{Arg, ArgMatches, Command, builder::PossibleValuesParser};
use secrecy::SecretString;
use std::time::Duration;

use crate::identity::firebase::FirebaseConfig;

pub const ARG_IDENTITY_PROVIDER: &str = "identity-provider";
pub const ARG_FIREBASE_API_KEY: &str = "firebase-api-key";
pub const ARG_FIREBASE_IDENTITY_TOOLKIT_URL: &str = "firebase-identity-toolkit-url";
pub const ARG_FIREBASE_SECURE_TOKEN_URL: &str = "firebase-secure-token-url";
pub const ARG_FIREBASE_IDP_REQUEST_URI: &str = "firebase-idp-request-uri";
pub const ARG_FIREBASE_REFRESH_TOKEN: &str = "firebase-refresh-token";
pub const ARG_FIREBASE_TIMEOUT_SECONDS: &str = "firebase-timeout-seconds";

#[derive(Debug, Clone)]
pub enum Options {
    /// In-process accounts, lost on restart.
    Memory,
    Firebase {
        config: FirebaseConfig,
        refresh_token: Option<SecretString>,
    },
}

impl Options {
    /// Parse identity provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the Firebase provider is selected without an API key.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap passes env vars set to "" through as values
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let provider = get_non_empty(ARG_IDENTITY_PROVIDER).unwrap_or_else(|| "memory".into());
        if provider != "firebase" {
            return Ok(Self::Memory);
        }

        let Some(api_key) = get_non_empty(ARG_FIREBASE_API_KEY) else {
            anyhow::bail!(
                "missing required argument: --{ARG_FIREBASE_API_KEY} (required for the firebase provider)"
            );
        };

        let mut config = FirebaseConfig::new(SecretString::from(api_key));
        if let Some(url) = get_non_empty(ARG_FIREBASE_IDENTITY_TOOLKIT_URL) {
            config = config.with_identity_toolkit_url(url);
        }
        if let Some(url) = get_non_empty(ARG_FIREBASE_SECURE_TOKEN_URL) {
            config = config.with_secure_token_url(url);
        }
        if let Some(uri) = get_non_empty(ARG_FIREBASE_IDP_REQUEST_URI) {
            config = config.with_idp_request_uri(uri);
        }
        if let Some(seconds) = matches.get_one::<u64>(ARG_FIREBASE_TIMEOUT_SECONDS) {
            config = config.with_timeout(Duration::from_secs(*seconds));
        }

        Ok(Self::Firebase {
            config,
            refresh_token: get_non_empty(ARG_FIREBASE_REFRESH_TOKEN).map(SecretString::from),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IDENTITY_PROVIDER)
                .long(ARG_IDENTITY_PROVIDER)
                .help("Identity provider backend")
                .env("DEFYBLOG_IDENTITY_PROVIDER")
                .default_value("memory")
                .value_parser(PossibleValuesParser::new(["memory", "firebase"])),
        )
        .arg(
            Arg::new(ARG_FIREBASE_API_KEY)
                .long(ARG_FIREBASE_API_KEY)
                .help("Firebase Web API key")
                .env("DEFYBLOG_FIREBASE_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FIREBASE_IDENTITY_TOOLKIT_URL)
                .long(ARG_FIREBASE_IDENTITY_TOOLKIT_URL)
                .help("Identity Toolkit base URL (override for the auth emulator)")
                .env("DEFYBLOG_FIREBASE_IDENTITY_TOOLKIT_URL"),
        )
        .arg(
            Arg::new(ARG_FIREBASE_SECURE_TOKEN_URL)
                .long(ARG_FIREBASE_SECURE_TOKEN_URL)
                .help("Secure token base URL (override for the auth emulator)")
                .env("DEFYBLOG_FIREBASE_SECURE_TOKEN_URL"),
        )
        .arg(
            Arg::new(ARG_FIREBASE_IDP_REQUEST_URI)
                .long(ARG_FIREBASE_IDP_REQUEST_URI)
                .help("Request URI sent with federated sign-in")
                .env("DEFYBLOG_FIREBASE_IDP_REQUEST_URI"),
        )
        .arg(
            Arg::new(ARG_FIREBASE_REFRESH_TOKEN)
                .long(ARG_FIREBASE_REFRESH_TOKEN)
                .help("Refresh token used to restore the previous session at startup")
                .env("DEFYBLOG_FIREBASE_REFRESH_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FIREBASE_TIMEOUT_SECONDS)
                .long(ARG_FIREBASE_TIMEOUT_SECONDS)
                .help("Timeout for identity provider requests in seconds")
                .env("DEFYBLOG_FIREBASE_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
