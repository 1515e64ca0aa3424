//! Maps validated CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_CORS_ORIGIN, ARG_PORT, identity, store};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let cors_origin = matches
        .get_one::<String>(ARG_CORS_ORIGIN)
        .cloned()
        .filter(|origin| !origin.trim().is_empty());

    let identity = identity::Options::parse(matches)?;
    let store = store::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        cors_origin,
        identity,
        store,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("DEFYBLOG_IDENTITY_PROVIDER", None::<&str>),
                ("DEFYBLOG_FIREBASE_API_KEY", None::<&str>),
                ("DEFYBLOG_FIREBASE_REFRESH_TOKEN", None::<&str>),
                ("DEFYBLOG_STORE", None::<&str>),
                ("DEFYBLOG_DSN", None::<&str>),
                ("DEFYBLOG_PORT", None::<&str>),
                ("DEFYBLOG_CORS_ORIGIN", None::<&str>),
            ],
            f,
        );
    }

    #[test]
    fn defaults_to_memory_backends() {
        cleared(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec!["defyblog"]);
            let result = handler(&matches);
            assert!(matches!(
                result,
                Ok(Action::Server(Args {
                    port: 8080,
                    cors_origin: None,
                    identity: identity::Options::Memory,
                    store: store::Options::Memory,
                }))
            ));
        });
    }

    #[test]
    fn firebase_api_key_required() {
        cleared(|| {
            let matches = crate::cli::commands::new()
                .get_matches_from(vec!["defyblog", "--identity-provider", "firebase"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("missing required argument: --firebase-api-key")
                );
            }
        });
    }

    #[test]
    fn postgres_dsn_required() {
        cleared(|| {
            let matches =
                crate::cli::commands::new().get_matches_from(vec!["defyblog", "--store", "postgres"]);
            let result = handler(&matches);
            assert!(
                result
                    .err()
                    .is_some_and(|err| err.to_string().contains("--dsn"))
            );
        });
    }

    #[test]
    fn firebase_from_env() {
        temp_env::with_vars(
            [
                ("DEFYBLOG_IDENTITY_PROVIDER", Some("firebase")),
                ("DEFYBLOG_FIREBASE_API_KEY", Some("api-key")),
                (
                    "DEFYBLOG_FIREBASE_IDENTITY_TOOLKIT_URL",
                    Some("http://127.0.0.1:9099/identitytoolkit.googleapis.com/v1/"),
                ),
                ("DEFYBLOG_FIREBASE_REFRESH_TOKEN", Some("refresh")),
                ("DEFYBLOG_STORE", Some("postgres")),
                ("DEFYBLOG_DSN", Some("postgres://localhost/defyblog")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["defyblog"]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected server action");
                };
                let identity::Options::Firebase {
                    config,
                    refresh_token,
                } = args.identity
                else {
                    panic!("expected firebase provider");
                };
                assert_eq!(
                    config.identity_toolkit_url(),
                    "http://127.0.0.1:9099/identitytoolkit.googleapis.com/v1"
                );
                assert!(refresh_token.is_some());
                assert_eq!(
                    args.store,
                    store::Options::Postgres {
                        dsn: "postgres://localhost/defyblog".to_string()
                    }
                );
            },
        );
    }
}
