//! # Defy.Blog reader backend
//!
//! `defyblog` holds the authentication session of a blog-reading client and
//! the profile documents that hang off it.
//!
//! ## Session Model
//!
//! A single [`session::SessionManager`] per process derives its state
//! (`loading`, `unauthenticated`, `authenticated`) from the identity provider's
//! change stream. Notifications carry a sequence number; anything at or below
//! the last applied sequence is dropped, so a sign-in notification that lands
//! after a sign-out cannot resurrect the session.
//!
//! ## Credential Rules
//!
//! Emails, passwords and display names are checked locally by
//! [`session::validator`] before any provider call. Registration reports every
//! failed rule at once.
//!
//! ## Storage
//!
//! Profiles, reading progress and the read-only catalog are JSON documents
//! behind [`store::DocumentStore`], backed by memory or a Postgres `JSONB`
//! table. Profile bootstrap is an atomic create-if-absent.

pub mod api;
pub mod catalog;
pub mod cli;
pub mod identity;
pub mod profile;
pub mod session;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
