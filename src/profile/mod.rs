//! User profile documents and reading progress.

pub mod models;
mod service;

pub use models::{ReadingProgress, UserProfile};
pub use service::{ProfileError, ProfileService};
