//! Route handlers for the reader API.

pub mod auth;
pub mod catalog;
pub mod health;
pub mod me;
