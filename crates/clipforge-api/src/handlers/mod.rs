//! Request handlers.

pub mod artifacts;
pub mod events;
pub mod health;
pub mod jobs;
pub mod upload;

pub use health::{health, ready};
