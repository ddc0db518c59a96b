//! Client for the AutoScaler central-management API.

pub mod client;
pub mod error;

pub use client::{ApiClient, UnauthorizedHook};
pub use error::ApiError;
