//! # Courier Core
//!
//! Shared domain model for the courier notification delivery service:
//! typed ids, the event envelope, delivery records and their failure
//! taxonomy, templates, credentials, branding, chat entities, and the
//! token-verification and secret-cipher contracts.

pub mod crypto;
pub mod error;
pub mod jwt;
pub mod models;

pub use crypto::{PlainCipher, SecretCipher};
pub use error::{CoreError, FailureReason};
pub use jwt::{AccessClaims, TokenManager, TokenVerifier};
pub use models::*;
