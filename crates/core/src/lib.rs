//! `keyward-core` — shared authentication primitives.
//!
//! This crate contains no IO: error taxonomy, identifiers, time source and
//! configuration only.

pub mod clock;
pub mod config;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, BackendKind, ConfigError, MAX_LIFETIME_SECS};
pub use error::{AuthError, AuthResult};
pub use id::{TokenId, TokenType, Username};
