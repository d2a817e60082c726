//! presenz-store — SQLite persistence for identities and attendance.
//!
//! Stored encodings are biometric data and are sealed with AES-256-GCM
//! before they touch disk. All access goes through [`Store`], an async
//! wrapper over a single background SQLite connection.

pub mod crypto;
mod store;

pub use crypto::{CryptoError, SealingKey};
pub use store::{IdentitySummary, NewIdentity, Store, StoreCounts, StoreError};
