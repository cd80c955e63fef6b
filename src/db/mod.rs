//! Database module for the BookTrack server
//!
//! This module holds the data model for the authentication core and the
//! store traits with their Postgres and in-memory implementations.

pub mod memory;
pub mod models;
pub mod store;

pub use memory::MemoryStore;
pub use models::{AdminAction, Provider, PublicUser, RefreshTokenRecord, RevocationReason, Role, User};
pub use store::{AuditStore, CredentialStore, PgStore, RefreshTokenStore, Store};
