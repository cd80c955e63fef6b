//! Authentication module for the BookTrack server
//!
//! This module handles token issuance and verification, the refresh token
//! ledger with rotation and reuse detection, cookie transport, and the
//! authorization gate.

pub mod cookie;
pub mod extract;
pub mod federated;
pub mod handlers;
pub mod ledger;
pub mod service;
pub mod token;

pub use extract::{require_role, AdminUser, AuthenticatedUser, MaybeUser};
pub use ledger::{ClientMeta, IssuedRefreshToken, RefreshTokenLedger, Rotation};
pub use service::{AuthService, AuthSession, RefreshedSession};
pub use token::{AccessClaims, AccessTokenSigner, RefreshTokenCodec, VerifiedAccess};
