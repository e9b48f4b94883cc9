//! Identity Module
//!
//! Enthält:
//! - Identität der Sitzung (userId, Token, Anzeigename)
//! - Persistenz von Token und Login-Identifier

pub mod store;

pub use store::{subject_from_token, Identity, IdentityError, IdentityStore};
