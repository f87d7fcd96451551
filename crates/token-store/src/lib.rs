//! Durable credential storage
//!
//! A single SQLite file holds issued OAuth credentials in a `tokens` table.
//! Schema changes are expressed as an ordered list of migrations; a
//! `migrations` ledger table records which indices have been applied so that
//! opening the same file repeatedly applies each migration exactly once.
//!
//! Credential lifecycle:
//! 1. Callback handler calls `TokenStore::insert()` after a successful exchange
//! 2. Readers call `TokenStore::get()` and receive an owned copy
//! 3. `TokenStore::update()` replaces token material for an existing id
//! 4. `TokenStore::delete()` removes it (idempotent)

pub mod error;
mod migrations;
pub mod store;

pub use error::{Error, Result};
pub use store::{Credential, TokenStore};
