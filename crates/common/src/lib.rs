//! Types shared by the auth webapp crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
