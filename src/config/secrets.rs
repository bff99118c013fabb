//! Secret handling re-exports, so callers can expose the broker URL without
//! depending on secrecy directly.

pub use secrecy::{ExposeSecret, SecretString};
