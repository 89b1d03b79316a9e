//! # campus-id
//!
//! Stable ID types, parsing, and validation for the campus events registrar.
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `evt_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `usr_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! The prefix keeps the ID types from being mixed up at API boundaries, and
//! the ULID keeps them sortable by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

/// Splits `{prefix}_{ulid}` and checks the prefix.
///
/// Shared by every type generated with [`define_id!`].
pub fn parse_prefixed(s: &str, expected: &'static str) -> Result<Ulid, IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }

    let Some((prefix, ulid_str)) = s.split_once('_') else {
        return Err(IdError::MissingSeparator);
    };

    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_string(),
        });
    }

    ulid_str
        .parse::<Ulid>()
        .map_err(|e| IdError::InvalidUlid(e.to_string()))
}
