//! Common types for the davenport document store
//!
//! This crate defines:
//! - The error taxonomy shared by every layer (404/409/412/400/500 classes)
//! - Revision identifiers (`"<generation>-<hash>"`)
//! - The database-global sequence number type
//! - Base64 helpers for attachment payloads
//! - The local-document id predicate

mod base64;
mod docid;
mod error;
mod rev;

pub use self::base64::{from_base64, to_base64};
pub use docid::{is_local_id, LOCAL_PREFIX};
pub use error::{Error, Result};
pub use rev::Rev;

/// Database-global sequence number, assigned per write, strictly increasing.
pub type Seq = u64;
