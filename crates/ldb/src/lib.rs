//! Local persistent document adapter
//!
//! Stores JSON documents with multi-version revision histories,
//! deduplicated binary attachments, an append-only sequence log, and a live
//! change feed on top of an ordered key-value engine (fjall). Each database
//! is one keyspace holding four partitions:
//!
//! - `document-store`: docId -> metadata (revision tree, rev -> seq map)
//! - `by-sequence`: seq -> immutable document body (plus counter sentinels)
//! - `attach-store`: digest -> reference metadata
//! - `attach-binary-store`: digest -> raw bytes
//!
//! Handles are cached process-wide by path; each handle serializes its
//! writes behind one writer lock while reads go straight to the engine.

pub mod changes;
pub mod config;
mod keys;
pub mod read;
mod registry;
pub mod store;
pub mod write;

pub use changes::{
    ChangeRev, ChangeRow, ChangesHandle, ChangesOptions, ChangesResponse, FilterSpec,
};
pub use config::StoreConfig;
pub use read::{AllDocsOptions, AllDocsResponse, AllDocsRow, AttachmentData, DocRef, GetOptions};
pub use store::{AttachmentInfo, Database, DatabaseInfo};
pub use write::{BulkDocsOptions, BulkDocsResult};

pub use davenport_common::{Error, Result, Rev, Seq};

/// Names under which the outer facade resolves this adapter.
pub const ADAPTER_NAMES: [&str; 2] = ["ldb", "leveldb"];

/// Type alias for the KV iterator
pub(crate) type StoreIter<'a> =
    Box<dyn Iterator<Item = std::result::Result<(fjall::Slice, fjall::Slice), fjall::Error>> + 'a>;
