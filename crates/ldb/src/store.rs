//! Database handle: opener and lifecycle
//!
//! A handle owns four partitions of one fjall keyspace, one per namespace:
//! document metadata, sequence-indexed bodies, attachment reference
//! metadata, and attachment blobs. Opens are cached process-wide by path;
//! reopening a path returns the cached handle verbatim.

use crate::config::StoreConfig;
use crate::keys;
use crate::registry;
use davenport_common::{Error, Result, Rev, Seq};
use davenport_merge::Metadata;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handle to one local database. Cheap to clone; all clones share the
/// same underlying stores and writer state.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) keyspace: Keyspace,
    pub(crate) doc_store: PartitionHandle,
    pub(crate) seq_store: PartitionHandle,
    pub(crate) attach_store: PartitionHandle,
    pub(crate) attach_binary_store: PartitionHandle,
    pub(crate) writer: Mutex<WriterState>,
    pub(crate) closed: AtomicBool,
}

/// Counters owned by the single writer of this handle.
pub(crate) struct WriterState {
    pub(crate) update_seq: Seq,
    pub(crate) doc_count: u64,
}

/// Counters reported by [`Database::info`].
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    /// Counts documents ever inserted; deletions do not decrement it.
    pub doc_count: u64,
    pub update_seq: Seq,
}

/// Reference metadata stored per attachment digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AttachMetaRow {
    /// `"<docId>@<rev>" -> true` for every revision referencing the digest.
    /// Legacy rows lack the field entirely and are never migrated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) refs: Option<BTreeMap<String, bool>>,
}

/// Compaction-facing view of one attachment digest.
#[derive(Debug, Clone)]
pub struct AttachmentInfo {
    pub refs: Option<BTreeSet<String>>,
    pub has_blob: bool,
}

impl Database {
    /// Open (or reuse) the database named `name` under the configured data
    /// directory.
    pub fn open(name: &str, config: StoreConfig) -> Result<Database> {
        let path = config.data_dir.join(name);

        let mut stores = registry::stores().lock();
        if let Some(db) = stores.get(&path) {
            tracing::debug!(db = name, "reusing open database handle");
            return Ok(db.clone());
        }

        if !path.exists() {
            if !config.create_if_missing {
                return Err(Error::missing(format!("Database does not exist: {name}")));
            }
            std::fs::create_dir_all(&path)?;
        }

        let keyspace = fjall::Config::new(&path)
            .cache_size(config.block_cache_size)
            .open()?;

        let doc_store = keyspace.open_partition(
            keys::DOC_STORE,
            PartitionCreateOptions::default()
                .block_size(16 * 1024)
                .compression(config.compression),
        )?;
        let seq_store = keyspace.open_partition(
            keys::BY_SEQUENCE,
            PartitionCreateOptions::default()
                .block_size(64 * 1024)
                .compression(config.compression),
        )?;
        let attach_store = keyspace.open_partition(
            keys::ATTACH_STORE,
            PartitionCreateOptions::default()
                .block_size(16 * 1024)
                .compression(fjall::CompressionType::None),
        )?;
        // Raw bytes, content-addressed and usually incompressible.
        let attach_binary_store = keyspace.open_partition(
            keys::ATTACH_BINARY_STORE,
            PartitionCreateOptions::default()
                .block_size(64 * 1024)
                .compression(fjall::CompressionType::None),
        )?;

        let update_seq = read_counter(&seq_store, keys::UPDATE_SEQ_KEY)?;
        let doc_count = read_counter(&seq_store, keys::DOC_COUNT_KEY)?;

        let db = Database {
            inner: Arc::new(DatabaseInner {
                name: name.to_string(),
                path: path.clone(),
                config,
                keyspace,
                doc_store,
                seq_store,
                attach_store,
                attach_binary_store,
                writer: Mutex::new(WriterState {
                    update_seq,
                    doc_count,
                }),
                closed: AtomicBool::new(false),
            }),
        };
        stores.insert(path, db.clone());
        tracing::info!(db = name, update_seq, doc_count, "opened database");
        Ok(db)
    }

    /// The database name this handle was opened with.
    pub fn id(&self) -> &str {
        &self.inner.name
    }

    /// Adapter type name exposed to the outer facade.
    pub fn adapter_type(&self) -> &'static str {
        "leveldb"
    }

    /// Current counters.
    pub fn info(&self) -> DatabaseInfo {
        let writer = self.inner.writer.lock();
        DatabaseInfo {
            db_name: self.inner.name.clone(),
            doc_count: writer.doc_count,
            update_seq: writer.update_seq,
        }
    }

    /// Close this handle: deregister it and flush the keyspace. Fails with
    /// `NotOpen` when the handle was already closed.
    pub fn close(&self) -> Result<()> {
        let removed = registry::stores().lock().remove(&self.inner.path);
        if removed.is_none() {
            return Err(Error::NotOpen);
        }
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.keyspace.persist(fjall::PersistMode::SyncAll)?;
        tracing::info!(db = %self.inner.name, "closed database");
        Ok(())
    }

    /// Destroy the database named `name`: close it if open, then remove its
    /// directory. A missing directory surfaces `MissingDoc`.
    pub fn destroy(name: &str, config: &StoreConfig) -> Result<()> {
        let path = config.data_dir.join(name);
        if let Some(db) = registry::stores().lock().remove(&path) {
            db.inner.closed.store(true, Ordering::SeqCst);
            let _ = db.inner.keyspace.persist(fjall::PersistMode::SyncAll);
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(db = name, "destroyed database");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::missing(format!("Database does not exist: {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compaction primitive: drop the stored bodies of the given revisions.
    /// Metadata and attachment references are left to the caller.
    pub fn remove_doc_revisions(&self, doc_id: &str, revs: &[Rev]) -> Result<()> {
        self.check_open()?;
        if revs.is_empty() {
            return Ok(());
        }
        let metadata = self
            .read_metadata(doc_id)?
            .ok_or_else(|| Error::missing("missing"))?;
        for rev in revs {
            if let Some(&seq) = metadata.rev_map.get(&rev.to_string()) {
                self.inner.seq_store.remove(keys::seq_key(seq))?;
            }
        }
        Ok(())
    }

    /// Compaction-facing probe of one attachment digest.
    pub fn attachment_info(&self, digest: &str) -> Result<Option<AttachmentInfo>> {
        self.check_open()?;
        let Some(bytes) = self.inner.attach_store.get(digest.as_bytes())? else {
            return Ok(None);
        };
        let row: AttachMetaRow = serde_json::from_slice(&bytes)?;
        let has_blob = self
            .inner
            .attach_binary_store
            .get(digest.as_bytes())?
            .is_some();
        Ok(Some(AttachmentInfo {
            refs: row.refs.map(|refs| refs.into_keys().collect()),
            has_blob,
        }))
    }

    /// Every operation that touches the stores goes through this gate:
    /// once a handle is closed, surviving clones must not read or write
    /// the dropped-from-registry keyspace, or a reopen of the same path
    /// would leave two live engines over one directory.
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    pub(crate) fn read_metadata(&self, doc_id: &str) -> Result<Option<Metadata>> {
        match self.inner.doc_store.get(doc_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn read_body(&self, seq: Seq) -> Result<Map<String, Value>> {
        let bytes = self
            .inner
            .seq_store
            .get(keys::seq_key(seq))?
            .ok_or_else(|| Error::missing("missing"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        // Ensure data is persisted on drop
        let _ = self.keyspace.persist(fjall::PersistMode::SyncAll);
    }
}

fn read_counter(seq_store: &PartitionHandle, key: &[u8]) -> Result<u64> {
    match seq_store.get(key)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(0),
    }
}
