//! Store configuration

use std::path::PathBuf;

/// Configuration for a database handle.
#[derive(Clone)]
pub struct StoreConfig {
    /// Directory under which each database gets its own directory.
    pub data_dir: PathBuf,

    /// Create the database directory when it does not exist yet.
    pub create_if_missing: bool,

    /// Block cache size for the KV engine (in bytes).
    pub block_cache_size: u64,

    /// Compression for the document and sequence stores.
    pub compression: fjall::CompressionType,

    /// Persist mode applied after each bulk write.
    pub persist_mode: fjall::PersistMode,

    /// Maximum revision-tree depth retained per document.
    pub revs_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        // An anonymous store root, kept on disk so handles can be closed
        // and reopened against it within one process lifetime. Real
        // deployments set data_dir explicitly.
        let data_dir = tempfile::tempdir()
            .expect("Failed to create temporary store root")
            .keep();

        Self {
            data_dir,
            create_if_missing: true,
            // Metadata rows are small but re-read on every get and on
            // every change-feed join; 32 MB keeps hot documents cached.
            block_cache_size: 32 * 1024 * 1024,
            // JSON bodies compress well; attachment blobs opt out of
            // compression per-partition regardless of this setting.
            compression: fjall::CompressionType::Lz4,
            // Change events fire once rows are in the engine; buffered
            // persistence matches that contract without an fsync per batch.
            persist_mode: fjall::PersistMode::Buffer,
            revs_limit: 1000,
        }
    }
}

impl StoreConfig {
    /// Create a new config rooted at the given data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Set block cache size
    pub fn with_block_cache_size(mut self, size: u64) -> Self {
        self.block_cache_size = size;
        self
    }

    /// Set compression type
    pub fn with_compression(mut self, compression: fjall::CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Set persist mode
    pub fn with_persist_mode(mut self, mode: fjall::PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }

    /// Set the retained revision-tree depth
    pub fn with_revs_limit(mut self, limit: usize) -> Self {
        self.revs_limit = limit;
        self
    }

    /// Refuse to create missing databases
    pub fn without_create(mut self) -> Self {
        self.create_if_missing = false;
        self
    }
}
