//! Swap back-ends for virtualized blocks.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use pagefill_core::VirtualizationError;
use parking_lot::Mutex;

/// Storage for serialized blocks, keyed by the store.
pub trait SwapSpace: Send + Sync {
    /// Store `data` under `key`, replacing an existing block.
    fn write(&self, key: u64, data: Bytes) -> Result<(), VirtualizationError>;

    /// Load the block stored under `key`.
    fn read(&self, key: u64) -> Result<Bytes, VirtualizationError>;

    /// Drop the block stored under `key`. Unknown keys are ignored.
    fn remove(&self, key: u64) -> Result<(), VirtualizationError>;

    /// Number of blocks held.
    fn block_count(&self) -> usize;
}

/// Swap space keeping serialized blocks in memory.
#[derive(Debug, Default)]
pub struct MemorySwap {
    blocks: Mutex<HashMap<u64, Bytes>>,
}

impl MemorySwap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SwapSpace for MemorySwap {
    fn write(&self, key: u64, data: Bytes) -> Result<(), VirtualizationError> {
        self.blocks.lock().insert(key, data);
        Ok(())
    }

    fn read(&self, key: u64) -> Result<Bytes, VirtualizationError> {
        self.blocks
            .lock()
            .get(&key)
            .cloned()
            .ok_or(VirtualizationError::MissingBlock { key })
    }

    fn remove(&self, key: u64) -> Result<(), VirtualizationError> {
        self.blocks.lock().remove(&key);
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

/// Swap space writing one file per block into a directory.
#[derive(Debug)]
pub struct FileSwap {
    dir: PathBuf,
    blocks: Mutex<HashMap<u64, PathBuf>>,
    // Keeps a temporary directory alive until the swap is dropped.
    _temp: Option<tempfile::TempDir>,
}

impl FileSwap {
    /// Use `dir` for block files, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, VirtualizationError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| VirtualizationError::io(&dir, source))?;
        Ok(Self {
            dir,
            blocks: Mutex::new(HashMap::new()),
            _temp: None,
        })
    }

    /// Use a fresh temporary directory, deleted when the swap is dropped.
    pub fn temporary() -> Result<Self, VirtualizationError> {
        let temp = tempfile::Builder::new()
            .prefix("pagefill-swap")
            .tempdir()
            .map_err(|source| VirtualizationError::io(std::env::temp_dir(), source))?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            blocks: Mutex::new(HashMap::new()),
            _temp: Some(temp),
        })
    }

    /// Directory holding the block files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn block_path(&self, key: u64) -> PathBuf {
        self.dir.join(format!("block_{key}.bin"))
    }
}

impl SwapSpace for FileSwap {
    fn write(&self, key: u64, data: Bytes) -> Result<(), VirtualizationError> {
        let path = self.block_path(key);
        fs::write(&path, &data).map_err(|source| VirtualizationError::io(&path, source))?;
        self.blocks.lock().insert(key, path);
        Ok(())
    }

    fn read(&self, key: u64) -> Result<Bytes, VirtualizationError> {
        let path = self
            .blocks
            .lock()
            .get(&key)
            .cloned()
            .ok_or(VirtualizationError::MissingBlock { key })?;
        let data = fs::read(&path).map_err(|source| VirtualizationError::io(&path, source))?;
        Ok(Bytes::from(data))
    }

    fn remove(&self, key: u64) -> Result<(), VirtualizationError> {
        let Some(path) = self.blocks.lock().remove(&key) else {
            return Ok(());
        };
        fs::remove_file(&path).map_err(|source| VirtualizationError::io(&path, source))
    }

    fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}
