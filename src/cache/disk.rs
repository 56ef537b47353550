//! The on-disk response store.
//!
//! Responses live as one file per key in a single directory, named by the
//! decimal key. Writes go to a `.tmp` file first and become visible to
//! loads only after a full write, fsync and atomic rename, so a crash can
//! never expose a torn response. A background sweeper evicts files by age
//! and by total size.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Storage, StorageError};
use crate::Error;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_SIZE: u64 = 1 << 30;
const DEFAULT_SWEEP_EVERY: Duration = Duration::from_secs(5 * 60);

/// An indexed file.
#[derive(Debug, Clone)]
struct FileMeta {
    key: u64,
    path: PathBuf,
    size: u64,
    mtime: SystemTime,
}

type Index = Arc<RwLock<HashMap<u64, FileMeta>>>;

/// Configures and opens a [`DiskStore`].
#[derive(Debug)]
pub struct DiskStoreBuilder {
    root: PathBuf,
    max_age: Duration,
    max_size: u64,
    sweep_every: Duration,
    compress: bool,
}

impl DiskStoreBuilder {
    /// Sets the age past which the sweeper removes a file.
    ///
    /// Zero disables age-based eviction. Defaults to 24 hours.
    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }

    /// Sets the total size the sweeper keeps the store under.
    ///
    /// Zero disables size-based eviction. Defaults to 1 GiB.
    pub fn max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Sets how often the sweeper runs.
    ///
    /// Zero disables the sweeper entirely, the store may then grow without
    /// bound. Defaults to 5 minutes.
    pub fn sweep_every(mut self, every: Duration) -> Self {
        self.sweep_every = every;
        self
    }

    /// Compresses stored responses with snappy.
    ///
    /// A store with compression enabled cannot load files written without
    /// it, and vice versa; the two configurations are not interchangeable
    /// over the same directory.
    pub fn compress(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Opens the store, spawning the warmup scan and the sweeper.
    ///
    /// The root directory must already exist. It is up to the caller to
    /// ensure no other process mutates it, the store does no filesystem
    /// level locking.
    pub async fn open(self) -> Result<DiskStore, StorageError> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                path: self.root.clone(),
                source,
            })?;

        if !meta.is_dir() {
            return Err(StorageError::NotADirectory { path: self.root });
        }

        let index: Index = Arc::new(RwLock::new(HashMap::new()));
        let (warm_tx, warm_rx) = watch::channel(false);
        let stop = CancellationToken::new();

        tokio::spawn(warmup(self.root.clone(), Arc::clone(&index), warm_tx));

        if !self.sweep_every.is_zero() {
            tokio::spawn(sweeper(
                Arc::clone(&index),
                self.sweep_every,
                self.max_age,
                self.max_size,
                stop.clone(),
            ));
        }

        tracing::debug!(root = %self.root.display(), "opened disk store");

        Ok(DiskStore {
            root: self.root,
            compress: self.compress,
            index,
            warm: warm_rx,
            stop,
            seq: AtomicU64::new(0),
        })
    }
}

/// Crash-safe content-addressed file storage.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    compress: bool,
    index: Index,
    warm: watch::Receiver<bool>,
    stop: CancellationToken,
    seq: AtomicU64,
}

impl DiskStore {
    /// Returns a builder rooted at `root`.
    pub fn builder(root: impl Into<PathBuf>) -> DiskStoreBuilder {
        DiskStoreBuilder {
            root: root.into(),
            max_age: DEFAULT_MAX_AGE,
            max_size: DEFAULT_MAX_SIZE,
            sweep_every: DEFAULT_SWEEP_EVERY,
            compress: false,
        }
    }

    /// Opens a store with the default configuration.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::builder(root).open().await
    }

    /// Blocks until the warmup scan has indexed every file on disk.
    ///
    /// Loads issued before warmup completes may miss entries written by a
    /// previous run.
    pub async fn wait(&self, token: &CancellationToken) -> Result<(), Error> {
        let mut warm = self.warm.clone();

        if *warm.borrow() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            ret = warm.wait_for(|warm| *warm) => {
                ret.ok();
                Ok(())
            }
        }
    }

    /// Returns the number of indexed files.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io { path, source }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[async_trait]
impl Storage for DiskStore {
    async fn store(&self, key: u64, value: Bytes) -> Result<(), StorageError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.root.join(format!("{}-{}.tmp", key, seq));

        let data = if self.compress {
            snap::raw::Encoder::new()
                .compress_vec(&value)
                .map_err(|source| StorageError::Compress {
                    path: tmp.clone(),
                    source,
                })?
        } else {
            value.to_vec()
        };

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io { path: tmp, source });
        }

        let path = self.root.join(key.to_string());

        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io { path: tmp, source });
        }

        // Persist the rename itself.
        let dir = tokio::fs::File::open(&self.root)
            .await
            .map_err(io_error(&self.root))?;
        dir.sync_all().await.map_err(io_error(&self.root))?;

        let mtime = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .unwrap_or_else(SystemTime::now);

        self.index.write().insert(
            key,
            FileMeta {
                key,
                path,
                size: data.len() as u64,
                mtime,
            },
        );

        tracing::debug!(key, "store");
        Ok(())
    }

    async fn load(&self, key: u64) -> Result<Option<Bytes>, StorageError> {
        let Some(path) = self.index.read().get(&key).map(|meta| meta.path.clone()) else {
            return Ok(None);
        };

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            // The sweeper may have removed the file since the index
            // lookup.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        tracing::debug!(key, "load");

        if self.compress {
            let data = snap::raw::Decoder::new()
                .decompress_vec(&data)
                .map_err(|source| StorageError::Compress { path, source })?;
            return Ok(Some(Bytes::from(data)));
        }

        Ok(Some(Bytes::from(data)))
    }
}

/// Indexes every file already present in the root directory.
///
/// Filenames must be decimal keys; in-flight `.tmp` files are skipped and
/// anything else is logged and ignored.
async fn warmup(root: PathBuf, index: Index, warm: watch::Sender<bool>) {
    let mut files = Vec::new();

    match tokio::fs::read_dir(&root).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };

                if name.ends_with(".tmp") {
                    continue;
                }

                let Ok(key) = name.parse::<u64>() else {
                    tracing::warn!(name, "invalid disk store entry");
                    continue;
                };

                let Ok(meta) = entry.metadata().await else {
                    tracing::warn!(name, "cannot stat disk store entry");
                    continue;
                };

                files.push(FileMeta {
                    key,
                    path: root.join(name),
                    size: meta.len(),
                    mtime: meta.modified().unwrap_or_else(|_| SystemTime::now()),
                });
            }
        }
        Err(err) => tracing::warn!(root = %root.display(), error = %err, "disk store warmup"),
    }

    let found = files.len();
    let mut index = index.write();
    for file in files {
        index.entry(file.key).or_insert(file);
    }
    drop(index);

    tracing::debug!(found, "disk store warm");
    let _ = warm.send(true);
}

/// Periodically evicts expired and excess files.
async fn sweeper(
    index: Index,
    every: Duration,
    max_age: Duration,
    max_size: u64,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // The first tick fires immediately.

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let files = index.read().values().cloned().collect();
        let doomed = sweep_plan(files, SystemTime::now(), max_age, max_size);

        if doomed.is_empty() {
            continue;
        }

        let mut removed = 0;
        let mut index = index.write();

        for file in doomed {
            if !index.contains_key(&file.key) {
                continue;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    index.remove(&file.key);
                    removed += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %file.path.display(), error = %err, "disk store remove");
                }
            }
        }

        drop(index);

        if removed > 0 {
            tracing::debug!(removed, "removed expired pages");
        }
    }
}

/// Picks the files to remove.
///
/// Files are considered oldest first; a file is doomed when it is past
/// `max_age` or when keeping it would push the cumulative size over
/// `max_size`. A zero limit disables the corresponding rule.
fn sweep_plan(
    mut files: Vec<FileMeta>,
    now: SystemTime,
    max_age: Duration,
    max_size: u64,
) -> Vec<FileMeta> {
    files.sort_by_key(|file| file.mtime);

    let mut doomed = Vec::new();
    let mut sum = 0u64;

    for file in files {
        let mut doom = false;

        if !max_age.is_zero() {
            let age = now.duration_since(file.mtime).unwrap_or_default();
            doom = age > max_age;
        }

        if max_size > 0 {
            sum += file.size;
            if sum > max_size {
                sum -= file.size;
                doom = true;
            }
        }

        if doom {
            doomed.push(file);
        }
    }

    doomed
}
