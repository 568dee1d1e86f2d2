//! On-demand thumbnail cache.
//!
//! A single actor task owns the entry table. Request handlers send a [`CacheKey`] together with
//! a one-shot reply channel and wait for the answer, so the table itself needs no locking and at
//! most one generation per key is ever in flight. Generations run on the blocking pool, bounded by
//! a semaphore, and write through a temporary file that is atomically renamed into place.
//!
//! Ready entries live in a bounded in-memory LRU index. The files themselves stay on disk, so an
//! entry that falls out of the index (or was produced by a previous process) is picked up again
//! without re-encoding.
//!
//! When a source changes, the thumbnail of its previous version is deleted only if that version
//! is still in the index. Files of versions that were evicted first, or that belong to a previous
//! process, stay in the cache directory until removed externally.

mod identity;
mod transcode;

pub use identity::{IdentityStore, Sha256Identity};
pub use transcode::{JpegTranscoder, Transcoder};

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use lru::LruCache;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::ThumbnailConfig;
use crate::metrics::Metrics;
use identity::thumb_path;

/// Extensions eligible for thumbnailing (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

const REQUEST_QUEUE: usize = 1024;

/// Returns true when the file extension is on the thumbnail allow-list.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Identity of a requested thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Modification time and length of a source file, used to detect stale thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceStamp {
    pub modified: SystemTime,
    pub len: u64,
}

impl SourceStamp {
    pub fn of(path: &Path) -> io::Result<Self> {
        let md = fs::metadata(path)?;
        Ok(Self { modified: md.modified()?, len: md.len() })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("generation task failed: {0}")]
    Task(String),
}

/// Runtime settings of the cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub dir: PathBuf,
    /// Stat the source on every lookup and regenerate when it changed.
    pub revalidate: bool,
    pub index_capacity: usize,
    pub max_parallel: usize,
}

impl CacheOptions {
    pub fn from_config(cfg: &ThumbnailConfig) -> Self {
        Self {
            dir: cfg.cache_dir(),
            revalidate: cfg.revalidate,
            index_capacity: cfg.index_capacity,
            max_parallel: cfg.parallelism(),
        }
    }
}

struct Request {
    key: CacheKey,
    stamp: Option<SourceStamp>,
    reply: oneshot::Sender<Option<PathBuf>>,
}

struct ReadyEntry {
    path: PathBuf,
    stamp: Option<SourceStamp>,
}

struct Pending {
    stamp: Option<SourceStamp>,
    waiters: Vec<oneshot::Sender<Option<PathBuf>>>,
    /// Requests that saw a different source stamp; replayed once this generation settles.
    deferred: Vec<Request>,
}

enum Generated {
    Encoded(PathBuf),
    Reused(PathBuf),
}

/// Handle to the thumbnail cache. Cheap to clone; all clones talk to the same actor.
#[derive(Clone)]
pub struct ThumbnailCache {
    tx: mpsc::Sender<Request>,
    identity: Arc<dyn IdentityStore>,
    dir: PathBuf,
    revalidate: bool,
}

impl ThumbnailCache {
    /// Creates the cache directory and spawns the owning actor on the current runtime.
    pub fn start(
        options: CacheOptions,
        transcoder: Arc<dyn Transcoder>,
        identity: Arc<dyn IdentityStore>,
        metrics: Metrics,
    ) -> io::Result<Self> {
        fs::create_dir_all(&options.dir)?;

        let capacity = NonZeroUsize::new(options.index_capacity).unwrap_or(NonZeroUsize::MIN);
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let actor = CacheActor {
            rx,
            ready: LruCache::new(capacity),
            pending: HashMap::new(),
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(options.max_parallel.max(1))),
            transcoder,
            identity: identity.clone(),
            dir: options.dir.clone(),
            metrics,
        };
        tokio::spawn(actor.run());

        Ok(Self { tx, identity, dir: options.dir, revalidate: options.revalidate })
    }

    /// Returns the path of a `width` x `height` thumbnail of `source`, generating it if needed.
    ///
    /// `None` means no thumbnail is available (unsupported format, unreadable source, encode
    /// failure); callers should serve the original instead.
    pub async fn get(&self, source: &Path, width: u32, height: u32) -> Option<PathBuf> {
        let (key, stamp) = self.prepare(source, width, height)?;
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request { key, stamp, reply }).await.is_err() {
            warn!("thumbnail cache is not running");
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Blocking variant of [`ThumbnailCache::get`] for threads outside the async runtime.
    ///
    /// Panics if called from within an async context, like `blocking_send`.
    pub fn get_blocking(&self, source: &Path, width: u32, height: u32) -> Option<PathBuf> {
        let (key, stamp) = self.prepare(source, width, height)?;
        let (reply, rx) = oneshot::channel();
        if self.tx.blocking_send(Request { key, stamp, reply }).is_err() {
            warn!("thumbnail cache is not running");
            return None;
        }
        rx.blocking_recv().ok().flatten()
    }

    /// Where the thumbnail for `key` lives (or would live) on disk.
    pub fn cache_path(&self, key: &CacheKey, stamp: Option<&SourceStamp>) -> PathBuf {
        thumb_path(&self.dir, self.identity.as_ref(), key, stamp)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prepare(&self, source: &Path, width: u32, height: u32) -> Option<(CacheKey, Option<SourceStamp>)> {
        if !is_supported(source) {
            debug!("not thumbnailing unsupported file {}", source.display());
            return None;
        }
        if width == 0 || height == 0 {
            return None;
        }
        let stamp = if self.revalidate {
            match SourceStamp::of(source) {
                Ok(stamp) => Some(stamp),
                Err(e) => {
                    debug!("cannot stat {}: {}", source.display(), e);
                    return None;
                }
            }
        } else {
            None
        };
        Some((CacheKey { source: source.to_path_buf(), width, height }, stamp))
    }
}

struct CacheActor {
    rx: mpsc::Receiver<Request>,
    ready: LruCache<CacheKey, ReadyEntry>,
    pending: HashMap<CacheKey, Pending>,
    tasks: JoinSet<(CacheKey, Result<Generated, ThumbError>)>,
    permits: Arc<Semaphore>,
    transcoder: Arc<dyn Transcoder>,
    identity: Arc<dyn IdentityStore>,
    dir: PathBuf,
    metrics: Metrics,
}

impl CacheActor {
    async fn run(mut self) {
        let mut open = true;
        loop {
            tokio::select! {
                req = self.rx.recv(), if open => match req {
                    Some(req) => self.handle(req),
                    None => open = false,
                },
                Some(joined) = self.tasks.join_next() => match joined {
                    Ok((key, outcome)) => self.complete(key, outcome),
                    Err(e) => tracing::error!("thumbnail task aborted: {}", e),
                },
                else => break,
            }
        }
        debug!("thumbnail cache stopped");
    }

    fn handle(&mut self, req: Request) {
        let Request { key, stamp, reply } = req;

        let mut stale = None;
        if let Some(entry) = self.ready.get(&key) {
            if entry.stamp == stamp {
                self.metrics.inc_thumbs_memory_hits();
                let _ = reply.send(Some(entry.path.clone()));
                return;
            }
            stale = Some(entry.path.clone());
        }

        if let Some(pending) = self.pending.get_mut(&key) {
            if pending.stamp == stamp {
                self.metrics.inc_thumbs_coalesced();
                debug!("joining in-flight thumbnail for {}", key.source.display());
                pending.waiters.push(reply);
            } else {
                debug!("{} changed while its thumbnail was generating", key.source.display());
                pending.deferred.push(Request { key, stamp, reply });
            }
            return;
        }

        if stale.is_some() {
            self.ready.pop(&key);
        }

        let dest = thumb_path(&self.dir, self.identity.as_ref(), &key, stamp.as_ref());
        self.pending.insert(key.clone(), Pending { stamp, waiters: vec![reply], deferred: Vec::new() });

        let transcoder = self.transcoder.clone();
        let permits = self.permits.clone();
        let dir = self.dir.clone();
        self.tasks.spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(permit) => {
                    let job = key.clone();
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        generate(transcoder.as_ref(), &job, &dir, &dest, stale.as_deref())
                    })
                    .await
                    .unwrap_or_else(|e| Err(ThumbError::Task(e.to_string())))
                }
                Err(e) => Err(ThumbError::Task(e.to_string())),
            };
            (key, outcome)
        });
    }

    fn complete(&mut self, key: CacheKey, outcome: Result<Generated, ThumbError>) {
        let Some(pending) = self.pending.remove(&key) else {
            return;
        };

        let result = match outcome {
            Ok(Generated::Encoded(path)) => {
                self.metrics.inc_thumbs_generated();
                debug!("generated thumbnail {} for {}", path.display(), key.source.display());
                Some(path)
            }
            Ok(Generated::Reused(path)) => {
                self.metrics.inc_thumbs_disk_hits();
                Some(path)
            }
            Err(e) => {
                self.metrics.inc_thumbs_failed();
                warn!("thumbnail for {} failed: {}", key.source.display(), e);
                None
            }
        };

        if let Some(path) = &result {
            self.ready.put(key, ReadyEntry { path: path.clone(), stamp: pending.stamp });
        }
        for waiter in pending.waiters {
            let _ = waiter.send(result.clone());
        }
        for req in pending.deferred {
            self.handle(req);
        }
    }
}

/// Produces `dest`, reusing an existing file. Nothing is left behind at `dest` or in `dir` on
/// failure.
fn generate(
    transcoder: &dyn Transcoder,
    key: &CacheKey,
    dir: &Path,
    dest: &Path,
    stale: Option<&Path>,
) -> Result<Generated, ThumbError> {
    if dest.is_file() {
        return Ok(Generated::Reused(dest.to_path_buf()));
    }

    let mut tmp = tempfile::Builder::new().prefix(".thumb-").suffix(".tmp").tempfile_in(dir)?;
    {
        let mut writer = io::BufWriter::new(tmp.as_file_mut());
        transcoder.transcode(&key.source, key.width, key.height, &mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| ThumbError::Io(e.error))?;

    if let Some(old) = stale.filter(|old| *old != dest) {
        if let Err(e) = fs::remove_file(old) {
            debug!("could not remove stale thumbnail {}: {}", old.display(), e);
        }
    }
    Ok(Generated::Encoded(dest.to_path_buf()))
}
