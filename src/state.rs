use std::{path::PathBuf, sync::Arc};

use anyhow::Context;

use crate::archive::ConcurrencyGate;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::thumb::{CacheOptions, JpegTranscoder, Sha256Identity, ThumbnailCache};

/// The shared application state.
///
/// Cloned into every handler. Everything inside is either immutable or internally synchronized.
#[derive(Clone)]
pub struct AppState {
    /// Absolute, canonical directory being served.
    pub root: Arc<PathBuf>,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Counters exposed under `/metrics`.
    pub metrics: Metrics,
    /// Thumbnail cache handle, `None` when thumbnails are disabled.
    pub thumbs: Option<ThumbnailCache>,
    /// Process-wide limit on simultaneous archive streams.
    pub gate: ConcurrencyGate,
}

impl AppState {
    /// Resolves the served root and starts the thumbnail cache actor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(&config.index.root)
            .with_context(|| format!("cannot resolve index.root {}", config.index.root))?;
        if !root.is_dir() {
            anyhow::bail!("index.root is not a directory: {}", root.display());
        }

        let metrics = Metrics::new();
        let thumbs = if config.thumbnails.enable {
            let options = CacheOptions::from_config(&config.thumbnails);
            let dir = options.dir.clone();
            let cache = ThumbnailCache::start(
                options,
                Arc::new(JpegTranscoder::new(config.thumbnails.quality)),
                Arc::new(Sha256Identity),
                metrics.clone(),
            )
            .with_context(|| format!("cannot create thumbnail dir {}", dir.display()))?;
            Some(cache)
        } else {
            None
        };

        let gate = ConcurrencyGate::new(config.archive.max_concurrency);

        Ok(Self { root: Arc::new(root), config: Arc::new(config), metrics, thumbs, gate })
    }
}
