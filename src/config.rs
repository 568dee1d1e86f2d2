use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub root: String,
    pub show_modes: bool,
    pub gallery_images: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    pub enable: bool,
    pub dir: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub revalidate: bool,
    pub index_capacity: usize,
    pub max_parallel: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub enable: bool,
    pub recursive: bool,
    pub max_concurrency: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub thumbnails: ThumbnailConfig,
    pub archive: ArchiveConfig,
    pub security: Option<SecurityConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl ThumbnailConfig {
    /// Directory holding generated thumbnails. An empty `dir` means `$HOME/.thumbs`,
    /// or `./.thumbs` when no home directory can be determined.
    pub fn cache_dir(&self) -> PathBuf {
        let configured = self.dir.trim();
        if !configured.is_empty() {
            return PathBuf::from(configured);
        }
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".thumbs")
    }

    pub fn parallelism(&self) -> usize {
        self.max_parallel.unwrap_or_else(|| num_cpus::get().max(2) / 2 + 1)
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: dirindex.toml (in CWD)
        .add_source(::config::File::with_name("dirindex").required(false));

    if let Ok(custom_path) = std::env::var("DIRINDEX_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("DIRINDEX").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub(crate) fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Index
    if cfg.index.root.trim().is_empty() {
        return Err(anyhow::anyhow!("index.root must not be empty"));
    }
    if cfg.index.gallery_images == 0 {
        return Err(anyhow::anyhow!("index.gallery_images must be > 0"));
    }

    // Thumbnails
    let t = &cfg.thumbnails;
    if t.width == 0 || t.width > 4096 {
        return Err(anyhow::anyhow!("thumbnails.width must be in 1..=4096"));
    }
    if t.height == 0 || t.height > 4096 {
        return Err(anyhow::anyhow!("thumbnails.height must be in 1..=4096"));
    }
    if t.quality == 0 || t.quality > 100 {
        return Err(anyhow::anyhow!("thumbnails.quality must be in 1..=100"));
    }
    if t.index_capacity == 0 {
        return Err(anyhow::anyhow!("thumbnails.index_capacity must be > 0"));
    }
    if let Some(p) = t.max_parallel {
        if p == 0 || p > 256 {
            return Err(anyhow::anyhow!("thumbnails.max_parallel must be in 1..=256"));
        }
    }

    // Archive
    if !(4 * 1024..=8 * 1024 * 1024).contains(&cfg.archive.chunk_size) {
        return Err(anyhow::anyhow!("archive.chunk_size must be in 4096..=8388608"));
    }
    if cfg.archive.recursive && !cfg.archive.enable {
        tracing::warn!("archive.recursive has no effect while archive.enable is false");
    }

    Ok(())
}
