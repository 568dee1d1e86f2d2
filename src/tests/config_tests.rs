#[cfg(test)]
mod tests {
    use crate::config::{self, AppConfig};
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn assert_invalid(cfg: &AppConfig, needle: &str) {
        let err = config::validate(cfg).unwrap_err().to_string();
        assert!(err.contains(needle), "expected '{}' in '{}'", needle, err);
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.index.root, ".");
        assert!(config.index.show_modes);
        assert_eq!(config.index.gallery_images, 25);

        assert!(config.thumbnails.enable);
        assert_eq!(config.thumbnails.width, 150);
        assert_eq!(config.thumbnails.height, 100);
        assert_eq!(config.thumbnails.quality, 90);
        assert!(config.thumbnails.revalidate);
        assert!(config.thumbnails.max_parallel.is_none());

        assert!(!config.archive.enable);
        assert!(!config.archive.recursive);
        assert_eq!(config.archive.max_concurrency, 0);
        assert_eq!(config.archive.chunk_size, 65536);
        assert!(config.security.is_none());

        assert!(config::validate(&config).is_ok());
    }

    #[test]
    fn test_thumbnail_cache_dir() {
        let mut t = AppConfig::default().thumbnails;
        t.dir = String::new();
        let dir = t.cache_dir();
        assert!(dir.ends_with(".thumbs"));

        t.dir = "/tmp/thumbs".to_string();
        assert_eq!(t.cache_dir(), PathBuf::from("/tmp/thumbs"));
    }

    #[test]
    fn test_thumbnail_parallelism() {
        let mut t = AppConfig::default().thumbnails;
        t.max_parallel = Some(7);
        assert_eq!(t.parallelism(), 7);
        t.max_parallel = None;
        assert!(t.parallelism() >= 2);
    }

    #[test]
    fn test_invalid_values() {
        let mut c = AppConfig::default();
        c.server.port = 0;
        assert_invalid(&c, "invalid server.port");

        let mut c = AppConfig::default();
        c.index.root = "  ".to_string();
        assert_invalid(&c, "index.root must not be empty");

        let mut c = AppConfig::default();
        c.index.gallery_images = 0;
        assert_invalid(&c, "index.gallery_images");

        let mut c = AppConfig::default();
        c.thumbnails.width = 0;
        assert_invalid(&c, "thumbnails.width");

        let mut c = AppConfig::default();
        c.thumbnails.height = 5000;
        assert_invalid(&c, "thumbnails.height");

        let mut c = AppConfig::default();
        c.thumbnails.quality = 0;
        assert_invalid(&c, "thumbnails.quality");

        let mut c = AppConfig::default();
        c.thumbnails.index_capacity = 0;
        assert_invalid(&c, "thumbnails.index_capacity");

        let mut c = AppConfig::default();
        c.thumbnails.max_parallel = Some(0);
        assert_invalid(&c, "thumbnails.max_parallel");

        let mut c = AppConfig::default();
        c.archive.chunk_size = 16;
        assert_invalid(&c, "archive.chunk_size");
    }

    #[test]
    fn test_recursive_without_enable_is_accepted() {
        let mut c = AppConfig::default();
        c.archive.recursive = true;
        assert!(config::validate(&c).is_ok());
    }

    // The only test that touches the process environment
    #[test]
    fn test_load_file_then_env_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        fs::write(
            &path,
            r#"
[server]
port = 7000

[index]
root = "/srv/files"
gallery_images = 10

[archive]
enable = true
max_concurrency = 2
"#,
        )
        .unwrap();

        env::set_var("DIRINDEX_CONFIG", path.to_str().unwrap());
        env::set_var("DIRINDEX__SERVER__PORT", "8888");
        env::set_var("DIRINDEX__THUMBNAILS__WIDTH", "320");

        let result = config::load();

        env::remove_var("DIRINDEX_CONFIG");
        env::remove_var("DIRINDEX__SERVER__PORT");
        env::remove_var("DIRINDEX__THUMBNAILS__WIDTH");

        let config = result.unwrap();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.index.root, "/srv/files");
        assert_eq!(config.index.gallery_images, 10);
        assert!(config.index.show_modes);
        assert!(config.archive.enable);
        assert_eq!(config.archive.max_concurrency, 2);
        assert_eq!(config.thumbnails.width, 320);
        assert_eq!(config.thumbnails.height, 100);
    }
}
