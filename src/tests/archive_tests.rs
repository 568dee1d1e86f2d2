#[cfg(test)]
mod tests {
    use crate::archive::zipstream::{dos_datetime, MemberHeader, ZipStreamWriter};
    use crate::archive::{
        archive_file_name, build_manifest, content_disposition, stream_archive, write_archive, ArchiveError,
        BodyWriter, ConcurrencyGate,
    };
    use axum::body::Bytes;
    use std::fs::{self, File};
    use std::io::{self, Cursor, Read, Write};
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// `root/` with two files, a nested directory, a hidden file and a symlink.
    fn sample_tree() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("b.txt"), b"bravo bravo").unwrap();
        fs::write(root.join(".hidden"), b"secret").unwrap();
        fs::write(root.join("sub/b.txt"), b"nested").unwrap();
        fs::write(root.join("sub/deeper/c.txt"), b"deep").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("a.txt"), root.join("link.txt")).unwrap();
        (tmp, root)
    }

    fn names(manifest: &[crate::archive::ManifestEntry]) -> Vec<String> {
        manifest.iter().map(|e| e.name.clone()).collect()
    }

    fn read_zip(bytes: Vec<u8>) -> zip::ZipArchive<Cursor<Vec<u8>>> {
        zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip archive")
    }

    fn member(archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
        let mut file = archive.by_name(name).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_manifest_non_recursive() {
        let (_tmp, root) = sample_tree();
        let manifest = build_manifest(&root, false).unwrap();
        assert_eq!(names(&manifest), vec!["root/.hidden", "root/a.txt", "root/b.txt"]);

        let a = &manifest[1];
        assert_eq!(a.source, root.join("a.txt"));
        assert_eq!(a.size, 5);
        #[cfg(unix)]
        assert_eq!(a.mode & 0o170000, 0o100000);
    }

    #[test]
    fn test_manifest_recursive() {
        let (_tmp, root) = sample_tree();
        let manifest = build_manifest(&root, true).unwrap();
        assert_eq!(
            names(&manifest),
            vec!["root/.hidden", "root/a.txt", "root/b.txt", "root/sub/b.txt", "root/sub/deeper/c.txt"]
        );
        assert!(manifest.iter().all(|e| e.source.is_file()));
    }

    #[test]
    fn test_manifest_of_file_is_rejected() {
        let (_tmp, root) = sample_tree();
        match build_manifest(&root.join("a.txt"), false) {
            Err(ArchiveError::NotADirectory(p)) => assert_eq!(p, root.join("a.txt")),
            other => panic!("expected NotADirectory, got {:?}", other),
        }
        assert!(matches!(build_manifest(&root.join("missing"), true), Err(ArchiveError::Enumerate { .. })));
    }

    #[test]
    fn test_manifest_of_empty_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(build_manifest(tmp.path(), false).unwrap().is_empty());
        assert!(build_manifest(tmp.path(), true).unwrap().is_empty());
    }

    #[test]
    fn test_stream_archive_round_trip() {
        let (_tmp, root) = sample_tree();
        let manifest = build_manifest(&root, true).unwrap();

        let mut out = Vec::new();
        let summary = stream_archive(&manifest, &mut out).unwrap();
        assert_eq!(summary.members_written, 5);
        assert_eq!(summary.members_skipped, 0);
        assert_eq!(summary.members_truncated, 0);
        assert_eq!(summary.bytes_written, out.len() as u64);

        let mut archive = read_zip(out);
        assert_eq!(archive.len(), 5);
        assert_eq!(member(&mut archive, "root/a.txt"), b"alpha");
        assert_eq!(member(&mut archive, "root/sub/deeper/c.txt"), b"deep");
        let entry = archive.by_name("root/b.txt").unwrap();
        assert_eq!(entry.size(), 11);
        assert_eq!(entry.compression(), zip::CompressionMethod::Deflated);
    }

    #[test]
    fn test_stream_archive_utf8_names() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("fotos");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("café.txt"), b"creme").unwrap();
        fs::write(dir.join("日本.txt"), b"nihon").unwrap();

        let manifest = build_manifest(&dir, false).unwrap();
        let mut out = Vec::new();
        stream_archive(&manifest, &mut out).unwrap();

        let mut archive = read_zip(out);
        assert_eq!(member(&mut archive, "fotos/café.txt"), b"creme");
        assert_eq!(member(&mut archive, "fotos/日本.txt"), b"nihon");
    }

    #[test]
    fn test_empty_manifest_is_valid_archive() {
        let mut out = Vec::new();
        let summary = stream_archive(&[], &mut out).unwrap();
        assert_eq!(summary.members_written, 0);
        assert_eq!(read_zip(out).len(), 0);
    }

    #[test]
    fn test_vanished_source_is_skipped() {
        let (_tmp, root) = sample_tree();
        let manifest = build_manifest(&root, false).unwrap();
        fs::remove_file(root.join("a.txt")).unwrap();

        let mut out = Vec::new();
        let summary = stream_archive(&manifest, &mut out).unwrap();
        assert_eq!(summary.members_written, 2);
        assert_eq!(summary.members_skipped, 1);

        let mut archive = read_zip(out);
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("root/a.txt").is_err());
        assert_eq!(member(&mut archive, "root/b.txt"), b"bravo bravo");
    }

    /// Yields `remaining` bytes of data, then fails every read.
    struct FlakyReader {
        remaining: usize,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk went away"));
            }
            let n = self.remaining.min(buf.len());
            buf[..n].fill(b'x');
            self.remaining -= n;
            Ok(n)
        }
    }

    enum Source {
        File(File),
        Flaky(FlakyReader),
    }

    impl Read for Source {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self {
                Source::File(f) => f.read(buf),
                Source::Flaky(r) => r.read(buf),
            }
        }
    }

    #[test]
    fn test_read_failure_truncates_member_only() {
        let (_tmp, root) = sample_tree();
        let manifest = build_manifest(&root, false).unwrap();
        let flaky = root.join("a.txt");

        let mut out = Vec::new();
        let summary = write_archive(&manifest, &mut out, |path: &Path| {
            if path == flaky.as_path() {
                Ok(Source::Flaky(FlakyReader { remaining: 3 }))
            } else {
                File::open(path).map(Source::File)
            }
        })
        .unwrap();
        assert_eq!(summary.members_written, 3);
        assert_eq!(summary.members_truncated, 1);

        let mut archive = read_zip(out);
        assert_eq!(archive.len(), 3);
        assert_eq!(member(&mut archive, "root/a.txt"), b"xxx");
        assert_eq!(member(&mut archive, "root/b.txt"), b"bravo bravo");
    }

    /// Accepts `limit` bytes, then reports a closed connection.
    struct ClosingSink {
        limit: usize,
        written: usize,
    }

    impl Write for ClosingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written >= self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"));
            }
            let n = buf.len().min(self.limit - self.written);
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_aborts_stream() {
        let (_tmp, root) = sample_tree();
        let manifest = build_manifest(&root, true).unwrap();
        let err = stream_archive(&manifest, ClosingSink { limit: 40, written: 0 }).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_abandoned_writer_still_writes_central_directory() {
        let mut out = Vec::new();
        {
            let mut zip = ZipStreamWriter::new(&mut out);
            let header = MemberHeader {
                name: "only.txt".to_string(),
                size: 4,
                mode: 0o100644,
                modified: SystemTime::now(),
            };
            let mut m = zip.start_member(&header).unwrap();
            m.write_all(b"data").unwrap();
            m.finish().unwrap();
        }
        let mut archive = read_zip(out);
        assert_eq!(member(&mut archive, "only.txt"), b"data");
    }

    #[test]
    fn test_dos_datetime_clamps_before_1980() {
        assert_eq!(dos_datetime(UNIX_EPOCH), (0, (1 << 5) | 1));

        let (_time, date) = dos_datetime(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert_eq!(date >> 9, 2023 - 1980);
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name(Path::new("/srv/photos")), "photos.zip");
        assert_eq!(archive_file_name(Path::new("/")), "archive.zip");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(content_disposition("photos.zip"), "attachment; filename=\"photos.zip\"");
        assert_eq!(content_disposition("my photos.zip"), "attachment; filename=\"my photos.zip\"");

        let utf8 = content_disposition("café.zip");
        assert!(utf8.starts_with("attachment; filename=\"caf_.zip\""));
        assert!(utf8.ends_with("filename*=UTF-8''caf%C3%A9.zip"));

        let quoted = content_disposition("a\"b.zip");
        assert!(quoted.contains("filename=\"a_b.zip\""));
        assert!(quoted.contains("filename*=UTF-8''a%22b.zip"));
    }

    #[tokio::test]
    async fn test_gate_serializes_at_capacity_one() {
        let gate = ConcurrencyGate::new(1);
        assert_eq!(gate.capacity(), 1);
        assert!(!gate.is_unlimited());

        let first = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), Some(0));
        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), gate.acquire()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_gate_releases_waiters_in_turn() {
        let gate = ConcurrencyGate::new(2);
        let active = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let now = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                peak.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            })
        });
        for job in futures::future::join_all(jobs).await {
            job.unwrap();
        }
        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
        assert_eq!(gate.available(), Some(2));
    }

    #[tokio::test]
    async fn test_gate_unlimited() {
        let gate = ConcurrencyGate::new(0);
        assert!(gate.is_unlimited());
        assert_eq!(gate.available(), None);
        let permits: Vec<_> = futures::future::join_all((0..100).map(|_| gate.acquire())).await;
        assert!(permits.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_body_writer_chunks() {
        let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(8);
        let writer = tokio::task::spawn_blocking(move || {
            let mut w = BodyWriter::new(tx, 4);
            w.write_all(b"0123456789").unwrap();
            w.flush().unwrap();
        });

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        writer.await.unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"0123"), Bytes::from_static(b"4567"), Bytes::from_static(b"89")]);
    }

    #[tokio::test]
    async fn test_body_writer_reports_disconnect() {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(1);
        drop(rx);
        let err = tokio::task::spawn_blocking(move || {
            let mut w = BodyWriter::new(tx, 4);
            w.write_all(b"abcdef").unwrap_err()
        })
        .await
        .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
