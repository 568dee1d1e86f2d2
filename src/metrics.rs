use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for the thumbnail cache and the archive streamer
#[derive(Clone)]
pub struct Metrics {
    pub thumbs_generated: Arc<AtomicU64>,
    pub thumbs_failed: Arc<AtomicU64>,
    pub thumbs_memory_hits: Arc<AtomicU64>,
    pub thumbs_disk_hits: Arc<AtomicU64>,
    pub thumbs_coalesced: Arc<AtomicU64>,
    pub archives_started: Arc<AtomicU64>,
    pub archives_completed: Arc<AtomicU64>,
    pub archives_aborted: Arc<AtomicU64>,
    pub archive_members_written: Arc<AtomicU64>,
    pub archive_members_skipped: Arc<AtomicU64>,
    pub archive_bytes: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            thumbs_generated: Arc::new(AtomicU64::new(0)),
            thumbs_failed: Arc::new(AtomicU64::new(0)),
            thumbs_memory_hits: Arc::new(AtomicU64::new(0)),
            thumbs_disk_hits: Arc::new(AtomicU64::new(0)),
            thumbs_coalesced: Arc::new(AtomicU64::new(0)),
            archives_started: Arc::new(AtomicU64::new(0)),
            archives_completed: Arc::new(AtomicU64::new(0)),
            archives_aborted: Arc::new(AtomicU64::new(0)),
            archive_members_written: Arc::new(AtomicU64::new(0)),
            archive_members_skipped: Arc::new(AtomicU64::new(0)),
            archive_bytes: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_thumbs_generated(&self) {
        self.thumbs_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_thumbs_failed(&self) {
        self.thumbs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_thumbs_memory_hits(&self) {
        self.thumbs_memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_thumbs_disk_hits(&self) {
        self.thumbs_disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_thumbs_coalesced(&self) {
        self.thumbs_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_archives_started(&self) {
        self.archives_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_archives_completed(&self) {
        self.archives_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_archives_aborted(&self) {
        self.archives_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_archive_members(&self, written: u64, skipped: u64) {
        self.archive_members_written.fetch_add(written, Ordering::Relaxed);
        self.archive_members_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn add_archive_bytes(&self, bytes: u64) {
        self.archive_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            thumbs_generated: self.thumbs_generated.load(Ordering::Relaxed),
            thumbs_failed: self.thumbs_failed.load(Ordering::Relaxed),
            thumbs_memory_hits: self.thumbs_memory_hits.load(Ordering::Relaxed),
            thumbs_disk_hits: self.thumbs_disk_hits.load(Ordering::Relaxed),
            thumbs_coalesced: self.thumbs_coalesced.load(Ordering::Relaxed),
            archives_started: self.archives_started.load(Ordering::Relaxed),
            archives_completed: self.archives_completed.load(Ordering::Relaxed),
            archives_aborted: self.archives_aborted.load(Ordering::Relaxed),
            archive_members_written: self.archive_members_written.load(Ordering::Relaxed),
            archive_members_skipped: self.archive_members_skipped.load(Ordering::Relaxed),
            archive_bytes: self.archive_bytes.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub thumbs_generated: u64,
    pub thumbs_failed: u64,
    pub thumbs_memory_hits: u64,
    pub thumbs_disk_hits: u64,
    pub thumbs_coalesced: u64,
    pub archives_started: u64,
    pub archives_completed: u64,
    pub archives_aborted: u64,
    pub archive_members_written: u64,
    pub archive_members_skipped: u64,
    pub archive_bytes: u64,
    pub uptime_seconds: u64,
}
