//! Streaming directory archives.
//!
//! Building an archive is split in two phases. [`build_manifest`] enumerates the directory up
//! front so that enumeration errors surface before any response byte is sent. [`stream_archive`]
//! then copies each member into a ZIP stream written straight to the sink. Streaming is bounded
//! process-wide by a [`ConcurrencyGate`].

mod body;
mod gate;
pub mod zipstream;

pub use body::{archive_file_name, content_disposition, BodyWriter};
pub use gate::{ConcurrencyGate, GatePermit};

use std::{
    fs::{self, File, Metadata},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, warn};
use walkdir::WalkDir;

use zipstream::{MemberHeader, ZipStreamWriter, ZIP64_THRESHOLD};

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to enumerate {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// One archive member, resolved before streaming starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Archive-relative name with `/` separators.
    pub name: String,
    /// Absolute path of the source file.
    pub source: PathBuf,
    pub size: u64,
    /// Unix mode bits (file type and permissions).
    pub mode: u32,
    pub modified: SystemTime,
}

impl ManifestEntry {
    fn from_metadata(name: String, source: PathBuf, md: &Metadata) -> Self {
        Self {
            name,
            source,
            size: md.len(),
            mode: unix_mode(md),
            modified: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    fn header(&self) -> MemberHeader {
        MemberHeader {
            name: self.name.clone(),
            size: self.size,
            mode: self.mode,
            modified: self.modified,
        }
    }
}

/// Lists the regular files to archive for `dir`.
///
/// Without `recursive` only direct children are listed and each is named `<dir name>/<child>`.
/// With `recursive` the whole subtree is walked and names are relative to the parent of `dir`,
/// so `dir` itself becomes the top-level folder. Symlinks and directories are never members.
/// Entries are ordered by file name; any enumeration error aborts the whole build.
pub fn build_manifest(dir: &Path, recursive: bool) -> Result<Vec<ManifestEntry>, ArchiveError> {
    let md = fs::metadata(dir).map_err(|source| ArchiveError::Enumerate { path: dir.to_path_buf(), source })?;
    if !md.is_dir() {
        return Err(ArchiveError::NotADirectory(dir.to_path_buf()));
    }
    if recursive {
        walk(dir)
    } else {
        read_children(dir)
    }
}

fn read_children(dir: &Path) -> Result<Vec<ManifestEntry>, ArchiveError> {
    let enumerate = |source| ArchiveError::Enumerate { path: dir.to_path_buf(), source };
    let base = dir_label(dir);

    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(enumerate)? {
        let entry = entry.map_err(enumerate)?;
        let file_type = entry.file_type().map_err(enumerate)?;
        if !file_type.is_file() {
            continue;
        }
        let md = entry.metadata().map_err(enumerate)?;
        let child = entry.file_name().to_string_lossy().into_owned();
        let name = match &base {
            Some(base) => format!("{}/{}", base, child),
            None => child,
        };
        children.push(ManifestEntry::from_metadata(name, entry.path(), &md));
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(children)
}

fn walk(dir: &Path) -> Result<Vec<ManifestEntry>, ArchiveError> {
    let anchor = dir.parent().unwrap_or(dir);
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|source| ArchiveError::Walk { path: dir.to_path_buf(), source })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let md = entry
            .metadata()
            .map_err(|source| ArchiveError::Walk { path: entry.path().to_path_buf(), source })?;
        let rel = entry.path().strip_prefix(anchor).unwrap_or(entry.path());
        entries.push(ManifestEntry::from_metadata(archive_name(rel), entry.path().to_path_buf(), &md));
    }
    Ok(entries)
}

fn dir_label(dir: &Path) -> Option<String> {
    dir.file_name().map(|n| n.to_string_lossy().into_owned()).filter(|n| !n.is_empty())
}

fn archive_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn unix_mode(md: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode()
}

#[cfg(not(unix))]
fn unix_mode(md: &Metadata) -> u32 {
    const REGULAR: u32 = 0o100000;
    if md.permissions().readonly() {
        REGULAR | 0o444
    } else {
        REGULAR | 0o644
    }
}

/// Outcome of a streamed archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub members_written: u64,
    /// Members whose source could not be opened.
    pub members_skipped: u64,
    /// Members cut short by a read error; they are still closed properly.
    pub members_truncated: u64,
    pub bytes_written: u64,
}

/// Streams `manifest` as a ZIP archive into `sink`.
///
/// Unopenable sources are skipped and a read failure ends only the current member. A sink
/// failure (the client went away) aborts the stream. The central directory is always written,
/// on the error path by the writer's drop.
pub fn stream_archive<W: Write>(manifest: &[ManifestEntry], sink: W) -> io::Result<ArchiveSummary> {
    write_archive(manifest, sink, |path| File::open(path))
}

pub(crate) fn write_archive<W, R, F>(manifest: &[ManifestEntry], sink: W, open: F) -> io::Result<ArchiveSummary>
where
    W: Write,
    R: Read,
    F: Fn(&Path) -> io::Result<R>,
{
    let mut zip = ZipStreamWriter::new(sink);
    let mut summary = ArchiveSummary::default();
    let mut buf = vec![0u8; COPY_BUFFER];

    for entry in manifest {
        let mut source = match open(&entry.source) {
            Ok(f) => f,
            Err(e) => {
                warn!("zipper: skipping {}: {}", entry.source.display(), e);
                summary.members_skipped += 1;
                continue;
            }
        };

        let mut member = zip.start_member(&entry.header())?;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(
                        "zipper: read of {} failed after {} bytes: {}",
                        entry.source.display(),
                        member.uncompressed_len(),
                        e
                    );
                    summary.members_truncated += 1;
                    break;
                }
            };
            if !member.is_zip64() && member.uncompressed_len() + n as u64 >= ZIP64_THRESHOLD {
                warn!("zipper: {} grew past its listed size, truncating", entry.source.display());
                summary.members_truncated += 1;
                break;
            }
            member.write_all(&buf[..n])?;
        }
        member.finish()?;
        summary.members_written += 1;
    }

    summary.bytes_written = zip.finish()?;
    debug!(
        "zipper: {} members, {} skipped, {} bytes",
        summary.members_written, summary.members_skipped, summary.bytes_written
    );
    Ok(summary)
}
