use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use super::{CacheKey, SourceStamp};

/// Maps a cache key to a stable identifier usable as a file name component.
pub trait IdentityStore: Send + Sync {
    fn identify(&self, key: &CacheKey, stamp: Option<&SourceStamp>) -> String;
}

/// Hex-encoded SHA-256 over a length-prefixed encoding of the key and, when present, the
/// source stamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Identity;

impl IdentityStore for Sha256Identity {
    fn identify(&self, key: &CacheKey, stamp: Option<&SourceStamp>) -> String {
        let mut hasher = Sha256::new();
        let source = key.source.as_os_str().as_encoded_bytes();
        hasher.update((source.len() as u64).to_le_bytes());
        hasher.update(source);
        hasher.update(key.width.to_le_bytes());
        hasher.update(key.height.to_le_bytes());
        match stamp {
            Some(stamp) => {
                let (sign, offset) = match stamp.modified.duration_since(UNIX_EPOCH) {
                    Ok(d) => (1u8, d),
                    Err(e) => (2u8, e.duration()),
                };
                hasher.update([sign]);
                hasher.update(offset.as_secs().to_le_bytes());
                hasher.update(offset.subsec_nanos().to_le_bytes());
                hasher.update(stamp.len.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hex::encode(hasher.finalize())
    }
}

pub(crate) fn thumb_path(
    dir: &Path,
    identity: &dyn IdentityStore,
    key: &CacheKey,
    stamp: Option<&SourceStamp>,
) -> PathBuf {
    dir.join(format!("{}.jpg", identity.identify(key, stamp)))
}
