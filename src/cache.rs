/// Chunk Cache
///
/// Content-addressed store of rendered chunks. Keys embed a file signature
/// derived from the source's mtime, size and path, so a chunk is never
/// served after the source file changes. The key string format is stable
/// and persisted: chunks written to disk must remain addressable across
/// restarts.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::buffer::AudioBuffer;
use crate::error::CacheError;
use crate::pipeline::ChunkMetrics;
use crate::presets::Preset;
use crate::source::SourceIdentity;

/// Default capacity of the in-memory chunk cache, in chunks.
const CHUNK_CACHE_CAPACITY: usize = 256;

/// First 8 hex chars of `md5(mtime ++ "_" ++ size ++ "_" ++ path)`.
pub fn file_signature(identity: &SourceIdentity) -> String {
    let input = format!("{}_{}_{}", identity.mtime, identity.size, identity.path);
    let digest = md5::compute(input.as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

/// Cache key for one rendered chunk.
///
/// Renders as `"{track_id}_{file_signature}_{preset}_{intensity}_chunk_{index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub track_id: u64,
    pub file_signature: String,
    pub preset: Preset,
    intensity_bits: u32,
    pub chunk_index: u32,
}

impl ChunkKey {
    pub fn new(
        track_id: u64,
        file_signature: String,
        preset: Preset,
        intensity: f32,
        chunk_index: u32,
    ) -> Self {
        Self {
            track_id,
            file_signature,
            preset,
            intensity_bits: intensity.to_bits(),
            chunk_index,
        }
    }

    pub fn intensity(&self) -> f32 {
        f32::from_bits(self.intensity_bits)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{:?}_chunk_{}",
            self.track_id,
            self.file_signature,
            self.preset.name(),
            self.intensity(),
            self.chunk_index
        )
    }
}

/// A rendered chunk plus its telemetry record.
#[derive(Debug, Clone)]
pub struct CachedChunk {
    pub audio: AudioBuffer,
    pub metrics: ChunkMetrics,
}

/// Store of rendered chunks. The core supplies an in-memory LRU
/// implementation; hosts can substitute a disk-backed one.
pub trait ChunkCache: Send {
    fn get(&mut self, key: &ChunkKey) -> Option<CachedChunk>;

    fn put(&mut self, key: ChunkKey, chunk: CachedChunk) -> Result<(), CacheError>;
}

/// Default in-memory LRU chunk cache.
///
/// Keys are stored in their stable string form. When a new file signature
/// appears for a track, every chunk stored under the superseded signature
/// is evicted immediately.
pub struct MemoryChunkCache {
    entries: LruCache<String, CachedChunk>,
    track_signatures: std::collections::HashMap<u64, String>,
}

impl MemoryChunkCache {
    pub fn new() -> Self {
        Self::with_capacity(CHUNK_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            track_signatures: std::collections::HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_superseded(&mut self, track_id: u64, old_signature: &str) {
        let prefix = format!("{}_{}_", track_id, old_signature);
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        if !stale.is_empty() {
            tracing::info!(
                "evicted {} chunk(s) of track {} under superseded signature {}",
                stale.len(),
                track_id,
                old_signature
            );
        }
    }
}

impl Default for MemoryChunkCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkCache for MemoryChunkCache {
    fn get(&mut self, key: &ChunkKey) -> Option<CachedChunk> {
        self.entries.get(&key.to_string()).cloned()
    }

    fn put(&mut self, key: ChunkKey, chunk: CachedChunk) -> Result<(), CacheError> {
        match self.track_signatures.get(&key.track_id) {
            Some(current) if *current != key.file_signature => {
                let old = current.clone();
                self.purge_superseded(key.track_id, &old);
                self.track_signatures
                    .insert(key.track_id, key.file_signature.clone());
            }
            None => {
                self.track_signatures
                    .insert(key.track_id, key.file_signature.clone());
            }
            _ => {}
        }

        self.entries.put(key.to_string(), chunk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ChunkMetrics;

    fn chunk(frames: usize) -> CachedChunk {
        CachedChunk {
            audio: AudioBuffer::silence(frames, 2),
            metrics: ChunkMetrics::empty(),
        }
    }

    fn identity(mtime: &str, size: u64, path: &str) -> SourceIdentity {
        SourceIdentity {
            mtime: mtime.to_string(),
            size,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_signature_is_eight_hex_chars() {
        let sig = file_signature(&identity("1700000000.5", 123456, "/music/a.flac"));
        assert_eq!(sig.len(), 8);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_changes_with_file_facts() {
        let a = file_signature(&identity("1700000000", 100, "/music/a.flac"));
        let b = file_signature(&identity("1700000001", 100, "/music/a.flac"));
        let c = file_signature(&identity("1700000000", 101, "/music/a.flac"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_string_format() {
        let key = ChunkKey::new(7, "deadbeef".to_string(), Preset::Punchy, 1.0, 3);
        assert_eq!(key.to_string(), "7_deadbeef_punchy_1.0_chunk_3");

        let half = ChunkKey::new(7, "deadbeef".to_string(), Preset::Adaptive, 0.5, 0);
        assert_eq!(half.to_string(), "7_deadbeef_adaptive_0.5_chunk_0");
    }

    #[test]
    fn test_get_after_put() {
        let mut cache = MemoryChunkCache::new();
        let key = ChunkKey::new(1, "aaaa0000".to_string(), Preset::Adaptive, 1.0, 0);
        cache.put(key.clone(), chunk(100)).unwrap();
        let cached = cache.get(&key).unwrap();
        assert_eq!(cached.audio.frames(), 100);
    }

    #[test]
    fn test_different_signature_misses() {
        let mut cache = MemoryChunkCache::new();
        let old = ChunkKey::new(1, "aaaa0000".to_string(), Preset::Adaptive, 1.0, 0);
        cache.put(old, chunk(100)).unwrap();

        let new = ChunkKey::new(1, "bbbb1111".to_string(), Preset::Adaptive, 1.0, 0);
        assert!(cache.get(&new).is_none());
    }

    #[test]
    fn test_new_signature_supersedes_old_chunks() {
        let mut cache = MemoryChunkCache::new();
        for index in 0..3 {
            let key = ChunkKey::new(1, "aaaa0000".to_string(), Preset::Adaptive, 1.0, index);
            cache.put(key, chunk(10)).unwrap();
        }
        assert_eq!(cache.len(), 3);

        // New signature for the same track evicts the stale chunks
        let key = ChunkKey::new(1, "bbbb1111".to_string(), Preset::Adaptive, 1.0, 0);
        cache.put(key, chunk(10)).unwrap();
        assert_eq!(cache.len(), 1);

        let stale = ChunkKey::new(1, "aaaa0000".to_string(), Preset::Adaptive, 1.0, 0);
        assert!(cache.get(&stale).is_none());
    }

    #[test]
    fn test_other_tracks_untouched_by_supersession() {
        let mut cache = MemoryChunkCache::new();
        let other = ChunkKey::new(2, "cccc2222".to_string(), Preset::Adaptive, 1.0, 0);
        cache.put(other.clone(), chunk(10)).unwrap();

        let key_old = ChunkKey::new(1, "aaaa0000".to_string(), Preset::Adaptive, 1.0, 0);
        cache.put(key_old, chunk(10)).unwrap();
        let key_new = ChunkKey::new(1, "bbbb1111".to_string(), Preset::Adaptive, 1.0, 0);
        cache.put(key_new, chunk(10)).unwrap();

        assert!(cache.get(&other).is_some());
    }
}
