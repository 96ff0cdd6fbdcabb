/// Processor Factory
///
/// Pipelines are expensive to build, so they are cached in a bounded LRU
/// keyed by `(track_id, preset, intensity, config_hash)`. On hit the entry
/// becomes most-recently-used; on insertion past capacity the
/// least-recently-used pipeline is evicted. A mutex serializes access and
/// is never held across a DSP call.
///
/// A cached pipeline carries its `ProcessingState`, so handing the same
/// processor to a second caller requires external synchronization; entries
/// are therefore returned behind `Arc<Mutex<_>>`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::pipeline::Pipeline;
use crate::presets::Preset;

/// Maximum number of cached pipelines.
pub const PROCESSOR_CACHE_MAX_SIZE: usize = 32;

type FactoryKey = (u64, Preset, u32, u64);

pub struct ProcessorFactory {
    cache: Mutex<LruCache<FactoryKey, Arc<Mutex<Pipeline>>>>,
}

impl ProcessorFactory {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PROCESSOR_CACHE_MAX_SIZE).unwrap(),
            )),
        }
    }

    /// Fetch the cached pipeline for this combination, creating it on miss.
    ///
    /// Reusing the cached instance is what keeps compressor envelope state
    /// intact across successive chunk requests for the same track.
    pub fn get_or_create(
        &self,
        track_id: u64,
        preset: &str,
        intensity: f32,
        config_hash: u64,
        sample_rate: u32,
    ) -> Arc<Mutex<Pipeline>> {
        let preset = Preset::parse(preset);
        let key = (track_id, preset, intensity.to_bits(), config_hash);

        let mut cache = self.cache.lock();
        if let Some(pipeline) = cache.get(&key) {
            tracing::debug!("processor cache hit: track {} preset {}", track_id, preset.name());
            return pipeline.clone();
        }

        tracing::info!(
            "creating processor: track {} preset {} intensity {}",
            track_id,
            preset.name(),
            intensity
        );
        let pipeline = Arc::new(Mutex::new(Pipeline::with_rate(
            preset.name(),
            intensity,
            sample_rate,
        )));
        cache.put(key, pipeline.clone());
        pipeline
    }

    /// Whether a combination currently has a cached pipeline.
    pub fn contains(&self, track_id: u64, preset: &str, intensity: f32, config_hash: u64) -> bool {
        let key = (
            track_id,
            Preset::parse(preset),
            intensity.to_bits(),
            config_hash,
        );
        self.cache.lock().peek(&key).is_some()
    }

    /// Drop every cached pipeline for a track (e.g. when its file changes).
    pub fn evict_track(&self, track_id: u64) {
        let mut cache = self.cache.lock();
        let stale: Vec<FactoryKey> = cache
            .iter()
            .filter(|(key, _)| key.0 == track_id)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for ProcessorFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    #[test]
    fn test_same_key_returns_same_instance() {
        let factory = ProcessorFactory::new();
        let a = factory.get_or_create(1, "adaptive", 1.0, 0, SR);
        let b = factory.get_or_create(1, "adaptive", 1.0, 0, SR);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_distinct_keys_create_distinct_instances() {
        let factory = ProcessorFactory::new();
        let a = factory.get_or_create(1, "adaptive", 1.0, 0, SR);
        let b = factory.get_or_create(1, "warm", 1.0, 0, SR);
        let c = factory.get_or_create(1, "adaptive", 0.5, 0, SR);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_lru_eviction_past_capacity() {
        let factory = ProcessorFactory::new();

        // 33 distinct combinations; the first must be evicted
        for track in 0..(PROCESSOR_CACHE_MAX_SIZE as u64 + 1) {
            factory.get_or_create(track, "adaptive", 1.0, 0, SR);
        }
        assert_eq!(factory.len(), PROCESSOR_CACHE_MAX_SIZE);
        assert!(!factory.contains(0, "adaptive", 1.0, 0));
        assert!(factory.contains(1, "adaptive", 1.0, 0));

        // Re-requesting the evicted combination creates a fresh processor
        let fresh = factory.get_or_create(0, "adaptive", 1.0, 0, SR);
        assert_eq!(factory.len(), PROCESSOR_CACHE_MAX_SIZE);
        let again = factory.get_or_create(0, "adaptive", 1.0, 0, SR);
        assert!(Arc::ptr_eq(&fresh, &again));
    }

    #[test]
    fn test_recent_access_survives_eviction() {
        let factory = ProcessorFactory::new();
        for track in 0..PROCESSOR_CACHE_MAX_SIZE as u64 {
            factory.get_or_create(track, "adaptive", 1.0, 0, SR);
        }
        // Touch the oldest entry, then push one more in
        factory.get_or_create(0, "adaptive", 1.0, 0, SR);
        factory.get_or_create(1000, "adaptive", 1.0, 0, SR);

        assert!(factory.contains(0, "adaptive", 1.0, 0));
        assert!(!factory.contains(1, "adaptive", 1.0, 0));
    }

    #[test]
    fn test_evict_track_clears_all_presets() {
        let factory = ProcessorFactory::new();
        factory.get_or_create(5, "adaptive", 1.0, 0, SR);
        factory.get_or_create(5, "warm", 1.0, 0, SR);
        factory.get_or_create(6, "adaptive", 1.0, 0, SR);

        factory.evict_track(5);
        assert!(!factory.contains(5, "adaptive", 1.0, 0));
        assert!(!factory.contains(5, "warm", 1.0, 0));
        assert!(factory.contains(6, "adaptive", 1.0, 0));
    }
}
