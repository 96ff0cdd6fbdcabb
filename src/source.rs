/// Frame Sources
///
/// The decoder seam: the driver consumes PCM through `FrameSource` and
/// never touches files or codecs itself. Any host decoder satisfies the
/// trait; `MemorySource` is the in-memory reference implementation used by
/// tests and by hosts that decode up front.

use crate::buffer::AudioBuffer;
use crate::error::SourceError;

/// Identity facts about the underlying media, used to build the cache file
/// signature. Hosts backed by real files should report the file's mtime,
/// size and path so cached chunks are invalidated when the file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub mtime: String,
    pub size: u64,
    pub path: String,
}

/// Provider of decoded PCM frames.
pub trait FrameSource {
    fn sample_rate(&self) -> u32;

    fn total_frames(&self) -> u64;

    /// Read frames `start..end`. Implementations may clamp `end` to the
    /// available frames; reads entirely past the end return an empty buffer
    /// or a `SourceError` for hard decoder failures.
    fn read_range(&mut self, start: u64, end: u64) -> Result<AudioBuffer, SourceError>;

    /// Identity used for cache signatures. The default derives a weak
    /// identity from the frame count; file-backed sources should override.
    fn identity(&self) -> SourceIdentity {
        SourceIdentity {
            mtime: "0".to_string(),
            size: self.total_frames(),
            path: "memory".to_string(),
        }
    }
}

/// In-memory frame source.
pub struct MemorySource {
    buffer: AudioBuffer,
    sample_rate: u32,
    identity: Option<SourceIdentity>,
}

impl MemorySource {
    pub fn new(buffer: AudioBuffer, sample_rate: u32) -> Self {
        Self {
            buffer,
            sample_rate,
            identity: None,
        }
    }

    /// Attach an explicit identity (e.g. the original file's facts).
    pub fn with_identity(mut self, identity: SourceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl FrameSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_frames(&self) -> u64 {
        self.buffer.frames() as u64
    }

    fn read_range(&mut self, start: u64, end: u64) -> Result<AudioBuffer, SourceError> {
        let total = self.total_frames();
        let start = start.min(total) as usize;
        let end = end.min(total) as usize;
        Ok(self.buffer.slice_frames(start, end.max(start)))
    }

    fn identity(&self) -> SourceIdentity {
        self.identity.clone().unwrap_or(SourceIdentity {
            mtime: "0".to_string(),
            size: self.total_frames(),
            path: "memory".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads_range() {
        let buffer = AudioBuffer::interleaved((0..20).map(|i| i as f32).collect(), 2).unwrap();
        let mut source = MemorySource::new(buffer, 44_100);
        assert_eq!(source.total_frames(), 10);

        let slice = source.read_range(2, 5).unwrap();
        assert_eq!(slice.frames(), 3);
        assert_eq!(slice.samples()[0], 4.0);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let buffer = AudioBuffer::silence(10, 2);
        let mut source = MemorySource::new(buffer, 44_100);
        let slice = source.read_range(50, 60).unwrap();
        assert!(slice.is_empty());
    }

    #[test]
    fn test_identity_override() {
        let source = MemorySource::new(AudioBuffer::silence(10, 2), 44_100).with_identity(
            SourceIdentity {
                mtime: "1700000000".to_string(),
                size: 1234,
                path: "/music/track.flac".to_string(),
            },
        );
        assert_eq!(source.identity().size, 1234);
    }
}
