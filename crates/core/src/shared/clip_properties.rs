use crate::shared::frame_rate::FrameRate;
use crate::shared::resource_format::ResourceFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AudioProperties {
    pub sample_count: u64,
    pub bit_depth: u32,
    pub channel_count: u32,
    pub sample_rate: u32,
}

impl AudioProperties {
    /// Bytes needed to hold `samples` interleaved sample frames.
    pub fn bytes_for(&self, samples: u32) -> usize {
        samples as usize * self.channel_count as usize * self.bit_depth as usize / 8
    }

    pub fn has_audio(&self) -> bool {
        self.sample_count > 0 && self.channel_count > 0
    }
}

/// Everything a host needs to describe an opened clip.
///
/// Immutable once the session is open.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipProperties {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub frame_rate: FrameRate,
    /// Rate as reported by the engine, before reduction.
    pub raw_frame_rate: f32,
    pub format: ResourceFormat,
    pub audio: AudioProperties,
}

impl ClipProperties {
    pub fn frame_size_bytes(&self) -> usize {
        self.format.frame_size_bytes(self.width, self.height)
    }
}
