use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unsupported output bit depth {0}, expected 8, 16 or 32")]
pub struct UnsupportedBitDepth(pub u32);

/// Pixel layout the engine writes into a processed image.
///
/// The host's destination buffer must match the layout byte-for-byte, so the
/// session negotiates one format at open time and forces it on every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceFormat {
    /// Interleaved B, G, R, A at 8 bits per channel.
    BgraU8,
    /// Three full-size planes (R, G, B) of little-endian `u16`.
    RgbU16Planar,
    /// Three full-size planes (R, G, B) of little-endian `f32`.
    RgbF32Planar,
}

impl ResourceFormat {
    /// Maps the host's requested bit depth to the only layout allowed for it.
    pub fn from_bit_depth(bit_depth: u32) -> Result<Self, UnsupportedBitDepth> {
        match bit_depth {
            8 => Ok(Self::BgraU8),
            16 => Ok(Self::RgbU16Planar),
            32 => Ok(Self::RgbF32Planar),
            other => Err(UnsupportedBitDepth(other)),
        }
    }

    pub fn bit_depth(self) -> u32 {
        match self {
            Self::BgraU8 => 8,
            Self::RgbU16Planar => 16,
            Self::RgbF32Planar => 32,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::BgraU8 => 4,
            Self::RgbU16Planar => 3 * 2,
            Self::RgbF32Planar => 3 * 4,
        }
    }

    pub fn is_planar(self) -> bool {
        !matches!(self, Self::BgraU8)
    }

    /// Exact size in bytes of one decoded frame in this layout.
    pub fn frame_size_bytes(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BgraU8 => "bgra-u8",
            Self::RgbU16Planar => "rgb-u16-planar",
            Self::RgbF32Planar => "rgb-f32-planar",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::packed_8(8, ResourceFormat::BgraU8)]
    #[case::planar_16(16, ResourceFormat::RgbU16Planar)]
    #[case::planar_float_32(32, ResourceFormat::RgbF32Planar)]
    fn test_from_bit_depth(#[case] depth: u32, #[case] expected: ResourceFormat) {
        let format = ResourceFormat::from_bit_depth(depth).unwrap();
        assert_eq!(format, expected);
        assert_eq!(format.bit_depth(), depth);
    }

    #[rstest]
    #[case(0)]
    #[case(10)]
    #[case(12)]
    #[case(24)]
    #[case(64)]
    fn test_from_bit_depth_rejects_others(#[case] depth: u32) {
        assert_eq!(
            ResourceFormat::from_bit_depth(depth),
            Err(UnsupportedBitDepth(depth))
        );
    }

    #[rstest]
    #[case(ResourceFormat::BgraU8, 4)]
    #[case(ResourceFormat::RgbU16Planar, 6)]
    #[case(ResourceFormat::RgbF32Planar, 12)]
    fn test_frame_size_bytes(#[case] format: ResourceFormat, #[case] bpp: usize) {
        assert_eq!(format.bytes_per_pixel(), bpp);
        assert_eq!(format.frame_size_bytes(1920, 1080), 1920 * 1080 * bpp);
        assert_eq!(format.frame_size_bytes(0, 1080), 0);
    }

    #[test]
    fn test_only_bgra_is_packed() {
        assert!(!ResourceFormat::BgraU8.is_planar());
        assert!(ResourceFormat::RgbU16Planar.is_planar());
        assert!(ResourceFormat::RgbF32Planar.is_planar());
    }

    #[test]
    fn test_unsupported_bit_depth_message() {
        let msg = UnsupportedBitDepth(12).to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("8, 16 or 32"));
    }
}
