use std::fmt;
use std::os::fd::BorrowedFd;

use serde::{Deserialize, Serialize};

// MARK: - FourCc

/// DRM fourcc pixel format code as negotiated with the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn from_chars(code: [u8; 4]) -> Self {
        Self(
            code[0] as u32
                | (code[1] as u32) << 8
                | (code[2] as u32) << 16
                | (code[3] as u32) << 24,
        )
    }

    // 8 bits per channel
    pub const XRGB8888: Self = Self::from_chars(*b"XR24");
    pub const ARGB8888: Self = Self::from_chars(*b"AR24");
    pub const XBGR8888: Self = Self::from_chars(*b"XB24");
    pub const ABGR8888: Self = Self::from_chars(*b"AB24");
    pub const RGBX8888: Self = Self::from_chars(*b"RX24");
    pub const RGBA8888: Self = Self::from_chars(*b"RA24");
    pub const BGRX8888: Self = Self::from_chars(*b"BX24");
    pub const BGRA8888: Self = Self::from_chars(*b"BA24");

    // 10 bits per channel
    pub const XRGB2101010: Self = Self::from_chars(*b"XR30");
    pub const XBGR2101010: Self = Self::from_chars(*b"XB30");
    pub const RGBX1010102: Self = Self::from_chars(*b"RX30");
    pub const BGRX1010102: Self = Self::from_chars(*b"BX30");
    pub const ARGB2101010: Self = Self::from_chars(*b"AR30");
    pub const ABGR2101010: Self = Self::from_chars(*b"AB30");
    pub const RGBA1010102: Self = Self::from_chars(*b"RA30");
    pub const BGRA1010102: Self = Self::from_chars(*b"BA30");

    // 16 bits per channel
    pub const XBGR16161616: Self = Self::from_chars(*b"XB48");
    pub const ABGR16161616: Self = Self::from_chars(*b"AB48");

    pub fn code(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_le_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

// MARK: - FrameDescriptor

/// Frame geometry most recently reported by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub format: FourCc,
    pub width:  u32,
    pub height: u32,
}

impl FrameDescriptor {
    pub fn new(format: FourCc, width: u32, height: u32) -> Self {
        Self { format, width, height }
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} {}", self.width, self.height, self.format)
    }
}

// MARK: - Renderer color format / space

/// Texture color formats the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    /// 8-bit BGR, X byte unused.
    Bgrx,
    /// 10-bit RGB, 2-bit alpha.
    R10G10B10A2,
    /// 16-bit RGBA.
    Rgba16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    /// Standard-range sRGB.
    #[default]
    Srgb,
    /// Extended-range sRGB, half-float.
    Srgb16F,
}

impl ColorSpace {
    /// True when drawing into `target` needs an sRGB decompress pass.
    pub fn needs_srgb_decompress(&self, target: ColorSpace) -> bool {
        *self != ColorSpace::Srgb && target != ColorSpace::Srgb
    }
}

/// Fixed lookup from the negotiated pixel format to the renderer format.
///
/// Anything not listed is treated as 8 bits per channel.
pub fn color_mapping(format: FourCc) -> (ColorFormat, ColorSpace) {
    match format {
        FourCc::XRGB2101010
        | FourCc::XBGR2101010
        | FourCc::RGBX1010102
        | FourCc::BGRX1010102
        | FourCc::ARGB2101010
        | FourCc::ABGR2101010
        | FourCc::RGBA1010102
        | FourCc::BGRA1010102 => (ColorFormat::R10G10B10A2, ColorSpace::Srgb16F),
        FourCc::XBGR16161616 | FourCc::ABGR16161616 => (ColorFormat::Rgba16, ColorSpace::Srgb16F),
        _ => (ColorFormat::Bgrx, ColorSpace::Srgb),
    }
}

// MARK: - DmabufLayout

/// Single-plane DMA-BUF layout of a GPU buffer object.
///
/// The fd is borrowed from the backing store; importers that need to keep it
/// must duplicate it.
#[derive(Debug, Clone, Copy)]
pub struct DmabufLayout<'a> {
    pub fd:         BorrowedFd<'a>,
    pub offset:     u32,
    pub stride:     u32,
    pub modifier:   u64,
    pub descriptor: FrameDescriptor,
}

impl DmabufLayout<'_> {
    pub fn modifier_hi(&self) -> u32 {
        (self.modifier >> 32) as u32
    }

    pub fn modifier_lo(&self) -> u32 {
        (self.modifier & 0xFFFF_FFFF) as u32
    }
}

// MARK: - OutputSummary

/// Presentation view of a discovered output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub name: String,
    pub description: Option<String>,
}

impl OutputSummary {
    /// `"<name>: <description>"`, falling back to `"no description"`.
    pub fn label(&self) -> String {
        format!(
            "{}: {}",
            self.name,
            self.description.as_deref().unwrap_or("no description")
        )
    }
}

// MARK: - CaptureStats

/// Counters maintained by the capture thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub frames_captured:    u64,
    pub cycles_failed:      u64,
    pub buffer_recreations: u64,
    pub overruns:           u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_matches_drm_codes() {
        assert_eq!(FourCc::XRGB8888.code(), 0x3432_5258);
        assert_eq!(FourCc::ABGR16161616.code(), 0x3834_4241);
        assert_eq!(FourCc::XRGB2101010.to_string(), "XR30");
    }

    #[test]
    fn ten_bit_formats_map_to_r10g10b10a2() {
        for f in [
            FourCc::XRGB2101010,
            FourCc::XBGR2101010,
            FourCc::RGBX1010102,
            FourCc::BGRX1010102,
            FourCc::ARGB2101010,
            FourCc::ABGR2101010,
            FourCc::RGBA1010102,
            FourCc::BGRA1010102,
        ] {
            assert_eq!(color_mapping(f), (ColorFormat::R10G10B10A2, ColorSpace::Srgb16F), "{f}");
        }
    }

    #[test]
    fn sixteen_bit_and_default_mapping() {
        assert_eq!(color_mapping(FourCc::ABGR16161616), (ColorFormat::Rgba16, ColorSpace::Srgb16F));
        assert_eq!(color_mapping(FourCc::XBGR16161616), (ColorFormat::Rgba16, ColorSpace::Srgb16F));
        assert_eq!(color_mapping(FourCc::XRGB8888), (ColorFormat::Bgrx, ColorSpace::Srgb));
        assert_eq!(color_mapping(FourCc(0)), (ColorFormat::Bgrx, ColorSpace::Srgb));
    }

    #[test]
    fn srgb_decompress_only_between_extended_spaces() {
        assert!(!ColorSpace::Srgb.needs_srgb_decompress(ColorSpace::Srgb16F));
        assert!(!ColorSpace::Srgb16F.needs_srgb_decompress(ColorSpace::Srgb));
        assert!(ColorSpace::Srgb16F.needs_srgb_decompress(ColorSpace::Srgb16F));
    }

    #[test]
    fn output_label_without_description() {
        let out = OutputSummary { name: "HDMI-A-1".into(), description: None };
        assert_eq!(out.label(), "HDMI-A-1: no description");
        let out = OutputSummary { name: "DP-2".into(), description: Some("Dell U2720Q".into()) };
        assert_eq!(out.label(), "DP-2: Dell U2720Q");
    }

    #[test]
    fn modifier_split() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let layout = DmabufLayout {
            fd: std::os::fd::AsFd::as_fd(&file),
            offset: 0,
            stride: 7680,
            modifier: 0x0100_0000_0000_0002,
            descriptor: FrameDescriptor::new(FourCc::XRGB8888, 1920, 1080),
        };
        assert_eq!(layout.modifier_hi(), 0x0100_0000);
        assert_eq!(layout.modifier_lo(), 0x0000_0002);
    }
}
