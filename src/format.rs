//! Pixel formats, configs and capabilities
//!
//! The tables in this module describe what both window-system implementations advertise to the
//! renderer: the pixel formats a drawable may use, the frame buffer configs built from them and
//! the capability values of each side.
//!
//! ```
//! # use wsglue::format::PixelFormat;
//! assert_eq!(PixelFormat::Nv12.bits_per_pixel(), 12);
//! assert!(PixelFormat::Nv12.is_yuv());
//! assert_eq!(PixelFormat::from_fourcc(drm_fourcc::DrmFourcc::Xrgb8888), Some(PixelFormat::Xrgb8888));
//! ```

use drm_fourcc::DrmFourcc as Fourcc;

/// Generates [`PixelFormat`] together with its lookup functions.
macro_rules! pixel_formats {
    (
        $($name: ident {
            fourcc: $fourcc: ident,
            bpp: $bpp: expr,
            yuv: $yuv: expr $(,)?
        }),* $(,)?
    ) => {
        /// Pixel formats understood by the renderer
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PixelFormat {
            $(
                #[doc = concat!("`", stringify!($fourcc), "` layout")]
                $name,
            )*
        }

        impl PixelFormat {
            /// Bits per pixel, averaged over all planes
            pub const fn bits_per_pixel(self) -> u32 {
                match self {
                    $(PixelFormat::$name => $bpp,)*
                }
            }

            /// Whether the format stores luma and chroma samples
            pub const fn is_yuv(self) -> bool {
                match self {
                    $(PixelFormat::$name => $yuv,)*
                }
            }

            /// DRM fourcc of the format
            pub const fn fourcc(self) -> Fourcc {
                match self {
                    $(PixelFormat::$name => Fourcc::$fourcc,)*
                }
            }

            /// Format matching a DRM fourcc, if it is supported
            pub const fn from_fourcc(fourcc: Fourcc) -> Option<PixelFormat> {
                match fourcc {
                    $(Fourcc::$fourcc => Some(PixelFormat::$name),)*
                    _ => None,
                }
            }
        }

        #[cfg(test)]
        fn _impl_formats() -> &'static [PixelFormat] {
            &[$(PixelFormat::$name,)*]
        }
    };
}

pixel_formats! {
    Rgb565 { fourcc: Rgb565, bpp: 16, yuv: false },
    Argb1555 { fourcc: Argb1555, bpp: 16, yuv: false },
    Argb4444 { fourcc: Argb4444, bpp: 16, yuv: false },
    Argb8888 { fourcc: Argb8888, bpp: 32, yuv: false },
    Xrgb8888 { fourcc: Xrgb8888, bpp: 32, yuv: false },

    // packed 4:2:2
    Uyvy { fourcc: Uyvy, bpp: 16, yuv: true },
    Yuyv { fourcc: Yuyv, bpp: 16, yuv: true },
    Vyuy { fourcc: Vyuy, bpp: 16, yuv: true },
    Yvyu { fourcc: Yvyu, bpp: 16, yuv: true },

    // planar 4:2:0
    Nv12 { fourcc: Nv12, bpp: 12, yuv: true },
    Nv21 { fourcc: Nv21, bpp: 12, yuv: true },
    I420 { fourcc: Yuv420, bpp: 12, yuv: true },
    Yv12 { fourcc: Yvu420, bpp: 12, yuv: true },

    // planar 4:2:2
    Nv16 { fourcc: Nv16, bpp: 16, yuv: true },
}

impl PixelFormat {
    /// Whether the format is one of the 4:2:0 layouts whose pitch equals the luma stride
    pub const fn is_420(self) -> bool {
        matches!(
            self,
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::I420 | PixelFormat::Yv12
        )
    }

    /// Bytes per texel in the first plane of a yuv format
    pub(crate) const fn plane0_bytes(self) -> Option<u32> {
        match self {
            PixelFormat::Uyvy
            | PixelFormat::Yuyv
            | PixelFormat::Vyuy
            | PixelFormat::Yvyu
            | PixelFormat::Nv16 => Some(2),
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::I420 | PixelFormat::Yv12 => Some(1),
            _ => None,
        }
    }
}

/// Colorspace of yuv content
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YuvColorspace {
    /// BT.601, limited range
    Bt601Conformant,
    /// BT.601, full range
    #[default]
    Bt601Full,
    /// BT.709, limited range
    Bt709Conformant,
    /// BT.709, full range
    Bt709Full,
}

/// Chroma sample position used when interpolating
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaInterp {
    /// Co-sited with the first luma sample
    #[default]
    Zero,
    /// A quarter of the way between luma samples
    Quarter,
    /// Centered between luma samples
    Half,
    /// Three quarters of the way between luma samples
    ThreeQuarters,
}

/// Colorspace and chroma siting of a yuv buffer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YuvInfo {
    /// Colorspace of the samples
    pub colorspace: YuvColorspace,
    /// Siting of the U samples
    pub chroma_u: ChromaInterp,
    /// Siting of the V samples
    pub chroma_v: ChromaInterp,
}

/// Format word describing a caller-owned memory pixmap
///
/// Bits 0..8 select the pixel format, bits 8..16 the yuv colorspace and the two upper bytes
/// the chroma siting of U and V.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFormat(pub u32);

impl NativeFormat {
    /// `RGB565` pixel data
    pub const RGB565: u32 = 0;
    /// `ARGB1555` pixel data
    pub const ARGB1555: u32 = 1;
    /// `ARGB4444` pixel data
    pub const ARGB4444: u32 = 2;
    /// `ARGB8888` pixel data
    pub const ARGB8888: u32 = 3;
    /// `UYVY` pixel data
    pub const UYVY: u32 = 4;
    /// `NV12` pixel data
    pub const NV12: u32 = 5;
    /// `YUYV` pixel data
    pub const YUYV: u32 = 6;
    /// `VYUY` pixel data
    pub const VYUY: u32 = 7;
    /// `YVYU` pixel data
    pub const YVYU: u32 = 8;
    /// `NV21` pixel data
    pub const NV21: u32 = 9;
    /// `I420` pixel data
    pub const I420: u32 = 10;
    /// `YV12` pixel data
    pub const YV12: u32 = 11;
    /// `NV16` pixel data
    pub const NV16: u32 = 12;

    /// BT.601 limited range
    pub const BT601_CONFORMANT: u32 = 0x0000_0100;
    /// BT.601 full range
    pub const BT601_FULL: u32 = 0x0000_0200;
    /// BT.709 limited range
    pub const BT709_CONFORMANT: u32 = 0x0000_0300;
    /// BT.709 full range
    pub const BT709_FULL: u32 = 0x0000_0400;

    /// U samples co-sited
    pub const CHROMA_U_ZERO: u32 = 0x0001_0000;
    /// U samples at a quarter
    pub const CHROMA_U_QUARTER: u32 = 0x0002_0000;
    /// U samples centered
    pub const CHROMA_U_HALF: u32 = 0x0003_0000;
    /// U samples at three quarters
    pub const CHROMA_U_THREEQUARTERS: u32 = 0x0004_0000;
    /// V samples co-sited
    pub const CHROMA_V_ZERO: u32 = 0x0100_0000;
    /// V samples at a quarter
    pub const CHROMA_V_QUARTER: u32 = 0x0200_0000;
    /// V samples centered
    pub const CHROMA_V_HALF: u32 = 0x0300_0000;
    /// V samples at three quarters
    pub const CHROMA_V_THREEQUARTERS: u32 = 0x0400_0000;

    const MASK_FORMAT: u32 = 0x0000_00FF;
    const MASK_COLORSPACE: u32 = 0x0000_FF00;
    const MASK_CHROMA_U: u32 = 0x00FF_0000;
    const MASK_CHROMA_V: u32 = 0xFF00_0000;

    /// Pixel format selected by the word, `None` for unknown codes
    pub fn pixel_format(self) -> Option<PixelFormat> {
        Some(match self.0 & Self::MASK_FORMAT {
            Self::RGB565 => PixelFormat::Rgb565,
            Self::ARGB1555 => PixelFormat::Argb1555,
            Self::ARGB4444 => PixelFormat::Argb4444,
            Self::ARGB8888 => PixelFormat::Argb8888,
            Self::UYVY => PixelFormat::Uyvy,
            Self::NV12 => PixelFormat::Nv12,
            Self::YUYV => PixelFormat::Yuyv,
            Self::VYUY => PixelFormat::Vyuy,
            Self::YVYU => PixelFormat::Yvyu,
            Self::NV21 => PixelFormat::Nv21,
            Self::I420 => PixelFormat::I420,
            Self::YV12 => PixelFormat::Yv12,
            Self::NV16 => PixelFormat::Nv16,
            _ => return None,
        })
    }

    /// Colorspace and chroma siting encoded in the word
    ///
    /// Unknown values fall back to BT.601 full range and co-sited chroma.
    pub fn yuv_info(self) -> YuvInfo {
        let colorspace = match self.0 & Self::MASK_COLORSPACE {
            Self::BT601_CONFORMANT => YuvColorspace::Bt601Conformant,
            Self::BT709_CONFORMANT => YuvColorspace::Bt709Conformant,
            Self::BT709_FULL => YuvColorspace::Bt709Full,
            _ => YuvColorspace::Bt601Full,
        };
        let chroma_u = match self.0 & Self::MASK_CHROMA_U {
            Self::CHROMA_U_QUARTER => ChromaInterp::Quarter,
            Self::CHROMA_U_HALF => ChromaInterp::Half,
            Self::CHROMA_U_THREEQUARTERS => ChromaInterp::ThreeQuarters,
            _ => ChromaInterp::Zero,
        };
        let chroma_v = match self.0 & Self::MASK_CHROMA_V {
            Self::CHROMA_V_QUARTER => ChromaInterp::Quarter,
            Self::CHROMA_V_HALF => ChromaInterp::Half,
            Self::CHROMA_V_THREEQUARTERS => ChromaInterp::ThreeQuarters,
            _ => ChromaInterp::Zero,
        };
        YuvInfo {
            colorspace,
            chroma_u,
            chroma_v,
        }
    }
}

bitflags::bitflags! {
    /// Drawable kinds a config can be used with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DrawableTypes: u32 {
        /// On-screen windows
        const WINDOW = 1;
        /// Off-screen pixmaps
        const PIXMAP = 2;
    }
}

/// A frame buffer config advertised to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Drawable kinds this config may be used for
    pub drawable_types: DrawableTypes,
    /// Pixel format of the color buffer
    pub format: PixelFormat,
    /// Whether the config passes conformance
    pub conformant: bool,
}

impl Config {
    /// Native visual of the config
    pub fn native_visual(&self) -> Fourcc {
        self.format.fourcc()
    }
}

/// Configs shared by both window-system implementations
pub static CONFIGS: [Config; 5] = [
    Config {
        drawable_types: DrawableTypes::WINDOW.union(DrawableTypes::PIXMAP),
        format: PixelFormat::Argb8888,
        conformant: true,
    },
    Config {
        drawable_types: DrawableTypes::WINDOW.union(DrawableTypes::PIXMAP),
        format: PixelFormat::Xrgb8888,
        conformant: true,
    },
    Config {
        drawable_types: DrawableTypes::PIXMAP,
        format: PixelFormat::Rgb565,
        conformant: true,
    },
    Config {
        drawable_types: DrawableTypes::PIXMAP,
        format: PixelFormat::Argb1555,
        conformant: true,
    },
    Config {
        drawable_types: DrawableTypes::PIXMAP,
        format: PixelFormat::Argb4444,
        conformant: false,
    },
];

/// Capability advertised by a window-system implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Window drawables synchronise through the buffer itself
    WindowsUseHwSync,
    /// Pixmap drawables synchronise through the buffer itself
    PixmapsUseHwSync,
    /// Smallest accepted swap interval
    MinSwapInterval,
    /// Largest accepted swap interval
    MaxSwapInterval,
    /// External images may be sampled
    ImageExternalSupport,
}

/// Capabilities of the client side
pub static CLIENT_CAPS: [(Capability, u32); 5] = [
    (Capability::WindowsUseHwSync, 1),
    (Capability::PixmapsUseHwSync, 1),
    (Capability::MinSwapInterval, 0),
    (Capability::MaxSwapInterval, 1),
    (Capability::ImageExternalSupport, 1),
];

/// Capabilities of the compositor side
pub static COMPOSITOR_CAPS: [(Capability, u32); 3] = [
    (Capability::WindowsUseHwSync, 0),
    (Capability::PixmapsUseHwSync, 1),
    (Capability::ImageExternalSupport, 1),
];

/// Look up a capability value in a capability table
pub fn capability(caps: &[(Capability, u32)], cap: Capability) -> Option<u32> {
    caps.iter().find(|(c, _)| *c == cap).map(|(_, v)| *v)
}
