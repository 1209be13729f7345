use smallvec::{smallvec, SmallVec};

use super::{DeviceAddress, Mapping, MemDesc};
use crate::{
    error::WsError,
    format::{PixelFormat, YuvInfo},
};

/// Memory layout of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Row length in pixels
    pub stride: u32,
    /// Row length in bytes
    pub pitch: u32,
    /// Size of the allocation in bytes
    pub size: u64,
    /// Pixel format
    pub format: PixelFormat,
    /// Colorspace information, only meaningful for yuv formats
    pub yuv: YuvInfo,
}

bitflags::bitflags! {
    /// Flags passed along with [`DrawableParams`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DrawableFlags: u32 {
        /// Synchronisation happens on the buffer, no separate sync object is attached
        const BUFFER_SYNC = 1;
    }
}

/// Placement of a buffer handed to the renderer
///
/// No fence is ever attached to the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableParams {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Pixel format
    pub format: PixelFormat,
    /// Row length in pixels
    pub stride: u32,
    /// Row length in bytes
    pub stride_bytes: u32,
    /// Device address of the first plane
    pub address: DeviceAddress,
    /// Allocation backing the buffer
    pub memdesc: MemDesc,
    /// Swaps since the buffer was last presented, 0 if it never was
    pub buffer_age: u32,
    /// Additional flags
    pub flags: DrawableFlags,
}

/// Placement of a buffer sampled as an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParams {
    /// Parameters shared with drawables
    pub base: DrawableParams,
    /// Size of the allocation in bytes
    pub alloc_size: u64,
    /// Colorspace and chroma siting
    pub yuv: YuvInfo,
    /// Device address of every plane
    pub planes: SmallVec<[DeviceAddress; 3]>,
    /// Row length of the first plane in texels, for yuv formats
    pub plane0_stride: Option<u32>,
}

impl Mapping {
    /// Parameters to render into this buffer
    pub fn drawable_params(&self, layout: &BufferLayout, window: bool, buffer_age: u32) -> DrawableParams {
        DrawableParams {
            width: layout.width,
            height: layout.height,
            format: layout.format,
            stride: layout.stride,
            stride_bytes: layout.pitch,
            address: self.device_address(),
            memdesc: self.memdesc(),
            buffer_age,
            flags: if window {
                DrawableFlags::BUFFER_SYNC
            } else {
                DrawableFlags::empty()
            },
        }
    }

    /// Parameters to sample this buffer as an image
    ///
    /// Fails with [`WsError::BadNativePixmap`] if the pitch of a yuv buffer is not a whole number
    /// of texels.
    pub fn image_params(&self, layout: &BufferLayout) -> Result<ImageParams, WsError> {
        let base = DrawableParams {
            flags: DrawableFlags::empty(),
            ..self.drawable_params(layout, false, 0)
        };
        let mut params = ImageParams {
            base,
            alloc_size: layout.size,
            yuv: layout.yuv,
            planes: smallvec![base.address],
            plane0_stride: None,
        };
        if !layout.format.is_yuv() {
            return Ok(params);
        }

        let pitch = u64::from(layout.pitch);
        let height = layout.height.max(0) as u64;
        let plane_sizes = match layout.format {
            PixelFormat::Nv12 | PixelFormat::Nv21 => [Some(pitch * height), None],
            PixelFormat::Nv16 => [Some((pitch >> 1) * height), None],
            PixelFormat::I420 | PixelFormat::Yv12 => {
                [Some(pitch * height), Some((pitch >> 1) * (height >> 1))]
            }
            // packed
            _ => [None, None],
        };
        let mut address = base.address;
        for size in plane_sizes.into_iter().flatten() {
            address = address.offset(size);
            params.planes.push(address);
        }

        let plane_bytes = layout.format.plane0_bytes().ok_or(WsError::BadNativePixmap)?;
        if layout.pitch % plane_bytes != 0 {
            return Err(WsError::BadNativePixmap);
        }
        params.plane0_stride = Some(layout.pitch / plane_bytes);

        Ok(params)
    }
}
