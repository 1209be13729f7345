//! Window-system operations
//!
//! A [`Display`] is bound at initialisation to one of two implementations of the same
//! [`WindowSystem`] operation set:
//!
//! - [`ClientDisplay`] for applications connected to a display server, presenting windows by
//!   attaching buffers to surfaces;
//! - [`CompositorDisplay`] for the display server itself, rendering into scanout surfaces.
//!
//! The implementation is picked by [`select_implementation`] from the type marker of the native
//! display and never changes afterwards. Every later call is forwarded to it unchanged.
//!
//! All collaborators come from a [`Platform`]: the device driver, both transports and the native
//! object types they work with.
//!
//! ```no_run
//! # fn demo<P: wsglue::ws::Platform>(platform: &P, driver: P::Driver, window: P::Window)
//! #     -> Result<(), wsglue::WsError> {
//! use wsglue::{backend::device::DeviceSession, format::CONFIGS, ws::{Display, NativeWindow, WindowSystem}};
//!
//! let session = DeviceSession::new(driver);
//! let mut display = Display::initialise(platform, &session, None)?;
//! let drawable = display.create_window(&CONFIGS[0], NativeWindow::Client(window))?;
//! let (_source, _render) = display.get_drawable_params(drawable)?;
//! // render ...
//! display.swap_drawable(drawable, &[], None)?;
//! display.delete_drawable(drawable)?;
//! display.close();
//! # Ok(())
//! # }
//! ```

use std::{fmt, ptr::NonNull};

use tracing::{debug, error, info};

use crate::{
    backend::device::{DeviceDriver, DeviceSession, DrawableParams, Fence, ImageParams},
    error::{Result, WsError},
    format::{Capability, Config, NativeFormat, CONFIGS},
    utils::{Gl, Rectangle},
    wayland::{
        client::{ClientTransport, ClientWindow},
        compositor::{CompositorTransport, ScanoutSurface},
        BufferKey, DisplayIdentity, NativeHandle, SharedBuffer, TransportError,
    },
};

mod client;
mod compositor;
mod drawable;

pub use self::client::ClientDisplay;
pub use self::compositor::CompositorDisplay;
pub use self::drawable::{DrawableId, DrawableKind, DrawableState};

/// Collaborators of a window system
pub trait Platform {
    /// Device driver
    type Driver: DeviceDriver;
    /// Native display objects handed in by the application
    type Native: NativeHandle;
    /// Client side transport
    type Client: ClientTransport;
    /// Compositor side transport
    type Compositor: CompositorTransport;
    /// Native windows of a client
    type Window: ClientWindow + fmt::Debug;
    /// Scanout surfaces of a compositor
    type Surface: ScanoutSurface + fmt::Debug;
    /// Shared protocol buffers
    type Pixmap: SharedBuffer + fmt::Debug;

    /// Open the default connection of this process to a display server
    fn connect_default(&self) -> Result<Self::Client, TransportError>;
    /// Wrap a native client display
    fn client_from_native(&self, native: Self::Native) -> Result<Self::Client, TransportError>;
    /// Wrap a native buffer-management device
    fn compositor_from_native(&self, native: Self::Native) -> Result<Self::Compositor, TransportError>;
}

/// Implementation a display is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Implementation {
    /// Client of a display server
    Client,
    /// The display server itself
    Compositor,
}

/// Pick the implementation for a native display
///
/// Without a native display the process is a client of the default display server. Unknown
/// type markers are rejected with [`WsError::BadNativeDisplay`].
pub fn select_implementation(native: Option<&dyn NativeHandle>) -> Result<Implementation> {
    let Some(native) = native else {
        return Ok(Implementation::Client);
    };
    match native.identity() {
        DisplayIdentity::CLIENT_DISPLAY => Ok(Implementation::Client),
        DisplayIdentity::SCANOUT_DEVICE => Ok(Implementation::Compositor),
        identity => {
            debug!(identity = identity.0, "Unknown native display type");
            Err(WsError::BadNativeDisplay)
        }
    }
}

/// A native window
pub enum NativeWindow<P: Platform> {
    /// Window of a client
    Client(P::Window),
    /// Scanout surface of a compositor
    Scanout(P::Surface),
}

impl<P: Platform> fmt::Debug for NativeWindow<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeWindow::Client(window) => f.debug_tuple("Client").field(window).finish(),
            NativeWindow::Scanout(surface) => f.debug_tuple("Scanout").field(surface).finish(),
        }
    }
}

/// A native pixmap
pub enum NativePixmap<P: Platform> {
    /// Buffer shared through the display server
    Shared(P::Pixmap),
    /// Memory owned by the application
    Memory(MemoryPixmap),
}

impl<P: Platform> fmt::Debug for NativePixmap<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativePixmap::Shared(buffer) => f.debug_tuple("Shared").field(buffer).finish(),
            NativePixmap::Memory(pixmap) => f.debug_tuple("Memory").field(pixmap).finish(),
        }
    }
}

/// Pixel memory owned by the application
///
/// The memory has to outlive every drawable created from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPixmap {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Row length in pixels
    pub stride: u32,
    /// Pixel format, colorspace and chroma siting
    pub format: NativeFormat,
    /// First byte of the pixel data
    pub pixels: *const u8,
}

/// Engine a drawable may be synchronised with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeEngine(pub u32);

impl NativeEngine {
    /// The only engine the window system renders with
    pub const DEFAULT: NativeEngine = NativeEngine(0);
}

/// Operations every window-system implementation provides
///
/// Operations without a meaningful implementation have default bodies: copies report
/// [`WsError::BadMatch`], single buffering reports [`WsError::Unsupported`] and the pure
/// notifications succeed.
pub trait WindowSystem<P: Platform> {
    /// Implementation of this display
    fn implementation(&self) -> Implementation;

    /// Capability values advertised to the renderer
    fn capabilities(&self) -> &'static [(Capability, u32)];

    /// Frame buffer configs advertised to the renderer
    fn configs(&self) -> &'static [Config] {
        &CONFIGS
    }

    /// Create a ring-buffered drawable for a native window
    fn create_window(&mut self, config: &Config, window: NativeWindow<P>) -> Result<DrawableId>;

    /// Create a drawable for a native pixmap
    ///
    /// Importing a shared buffer that already backs a drawable returns that drawable with its
    /// reference count incremented.
    fn create_pixmap(&mut self, config: &Config, pixmap: NativePixmap<P>) -> Result<DrawableId>;

    /// Drop a reference to a drawable
    fn delete_drawable(&mut self, id: DrawableId) -> Result<()>;

    /// Destroy notification of a shared buffer
    fn buffer_destroyed(&mut self, key: BufferKey);

    /// Present the current buffer of a drawable
    ///
    /// `damage` is given in renderer coordinates, origin bottom-left. The fence is handed back
    /// to the driver whatever the outcome.
    fn swap_drawable(&mut self, id: DrawableId, damage: &[Rectangle<i32, Gl>], fence: Option<Fence>) -> Result<()>;

    /// Set the swap interval of a window
    fn set_swap_interval(&mut self, id: DrawableId, interval: i32) -> Result<()>;

    /// Wait until native rendering into the drawable finished
    fn wait_native(&mut self, id: DrawableId, engine: NativeEngine) -> Result<()>;

    /// Copy a drawable into a native pixmap
    fn copy_from_drawable(&mut self, _id: DrawableId, _pixmap: &NativePixmap<P>) -> Result<()> {
        Err(WsError::BadMatch)
    }

    /// Copy a pbuffer into a native pixmap
    fn copy_from_pbuffer(&mut self, _pbuffer: &DrawableParams, _pixmap: &NativePixmap<P>) -> Result<()> {
        Err(WsError::BadMatch)
    }

    /// Parameters of the previously presented and the current buffer, in that order
    fn get_drawable_params(&mut self, id: DrawableId) -> Result<(DrawableParams, DrawableParams)>;

    /// Parameters to sample a pixmap as an image
    fn get_image_params(&mut self, id: DrawableId) -> Result<ImageParams>;

    /// The drawable was made current
    fn connect_drawable(&mut self, _id: DrawableId) -> Result<()> {
        Ok(())
    }

    /// The drawable is no longer current
    fn disconnect_drawable(&mut self, _id: DrawableId) -> Result<()> {
        Ok(())
    }

    /// The renderer starts a new frame
    fn flag_start_frame(&mut self) -> Result<()> {
        Ok(())
    }

    /// Map the buffer rendered into for cpu access
    fn acquire_cpu_mapping(&mut self, id: DrawableId) -> Result<NonNull<u8>>;

    /// Release a mapping acquired with [`WindowSystem::acquire_cpu_mapping`]
    fn release_cpu_mapping(&mut self, id: DrawableId) -> Result<()>;

    /// Whether the back buffer has to be preserved across swaps
    fn set_swap_behaviour(&mut self, _id: DrawableId, _preserve: bool) -> Result<()> {
        Ok(())
    }

    /// Render directly into the front buffer
    fn set_single_buffered(&mut self, _id: DrawableId, _single: bool) -> Result<()> {
        Err(WsError::Unsupported)
    }

    /// The renderer is about to query the drawable
    fn flag_intent_to_query(&mut self, _id: DrawableId) -> Result<()> {
        Ok(())
    }

    /// State of a drawable still known to the display, including pending deletions
    fn drawable_state(&self, id: DrawableId) -> Option<DrawableState>;

    /// Reference count of a drawable
    fn ref_count(&self, id: DrawableId) -> Option<u32>;
}

/// A display bound to one of the window-system implementations
pub enum Display<P: Platform> {
    /// Client of a display server
    Client(ClientDisplay<P>),
    /// The display server itself
    Compositor(CompositorDisplay<P>),
}

impl<P: Platform> fmt::Debug for Display<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Display::Client(display) => f.debug_tuple("Client").field(display).finish(),
            Display::Compositor(display) => f.debug_tuple("Compositor").field(display).finish(),
        }
    }
}

macro_rules! forward {
    ($self: ident, $display: ident => $call: expr) => {
        match $self {
            Display::Client($display) => $call,
            Display::Compositor($display) => $call,
        }
    };
}

impl<P: Platform> Display<P> {
    /// Check whether a native display is usable without initialising it
    pub fn validate(native: Option<&P::Native>) -> Result<Implementation> {
        select_implementation(native.map(|native| native as &dyn NativeHandle))
    }

    /// Initialise a display
    ///
    /// Without a native display a connection to the default display server is opened and owned
    /// by the display.
    pub fn initialise(
        platform: &P,
        session: &DeviceSession<P::Driver>,
        native: Option<P::Native>,
    ) -> Result<Display<P>> {
        let implementation = Self::validate(native.as_ref())?;
        let display = match (implementation, native) {
            (Implementation::Client, native) => {
                let transport = match native {
                    Some(native) => platform.client_from_native(native),
                    None => platform.connect_default(),
                }
                .map_err(|err| {
                    error!(?err, "Failed to connect to the display server");
                    WsError::BadNativeDisplay
                })?;
                Display::Client(ClientDisplay::new(transport, session)?)
            }
            (Implementation::Compositor, Some(native)) => {
                let transport = platform.compositor_from_native(native).map_err(|err| {
                    error!(?err, "Failed to open the buffer-management device");
                    WsError::BadNativeDisplay
                })?;
                Display::Compositor(CompositorDisplay::new(transport, session)?)
            }
            (Implementation::Compositor, None) => return Err(WsError::BadNativeDisplay),
        };
        info!(?implementation, "Display initialised");
        Ok(display)
    }

    /// Close the display, tearing down drawables that are still alive
    pub fn close(self) {
        debug!(implementation = ?self.implementation(), "Closing display");
        drop(self);
    }
}

impl<P: Platform> WindowSystem<P> for Display<P> {
    fn implementation(&self) -> Implementation {
        forward!(self, display => display.implementation())
    }

    fn capabilities(&self) -> &'static [(Capability, u32)] {
        forward!(self, display => display.capabilities())
    }

    fn configs(&self) -> &'static [Config] {
        forward!(self, display => display.configs())
    }

    fn create_window(&mut self, config: &Config, window: NativeWindow<P>) -> Result<DrawableId> {
        forward!(self, display => display.create_window(config, window))
    }

    fn create_pixmap(&mut self, config: &Config, pixmap: NativePixmap<P>) -> Result<DrawableId> {
        forward!(self, display => display.create_pixmap(config, pixmap))
    }

    fn delete_drawable(&mut self, id: DrawableId) -> Result<()> {
        forward!(self, display => display.delete_drawable(id))
    }

    fn buffer_destroyed(&mut self, key: BufferKey) {
        forward!(self, display => display.buffer_destroyed(key))
    }

    fn swap_drawable(&mut self, id: DrawableId, damage: &[Rectangle<i32, Gl>], fence: Option<Fence>) -> Result<()> {
        forward!(self, display => display.swap_drawable(id, damage, fence))
    }

    fn set_swap_interval(&mut self, id: DrawableId, interval: i32) -> Result<()> {
        forward!(self, display => display.set_swap_interval(id, interval))
    }

    fn wait_native(&mut self, id: DrawableId, engine: NativeEngine) -> Result<()> {
        forward!(self, display => display.wait_native(id, engine))
    }

    fn copy_from_drawable(&mut self, id: DrawableId, pixmap: &NativePixmap<P>) -> Result<()> {
        forward!(self, display => display.copy_from_drawable(id, pixmap))
    }

    fn copy_from_pbuffer(&mut self, pbuffer: &DrawableParams, pixmap: &NativePixmap<P>) -> Result<()> {
        forward!(self, display => display.copy_from_pbuffer(pbuffer, pixmap))
    }

    fn get_drawable_params(&mut self, id: DrawableId) -> Result<(DrawableParams, DrawableParams)> {
        forward!(self, display => display.get_drawable_params(id))
    }

    fn get_image_params(&mut self, id: DrawableId) -> Result<ImageParams> {
        forward!(self, display => display.get_image_params(id))
    }

    fn connect_drawable(&mut self, id: DrawableId) -> Result<()> {
        forward!(self, display => display.connect_drawable(id))
    }

    fn disconnect_drawable(&mut self, id: DrawableId) -> Result<()> {
        forward!(self, display => display.disconnect_drawable(id))
    }

    fn flag_start_frame(&mut self) -> Result<()> {
        forward!(self, display => display.flag_start_frame())
    }

    fn acquire_cpu_mapping(&mut self, id: DrawableId) -> Result<NonNull<u8>> {
        forward!(self, display => display.acquire_cpu_mapping(id))
    }

    fn release_cpu_mapping(&mut self, id: DrawableId) -> Result<()> {
        forward!(self, display => display.release_cpu_mapping(id))
    }

    fn set_swap_behaviour(&mut self, id: DrawableId, preserve: bool) -> Result<()> {
        forward!(self, display => display.set_swap_behaviour(id, preserve))
    }

    fn set_single_buffered(&mut self, id: DrawableId, single: bool) -> Result<()> {
        forward!(self, display => display.set_single_buffered(id, single))
    }

    fn flag_intent_to_query(&mut self, id: DrawableId) -> Result<()> {
        forward!(self, display => display.flag_intent_to_query(id))
    }

    fn drawable_state(&self, id: DrawableId) -> Option<DrawableState> {
        forward!(self, display => display.drawable_state(id))
    }

    fn ref_count(&self, id: DrawableId) -> Option<u32> {
        forward!(self, display => display.ref_count(id))
    }
}
