//! Error codes reported to the rendering client
//!
//! Every exposed operation reports failure through a single [`WsError`] code. Collaborator
//! failures ([`DeviceError`](crate::backend::device::DeviceError),
//! [`BindError`](crate::backend::device::BindError),
//! [`TransportError`](crate::wayland::TransportError)) are mapped to one of these codes at the
//! point where the caller's context decides which one applies.

/// Error code returned by the window-system operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum WsError {
    /// The native display is malformed or of an unknown type
    #[error("The native display is malformed or of an unknown type")]
    BadNativeDisplay,
    /// The native window is malformed or could not be presented to
    #[error("The native window is malformed or could not be presented to")]
    BadNativeWindow,
    /// The native pixmap is malformed or uses an unsupported layout
    #[error("The native pixmap is malformed or uses an unsupported layout")]
    BadNativePixmap,
    /// Waiting was requested on an engine other than the default one
    #[error("Waiting was requested on an engine other than the default one")]
    BadNativeEngine,
    /// An allocation or a device memory binding failed
    #[error("An allocation or a device memory binding failed")]
    OutOfMemory,
    /// The device context could not be set up
    #[error("The device context could not be set up")]
    CannotInitialise,
    /// The drawable is stale, unknown or could not be mapped for the cpu
    #[error("The drawable is stale, unknown or could not be mapped for the cpu")]
    BadDrawable,
    /// The requested combination of drawables is not supported
    #[error("The requested combination of drawables is not supported")]
    BadMatch,
    /// The operation is not implemented by this window system
    #[error("The operation is not implemented by this window system")]
    Unsupported,
    /// Reserved for protection-domain checks
    #[error("Access to the resource was denied")]
    BadAccess,
}

/// Result type used by all window-system operations
pub type Result<T, E = WsError> = std::result::Result<T, E>;
