#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # wsglue: window-system glue for GPU drivers
//!
//! This crate sits between the window-system-independent part of a GPU driver and a Wayland-style
//! display protocol. The driver asks it for buffers to render into and hands finished frames back;
//! the crate takes care of allocating, importing and presenting those buffers.
//!
//! ## Structure of the crate
//!
//! - [`ws`] contains the window-system operations. A [`ws::Display`] is bound either to a client
//!   of a display server or to the display server itself, and manages windows and pixmaps on top
//!   of it.
//! - [`backend`] contains the device side: the shared device context, the memory binder turning
//!   cpu memory and shareable handles into device addresses, and the back-buffer ring of windows.
//! - [`wayland`] describes the protocol transports the window system consumes. Nothing in this
//!   crate talks to a socket; the embedder provides the transports through a [`ws::Platform`].
//! - [`format`] and [`config`] hold the advertised configs and capabilities and the tunables read
//!   from the driver hint store.
//!
//! ## Threading
//!
//! A display and everything created from it is meant to be used from one thread. The device
//! context is shared between displays of the same thread through reference counting.
//!
//! ### Logging
//!
//! wsglue makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod format;
pub mod utils;
pub mod wayland;
pub mod ws;

pub use error::{Result, WsError};
