//! Geometry shared by the renderer and the transports

mod geometry;

pub use self::geometry::{Buffer, Gl, Logical, Point, Rectangle, Size};
