use std::{fmt, marker::PhantomData};

/// Surface-local coordinate space of the display protocol
#[derive(Debug)]
pub struct Logical;

/// Pixel rows of a buffer in memory order, origin top-left
#[derive(Debug)]
pub struct Buffer;

/// Framebuffer space of the renderer, origin bottom-left
#[derive(Debug)]
pub struct Gl;

/// A position in the coordinate space `Kind`
pub struct Point<N, Kind> {
    /// horizontal coordinate
    pub x: N,
    /// vertical coordinate
    pub y: N,
    _kind: PhantomData<Kind>,
}

/// Dimensions in the coordinate space `Kind`
pub struct Size<N, Kind> {
    /// width
    pub w: N,
    /// height
    pub h: N,
    _kind: PhantomData<Kind>,
}

/// An area given by its corner nearest to the origin and its dimensions
pub struct Rectangle<N, Kind> {
    /// Corner nearest to the origin
    pub loc: Point<N, Kind>,
    /// Width and height
    pub size: Size<N, Kind>,
}

// The coordinate space is a phantom, so none of these may require anything of `Kind`.
macro_rules! kinded {
    ($ty:ident { $($field:ident),+ } $(, $phantom:ident)?) => {
        impl<N: Clone, Kind> Clone for $ty<N, Kind> {
            fn clone(&self) -> Self {
                $ty {
                    $($field: self.$field.clone(),)+
                    $($phantom: PhantomData,)?
                }
            }
        }

        impl<N: Copy, Kind> Copy for $ty<N, Kind> {}

        impl<N: PartialEq, Kind> PartialEq for $ty<N, Kind> {
            fn eq(&self, other: &Self) -> bool {
                true $(&& self.$field == other.$field)+
            }
        }

        impl<N: Eq, Kind> Eq for $ty<N, Kind> {}

        impl<N: Default, Kind> Default for $ty<N, Kind> {
            fn default() -> Self {
                $ty {
                    $($field: Default::default(),)+
                    $($phantom: PhantomData,)?
                }
            }
        }

        impl<N: fmt::Debug, Kind> fmt::Debug for $ty<N, Kind> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))+
                    .finish()
            }
        }
    };
}

kinded!(Point { x, y }, _kind);
kinded!(Size { w, h }, _kind);
kinded!(Rectangle { loc, size });

impl<N, Kind> From<(N, N)> for Point<N, Kind> {
    #[inline]
    fn from((x, y): (N, N)) -> Self {
        Point {
            x,
            y,
            _kind: PhantomData,
        }
    }
}

impl<N, Kind> From<(N, N)> for Size<N, Kind> {
    #[inline]
    fn from((w, h): (N, N)) -> Self {
        Size {
            w,
            h,
            _kind: PhantomData,
        }
    }
}

impl<Kind> Size<i32, Kind> {
    /// Whether the size covers no pixel at all
    ///
    /// Negative dimensions count as empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }
}

impl<N, Kind> Rectangle<N, Kind> {
    /// Create a rectangle from its corner and its dimensions
    #[inline]
    pub fn from_loc_and_size(loc: impl Into<Point<N, Kind>>, size: impl Into<Size<N, Kind>>) -> Self {
        Rectangle {
            loc: loc.into(),
            size: size.into(),
        }
    }
}

impl Rectangle<i32, Gl> {
    /// Mirror a framebuffer rectangle into a buffer of height `height`
    ///
    /// `y' = height - y - h`, the width and height are kept.
    #[inline]
    pub fn to_buffer(self, height: i32) -> Rectangle<i32, Buffer> {
        Rectangle::from_loc_and_size(
            (self.loc.x, height - self.loc.y - self.size.h),
            (self.size.w, self.size.h),
        )
    }
}
