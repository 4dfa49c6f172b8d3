//! Image dimension types.
//!
//! [`Size`] is the unit of every allocation and reuse decision in the
//! engine: an image buffer is reallocated only when the requested size or
//! format differs from its current allocation.

use std::fmt;

/// Image dimensions in pixels.
///
/// # Example
///
/// ```rust
/// use fxflow_core::Size;
///
/// let size = Size::new(1920, 1080);
/// assert_eq!(size.area(), 1920 * 1080);
/// assert!(!size.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct Size {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Size {
    /// Creates a new size.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either dimension is zero.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_area() {
        assert_eq!(Size::new(4, 3).area(), 12);
        assert_eq!(Size::new(0, 100).area(), 0);
    }

    #[test]
    fn test_size_empty() {
        assert!(Size::new(0, 10).is_empty());
        assert!(Size::new(10, 0).is_empty());
        assert!(!Size::new(1, 1).is_empty());
    }

    #[test]
    fn test_size_display() {
        assert_eq!(Size::new(1920, 1080).to_string(), "1920x1080");
    }
}
