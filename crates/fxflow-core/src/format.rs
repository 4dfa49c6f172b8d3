//! Pixel storage formats.
//!
//! The engine does not interpret pixel semantics; formats exist so that
//! buffer reuse decisions can compare allocations ([`PixelFormat`] +
//! [`Size`](crate::Size) fully determine an allocation).

/// Pixel storage format of a GPU image buffer.
///
/// Buffers are interleaved RGBA, row-major, top-to-bottom. The engine
/// default is [`Rgba32F`](PixelFormat::Rgba32F): four `f32` components per
/// pixel, which is what the built-in compute kernels operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 32-bit float RGBA, 16 bytes per pixel. Engine default.
    #[default]
    Rgba32F,
    /// 8-bit unsigned RGBA, 4 bytes per pixel.
    Rgba8,
}

impl PixelFormat {
    /// Number of channels per pixel.
    #[inline]
    pub const fn channels(&self) -> u32 {
        4
    }

    /// Bytes occupied by one pixel.
    #[inline]
    pub const fn bytes_per_pixel(&self) -> u64 {
        match self {
            PixelFormat::Rgba32F => 16,
            PixelFormat::Rgba8 => 4,
        }
    }

    /// Byte length of an image of `size` in this format.
    #[inline]
    pub fn byte_len(&self, size: crate::Size) -> u64 {
        size.area() * self.bytes_per_pixel()
    }

    /// Short lowercase name, used in buffer labels and log lines.
    pub const fn name(&self) -> &'static str {
        match self {
            PixelFormat::Rgba32F => "rgba32f",
            PixelFormat::Rgba8 => "rgba8",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Size;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgba32F.bytes_per_pixel(), 16);
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_byte_len() {
        assert_eq!(PixelFormat::Rgba32F.byte_len(Size::new(2, 2)), 64);
        assert_eq!(PixelFormat::Rgba8.byte_len(Size::new(10, 10)), 400);
    }

    #[test]
    fn test_default_is_rgba32f() {
        assert_eq!(PixelFormat::default(), PixelFormat::Rgba32F);
    }
}
