//! Opaque parameter snapshots for kernel constants.
//!
//! Filter parameters are plain-old-data structs uploaded verbatim to GPU
//! uniform buffers. The engine treats them as byte blobs: a [`ParamBlob`]
//! is captured by value at `set_params` time, so in-flight GPU submissions
//! can never alias a filter's live parameter state.

use bytemuck::Pod;

/// Minimum uniform buffer binding size; blobs are padded up to a multiple
/// of this so every kernel can declare at least a `vec4<f32>` params block.
const UNIFORM_ALIGN: usize = 16;

/// An immutable snapshot of per-stage kernel constants.
///
/// Constructed from any [`bytemuck::Pod`] value and compared by content,
/// which makes "did the parameters actually change" checks trivial.
///
/// # Example
///
/// ```rust
/// use fxflow_core::ParamBlob;
///
/// // A kernel taking a single scalar, padded out to vec4 alignment.
/// let blob = ParamBlob::of([0.1f32, 0.0, 0.0, 0.0]);
/// assert_eq!(blob.len(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamBlob {
    bytes: Vec<u8>,
}

impl ParamBlob {
    /// Captures a snapshot of a POD value.
    pub fn of<T: Pod>(value: T) -> Self {
        Self::from_bytes(bytemuck::bytes_of(&value))
    }

    /// Builds a blob from raw bytes, padding to uniform alignment.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bytes = bytes.to_vec();
        let rem = bytes.len() % UNIFORM_ALIGN;
        if rem != 0 || bytes.is_empty() {
            bytes.resize(bytes.len() + (UNIFORM_ALIGN - rem) % UNIFORM_ALIGN, 0);
            if bytes.is_empty() {
                bytes.resize(UNIFORM_ALIGN, 0);
            }
        }
        Self { bytes }
    }

    /// A zeroed blob of one vec4. Stages added without parameters use this.
    pub fn empty() -> Self {
        Self {
            bytes: vec![0; UNIFORM_ALIGN],
        }
    }

    /// Raw bytes, ready for uniform upload.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte length (always a non-zero multiple of 16).
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`; blobs are padded to at least one vec4.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}
