//! Tensor descriptors and buffer views at the engine ↔ backend seam.
//!
//! The engine writes model input in logical NHWC order into buffers the
//! backend owns; a backend whose native layout differs reinterprets on its
//! side of the seam.  Views borrow those buffers — no tensor data is copied
//! when crossing the contract.

use serde::{Deserialize, Serialize};

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float32,
    Uint8,
}

impl DataType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn element_size(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Uint8 => 1,
        }
    }
}

/// Memory order of the channel axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Channel-last.  What the engine produces and consumes.
    Nhwc,
    /// Channel-first.  Declared by backends whose buffers are planar.
    Nchw,
}

/// Shape and type of a tensor.
///
/// `shape` is always in logical `(batch, channels, height, width)` order
/// regardless of `layout`.  A spatial dimension of `-1` means the model
/// accepts any size there until the geometry is pinned at configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub dt: DataType,
    pub layout: TensorLayout,
    pub shape: [i64; 4],
}

impl TensorDesc {
    pub const fn new(dt: DataType, layout: TensorLayout, shape: [i64; 4]) -> Self {
        Self { dt, layout, shape }
    }

    #[inline]
    pub fn batch(&self) -> usize {
        self.shape[0] as usize
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.shape[1] as usize
    }

    #[inline]
    pub fn height(&self) -> i64 {
        self.shape[2]
    }

    #[inline]
    pub fn width(&self) -> i64 {
        self.shape[3]
    }

    /// `true` while any dimension is still unpinned.
    pub fn is_dynamic(&self) -> bool {
        self.shape.iter().any(|&d| d < 0)
    }

    /// Elements in one batch member (`channels × height × width`).
    ///
    /// The descriptor must be fully pinned.
    pub fn frame_elements(&self) -> usize {
        debug_assert!(!self.is_dynamic(), "geometry not pinned");
        (self.shape[1] * self.shape[2] * self.shape[3]) as usize
    }

    /// Total element count across the batch.
    pub fn element_count(&self) -> usize {
        self.batch() * self.frame_elements()
    }

    /// Total buffer size in bytes.
    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dt.element_size()
    }

    /// Copy of this descriptor with a different batch dimension.
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.shape[0] = batch as i64;
        self
    }

    /// Copy of this descriptor with pinned spatial dimensions.
    pub fn with_spatial(mut self, height: u32, width: u32) -> Self {
        self.shape[2] = height as i64;
        self.shape[3] = width as i64;
        self
    }
}

// ─── Views ───────────────────────────────────────────────────────────────────

/// Borrowed, typed tensor contents.
#[derive(Clone, Copy)]
pub enum TensorData<'a> {
    F32(&'a [f32]),
    U8(&'a [u8]),
}

/// Mutably borrowed, typed tensor contents.
pub enum TensorDataMut<'a> {
    F32(&'a mut [f32]),
    U8(&'a mut [u8]),
}

/// Read-only view into a backend-owned tensor buffer.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    pub desc: TensorDesc,
    pub data: TensorData<'a>,
}

impl<'a> TensorView<'a> {
    /// Sub-view covering a single batch member.
    pub fn batch_member(&self, index: usize) -> TensorView<'a> {
        let fe = self.desc.frame_elements();
        let range = index * fe..(index + 1) * fe;
        let data = match self.data {
            TensorData::F32(s) => TensorData::F32(&s[range]),
            TensorData::U8(s) => TensorData::U8(&s[range]),
        };
        TensorView {
            desc: self.desc.with_batch(1),
            data,
        }
    }
}

/// Mutable view into a backend-owned tensor buffer.
pub struct TensorViewMut<'a> {
    pub desc: TensorDesc,
    pub data: TensorDataMut<'a>,
}

impl TensorViewMut<'_> {
    /// Mutable sub-view covering a single batch member.
    pub fn batch_member_mut(&mut self, index: usize) -> TensorViewMut<'_> {
        let fe = self.desc.frame_elements();
        let range = index * fe..(index + 1) * fe;
        let data = match &mut self.data {
            TensorDataMut::F32(s) => TensorDataMut::F32(&mut s[range]),
            TensorDataMut::U8(s) => TensorDataMut::U8(&mut s[range]),
        };
        TensorViewMut {
            desc: self.desc.with_batch(1),
            data,
        }
    }
}

// ─── Owned buffer ────────────────────────────────────────────────────────────

/// An owned tensor buffer, typed by element.
///
/// Backends allocate these per request; the engine only ever sees views.
#[derive(Clone, Debug)]
pub enum TensorBuffer {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl TensorBuffer {
    /// Allocate a zeroed buffer matching the descriptor.
    pub fn zeroed(desc: &TensorDesc) -> Self {
        match desc.dt {
            DataType::Float32 => Self::F32(vec![0.0; desc.element_count()]),
            DataType::Uint8 => Self::U8(vec![0; desc.element_count()]),
        }
    }

    pub fn view(&self, desc: TensorDesc) -> TensorView<'_> {
        let data = match self {
            Self::F32(v) => TensorData::F32(v),
            Self::U8(v) => TensorData::U8(v),
        };
        TensorView { desc, data }
    }

    pub fn view_mut(&mut self, desc: TensorDesc) -> TensorViewMut<'_> {
        let data = match self {
            Self::F32(v) => TensorDataMut::F32(v),
            Self::U8(v) => TensorDataMut::U8(v),
        };
        TensorViewMut { desc, data }
    }
}
