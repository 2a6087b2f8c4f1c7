//! Reset-and-grow bump allocator for per-invocation transient buffers.

use std::cell::RefCell;
use std::sync::Arc;

use crate::tensor::Tensor;

/// Scratch memory arena for one convolution invocation.
///
/// The arena owns a single contiguous `f32` buffer and hands out
/// non-overlapping tensor views in carve order. The cursor is rewound at the
/// start of every invocation; views carved before a rewind alias stale data
/// and must not be used afterwards.
pub struct ScratchArena {
    data: Arc<RefCell<Vec<f32>>>,
    cursor: usize,
}

impl ScratchArena {
    pub fn new() -> Self {
        ScratchArena {
            data: Arc::new(RefCell::new(Vec::new())),
            cursor: 0,
        }
    }

    /// Resets the carve cursor. Previously carved views become invalid.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Ensures the arena can hold at least `bytes` bytes. Never shrinks.
    pub fn grow_to_at_least(&mut self, bytes: usize) {
        let count = bytes.div_ceil(std::mem::size_of::<f32>());
        let mut buf = self.data.borrow_mut();
        if buf.len() < count {
            buf.resize(count, 0.0);
        }
    }

    /// Carves the next `bytes` bytes as a shapeless tensor view. A request
    /// of zero bytes yields an empty view that shares no usable range.
    pub fn carve(&mut self, bytes: usize) -> Tensor {
        debug_assert_eq!(bytes % std::mem::size_of::<f32>(), 0);
        let count = bytes / std::mem::size_of::<f32>();
        assert!(
            self.cursor + count <= self.data.borrow().len(),
            "scratch carve of {} elements at cursor {} exceeds capacity {}",
            count,
            self.cursor,
            self.data.borrow().len()
        );
        let view = Tensor::from_shared(self.cursor, count, Arc::clone(&self.data));
        self.cursor += count;
        view
    }

    /// Current buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.borrow().len() * std::mem::size_of::<f32>()
    }
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}
