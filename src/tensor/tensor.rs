use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::sync::Arc;

/// A 4D floating-point tensor with shared-memory storage.
///
/// Layout is NCHW (batch, channels, height, width) over a contiguous `f32`
/// buffer. Storage is shared via `Arc<RefCell<Vec<f32>>>` so that scratch
/// views can alias a single arena buffer at distinct offsets. A tensor is
/// either owning (its buffer may be reallocated on `resize`) or a view
/// (carved from a scratch arena, with a fixed element capacity).
#[derive(Clone)]
pub struct Tensor {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    offset: usize,
    capacity: usize,
    is_view: bool,
    data: Arc<RefCell<Vec<f32>>>,
}

impl Tensor {
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        let count = n * c * h * w;
        Tensor {
            n,
            c,
            h,
            w,
            offset: 0,
            capacity: count,
            is_view: false,
            data: Arc::new(RefCell::new(vec![0.0; count])),
        }
    }

    pub fn empty() -> Self {
        Tensor::new(0, 0, 0, 0)
    }

    pub fn new1(n: usize) -> Self {
        Tensor::new(n, 1, 1, 1)
    }

    /// A shapeless view over `capacity` elements of shared storage starting
    /// at `offset`. Used by the scratch arena; call `resize` to give it a
    /// shape before use.
    pub(crate) fn from_shared(offset: usize, capacity: usize, data: Arc<RefCell<Vec<f32>>>) -> Self {
        Tensor {
            n: 0,
            c: 0,
            h: 0,
            w: 0,
            offset,
            capacity,
            is_view: true,
            data,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.shape()[axis]
    }

    /// Total logical element count.
    pub fn size(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Element offset of this tensor within its backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Elements reserved for this tensor in its backing buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the logical shape. Owning tensors reallocate when the new
    /// shape needs more room; views must fit their carved capacity.
    pub fn resize(&mut self, n: usize, c: usize, h: usize, w: usize) {
        let count = n * c * h * w;
        if count > self.capacity {
            assert!(
                !self.is_view,
                "scratch view resize to {} elements exceeds carved capacity {}",
                count, self.capacity
            );
            self.data = Arc::new(RefCell::new(vec![0.0; count]));
            self.offset = 0;
            self.capacity = count;
        }
        self.n = n;
        self.c = c;
        self.h = h;
        self.w = w;
    }

    /// Zero-fills the logical extent.
    pub fn zero(&self) {
        self.write().fill(0.0);
    }

    pub fn fill(&self, val: f32) {
        self.write().fill(val);
    }

    /// Immutable slice over the logical extent.
    pub fn read(&self) -> Ref<'_, [f32]> {
        let count = self.size();
        Ref::map(self.data.borrow(), |v| &v[self.offset..self.offset + count])
    }

    /// Mutable slice over the logical extent.
    pub fn write(&self) -> RefMut<'_, [f32]> {
        let count = self.size();
        RefMut::map(self.data.borrow_mut(), |v| {
            &mut v[self.offset..self.offset + count]
        })
    }

    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        let idx = self.offset + ((n * self.c + c) * self.h + h) * self.w + w;
        self.data.borrow()[idx]
    }

    pub fn set(&self, n: usize, c: usize, h: usize, w: usize, val: f32) {
        let idx = self.offset + ((n * self.c + c) * self.h + h) * self.w + w;
        self.data.borrow_mut()[idx] = val;
    }

    /// Runs `f` with `src` readable and `dst` writable at the same time.
    ///
    /// Scratch views carved from one arena share a single `RefCell`, so
    /// borrowing two of them naively would panic; this splits one mutable
    /// borrow at the range boundary instead. The two ranges must not
    /// overlap when the tensors share storage.
    pub fn with_buffers<R>(
        src: &Tensor,
        dst: &Tensor,
        f: impl FnOnce(&[f32], &mut [f32]) -> R,
    ) -> R {
        if Arc::ptr_eq(&src.data, &dst.data) {
            let (s_lo, s_len) = (src.offset, src.size());
            let (d_lo, d_len) = (dst.offset, dst.size());
            assert!(
                s_lo + s_len <= d_lo || d_lo + d_len <= s_lo,
                "aliasing tensor ranges [{},{}) and [{},{})",
                s_lo,
                s_lo + s_len,
                d_lo,
                d_lo + d_len
            );
            let mut buf = dst.data.borrow_mut();
            if s_lo < d_lo {
                let (lo, hi) = buf.split_at_mut(d_lo);
                f(&lo[s_lo..s_lo + s_len], &mut hi[..d_len])
            } else {
                let (lo, hi) = buf.split_at_mut(s_lo);
                f(&hi[..s_len], &mut lo[d_lo..d_lo + d_len])
            }
        } else {
            f(&src.read(), &mut dst.write())
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{}", self.n, self.c, self.h, self.w)
    }
}
