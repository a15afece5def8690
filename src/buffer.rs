//! The fixed buffer pool.
//!
//! All page memory the engine ever touches is allocated here, once, at
//! init. The pool is a single heap block carved into page-sized slots;
//! slot roles are assigned by the engine (data write/read, index
//! write/read, var write/read) and never change afterwards.

use crate::common::error::{Result, TidelogError};

pub(crate) struct BufferPool {
    buf: Vec<u8>,
    page_size: usize,
    slots: usize,
}

impl BufferPool {
    pub fn new(slots: usize, page_size: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(slots * page_size)
            .map_err(|_| TidelogError::Alloc)?;
        buf.resize(slots * page_size, 0);
        Ok(Self {
            buf,
            page_size,
            slots,
        })
    }

    pub fn slot(&self, slot: usize) -> &[u8] {
        debug_assert!(slot < self.slots);
        let off = slot * self.page_size;
        &self.buf[off..off + self.page_size]
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut [u8] {
        debug_assert!(slot < self.slots);
        let off = slot * self.page_size;
        &mut self.buf[off..off + self.page_size]
    }

    /// Copies one slot over another, e.g. write buffer into read buffer
    /// so an unpersisted page can be scanned in place.
    pub fn copy_slot(&mut self, from: usize, to: usize) {
        debug_assert!(from != to);
        self.buf
            .copy_within(from * self.page_size..(from + 1) * self.page_size, to * self.page_size);
    }

    /// Two distinct slots borrowed at once, for operations that read one
    /// page while writing another.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut [u8], &mut [u8]) {
        assert!(a != b && a < self.slots && b < self.slots);
        let page = self.page_size;
        if a < b {
            let (lo, hi) = self.buf.split_at_mut(b * page);
            (&mut lo[a * page..(a + 1) * page], &mut hi[..page])
        } else {
            let (lo, hi) = self.buf.split_at_mut(a * page);
            let (second, first) =
                (&mut lo[b * page..(b + 1) * page], &mut hi[..page]);
            (first, second)
        }
    }
}
