//! Circular page log.
//!
//! A [`PageLog`] owns one storage file laid out as a fixed ring of
//! pages. Pages are addressed by a monotonically increasing logical id
//! stamped into the header at write time; the physical slot is always
//! `logical_id % num_pages`. Reclamation is bookkeeping: advancing
//! `min_page_id` by one erase block declares the oldest block dead, and
//! the slots are simply overwritten when the log comes around again.
//!
//! Both the data file and the bitmap index file run on this type; the
//! variable-data log has its own cursor rules and lives in [`crate::var`].

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::common::error::Result;
use crate::env::{FileMode, StorageFile};

/// The live window of a circular log.
///
/// `[min_page_id, next_page_id)` are the pages still reachable;
/// `avail_pages` is how many more writes fit before the oldest erase
/// block must be reclaimed.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LogCursor {
    pub next_page_id: u32,
    pub min_page_id: u32,
    pub avail_pages: u32,
}

pub(crate) struct PageLog<F> {
    file: F,
    num_pages: u32,
    erase_pages: u32,
    /// When set, a write that finds no free page reclaims the oldest
    /// erase block itself. Disabled when the engine manages reclamation
    /// (record-level consistency keeps a reserved window instead).
    auto_reclaim: bool,
    pub cursor: LogCursor,
    buffered_page_id: Option<u32>,
    pub reads: u32,
    pub writes: u32,
    pub buffer_hits: u32,
}

impl<F: StorageFile> PageLog<F> {
    pub fn new(
        file: F,
        num_pages: u32,
        erase_pages: u32,
        reserved_pages: u32,
    ) -> Self {
        Self {
            file,
            num_pages,
            erase_pages,
            auto_reclaim: reserved_pages == 0,
            cursor: LogCursor {
                next_page_id: 0,
                min_page_id: 0,
                avail_pages: num_pages - reserved_pages,
            },
            buffered_page_id: None,
            reads: 0,
            writes: 0,
            buffer_hits: 0,
        }
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Logical id of the page currently in the read cache.
    pub fn buffered_page_id(&self) -> Option<u32> {
        self.buffered_page_id
    }

    pub fn open(&mut self, mode: FileMode) -> Result<()> {
        self.file.open(mode)
    }

    pub fn phys(&self, logical: u32) -> u32 {
        logical % self.num_pages
    }

    /// True if the next write will reclaim the oldest erase block. The
    /// engine checks this first so it can drop spline points and advance
    /// its minimum-key estimate for the reclaimed records.
    pub fn about_to_reclaim(&self) -> bool {
        self.auto_reclaim && self.cursor.avail_pages == 0
    }

    /// Declares the oldest erase block dead.
    pub fn reclaim_block(&mut self) {
        self.cursor.avail_pages += self.erase_pages;
        self.cursor.min_page_id += self.erase_pages;
        debug!(
            min_page_id = self.cursor.min_page_id,
            "reclaimed one erase block"
        );
    }

    /// Stamps the next logical page id into `buf` and writes it to the
    /// corresponding physical slot. The logical id is consumed even if
    /// the write fails.
    pub fn write(&mut self, buf: &mut [u8]) -> Result<u32> {
        let page_id = self.cursor.next_page_id;
        self.cursor.next_page_id += 1;
        LittleEndian::write_u32(&mut buf[0..4], page_id);

        if self.auto_reclaim && self.cursor.avail_pages == 0 {
            self.reclaim_block();
        }

        let phys = self.phys(page_id);
        if let Err(e) = self.file.write_page(buf, phys) {
            warn!(page_id, phys, "failed to write page");
            return Err(e);
        }
        self.cursor.avail_pages -= 1;
        self.writes += 1;
        Ok(page_id)
    }

    /// Writes `buf` to a physical slot without touching the cursor.
    /// Used for record-level-consistency temporary pages.
    pub fn write_phys(&mut self, buf: &[u8], phys: u32) -> Result<()> {
        if let Err(e) = self.file.write_page(buf, phys) {
            warn!(phys, "failed to write temporary page");
            return Err(e);
        }
        self.writes += 1;
        Ok(())
    }

    /// Reads the page with the given logical id, serving from the
    /// single-page cache when it is already buffered.
    pub fn read(&mut self, logical: u32, buf: &mut [u8]) -> Result<()> {
        if self.buffered_page_id == Some(logical) {
            self.buffer_hits += 1;
            return Ok(());
        }
        self.file.read_page(buf, self.phys(logical))?;
        self.reads += 1;
        self.buffered_page_id = Some(logical);
        Ok(())
    }

    /// Reads a physical slot directly, bypassing and invalidating the
    /// cache. Recovery walks the file this way because logical ids are
    /// not known yet.
    pub fn read_phys(&mut self, phys: u32, buf: &mut [u8]) -> Result<()> {
        self.buffered_page_id = None;
        self.file.read_page(buf, phys)?;
        self.reads += 1;
        Ok(())
    }

    /// Forgets the cached page, e.g. after the read buffer was
    /// overwritten with a copy of the write buffer.
    pub fn invalidate_cache(&mut self) {
        self.buffered_page_id = None;
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.file.close()
    }
}
