//! The storage engine: put/get glue, spline training, recovery.
//!
//! A [`Db`] owns the buffer pool, the three circular logs, and the
//! learned index, and moves records between them. Inserts accumulate in
//! the data write buffer; a full buffer is persisted as one page, the
//! spline is trained with the page's smallest key, and the page's bitmap
//! is appended to the index log. Lookups ask the spline for a page
//! estimate with an error corridor, probe the log within that corridor,
//! then search inside the one page that can hold the key.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use tracing::{debug, info};

use crate::bitmap::BitmapCodec;
use crate::buffer::BufferPool;
use crate::codec::{DataView, DataViewMut, IndexLayout, IndexViewMut, PageLayout, VarView, VarViewMut};
use crate::common::error::{Result, TidelogError};
use crate::env::{FileMode, StorageFile};
use crate::index::IndexStore;
use crate::log::PageLog;
use crate::radix::RadixTable;
use crate::spline::{Fit, Spline};
use crate::var::{VarData, VarLog, VarStream, LEN_PREFIX};

/// On-disk sentinel for "record has no variable payload".
pub const NO_VAR_DATA: u32 = u32::MAX;

/// Keys are unsigned integers of one to eight bytes. The engine is
/// generic over the key type the host works with; internally keys travel
/// as their raw little-endian integer value.
pub trait IndexKey: Copy + Ord + fmt::Debug {
    fn to_raw(self) -> u64;
    fn from_raw(raw: u64) -> Self;
}

macro_rules! index_key_impl {
    ($($t:ty),*) => {
        $(impl IndexKey for $t {
            fn to_raw(self) -> u64 {
                self as u64
            }

            fn from_raw(raw: u64) -> Self {
                raw as $t
            }
        })*
    };
}

index_key_impl!(u8, u16, u32, u64);

/// How lookups locate the data page for a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchStrategy {
    /// Binary search over the live page window. No learned index.
    Binary,
    /// Greedy spline corridor plus a bounded linear probe.
    Spline,
    /// Spline with a radix prefix table narrowing the segment search.
    RadixSpline { bits: u8 },
}

/// Orders two fixed-size data values.
pub type DataCompare = fn(&[u8], &[u8]) -> Ordering;

/// Engine configuration. Sizes are bytes unless noted.
#[derive(Clone, Debug)]
pub struct Config {
    pub key_size: usize,
    pub data_size: usize,
    pub page_size: usize,
    pub num_data_pages: u32,
    pub num_index_pages: u32,
    pub num_var_pages: u32,
    /// Pages per erase block; must divide every file's page count.
    pub erase_size_pages: u32,
    /// Page buffers to allocate; 0 sizes the pool to what the enabled
    /// features need (2, 4 with an index, 6 with index and var data).
    pub buffer_blocks: usize,
    pub num_spline_points: usize,
    /// Spline error bound, in pages.
    pub spline_max_error: usize,
    pub search: SearchStrategy,
    pub use_index: bool,
    pub use_max_min: bool,
    pub use_bmap: bool,
    pub use_vdata: bool,
    /// Truncate files on open instead of recovering.
    pub reset_data: bool,
    /// Reserve a rotating two-erase-block window and persist the write
    /// buffer after every put, so partial pages survive a restart.
    pub record_level_consistency: bool,
    pub bitmap_size: usize,
    pub compare_data: Option<DataCompare>,
}

impl Config {
    pub fn new(key_size: usize, data_size: usize, page_size: usize) -> Self {
        Self {
            key_size,
            data_size,
            page_size,
            num_data_pages: 0,
            num_index_pages: 0,
            num_var_pages: 0,
            erase_size_pages: 8,
            buffer_blocks: 0,
            num_spline_points: 30,
            spline_max_error: 10,
            search: SearchStrategy::Spline,
            use_index: false,
            use_max_min: false,
            use_bmap: false,
            use_vdata: false,
            reset_data: false,
            record_level_consistency: false,
            bitmap_size: 0,
            compare_data: None,
        }
    }
}

/// The storage files backing one database.
pub struct Files<F> {
    pub data: F,
    pub index: Option<F>,
    pub var: Option<F>,
}

impl<F> Files<F> {
    pub fn data_only(data: F) -> Self {
        Self {
            data,
            index: None,
            var: None,
        }
    }
}

/// Page I/O counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub reads: u32,
    pub writes: u32,
    pub index_reads: u32,
    pub index_writes: u32,
    pub buffer_hits: u32,
    /// Largest observed in-page deviation from the linear estimate.
    pub max_error: u32,
}

/// Buffer pool slot assignment, fixed at init.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Slots {
    pub data_write: usize,
    pub data_read: usize,
    pub index_write: usize,
    pub index_read: usize,
    pub var_write: usize,
    pub var_read: usize,
}

/// Rotating record-level-consistency window, in physical pages.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RlcWindow {
    pub start: u32,
    pub next: u32,
}

pub struct Db<K: IndexKey, F: StorageFile> {
    pub(crate) cfg: Config,
    pub(crate) layout: PageLayout,
    pub(crate) buffers: BufferPool,
    pub(crate) slots: Slots,
    pub(crate) data: PageLog<F>,
    pub(crate) index: Option<IndexStore<F>>,
    pub(crate) var: Option<VarLog<F>>,
    pub(crate) spline: Option<Spline>,
    pub(crate) radix: Option<RadixTable>,
    pub(crate) bitmap: Option<Box<dyn BitmapCodec>>,
    pub(crate) min_key: Option<u64>,
    pub(crate) avg_key_diff: u64,
    pub(crate) max_error: u32,
    pub(crate) current_var_loc: u32,
    pub(crate) clean_spline: bool,
    pub(crate) rlc: Option<RlcWindow>,
    _key: PhantomData<K>,
}

impl<K: IndexKey, F: StorageFile> Db<K, F> {
    /// Opens (or recovers) a database over the given files.
    pub fn open(
        cfg: Config,
        files: Files<F>,
        bitmap: Option<Box<dyn BitmapCodec>>,
    ) -> Result<Self> {
        validate(&cfg, &files, bitmap.as_deref())?;

        let layout = PageLayout::new(
            cfg.page_size,
            cfg.key_size,
            cfg.data_size,
            if cfg.use_bmap { cfg.bitmap_size } else { 0 },
            cfg.use_max_min,
            cfg.use_vdata,
        );
        if layout.max_records == 0 {
            return Err(TidelogError::Config(
                "page size leaves no room for records".to_string(),
            ));
        }

        let mut next_slot = 2;
        let mut take_pair = || {
            let pair = (next_slot, next_slot + 1);
            next_slot += 2;
            pair
        };
        let (index_write, index_read) =
            if cfg.use_index { take_pair() } else { (0, 0) };
        let (var_write, var_read) =
            if cfg.use_vdata { take_pair() } else { (0, 0) };
        let slots = Slots {
            data_write: 0,
            data_read: 1,
            index_write,
            index_read,
            var_write,
            var_read,
        };
        let buffers =
            BufferPool::new(next_slot.max(cfg.buffer_blocks), cfg.page_size)?;

        let rlc_reserved = if cfg.record_level_consistency {
            2 * cfg.erase_size_pages
        } else {
            0
        };
        let data = PageLog::new(
            files.data,
            cfg.num_data_pages,
            cfg.erase_size_pages,
            rlc_reserved,
        );
        let index = files.index.map(|file| {
            IndexStore::new(
                PageLog::new(
                    file,
                    cfg.num_index_pages,
                    cfg.erase_size_pages,
                    0,
                ),
                IndexLayout::new(cfg.page_size, cfg.bitmap_size),
            )
        });
        let var = files.var.map(|file| {
            VarLog::new(
                file,
                cfg.num_var_pages,
                cfg.erase_size_pages,
                cfg.page_size,
                cfg.key_size,
            )
        });

        let spline = match cfg.search {
            SearchStrategy::Binary => None,
            _ => Some(Spline::new(
                cfg.num_spline_points,
                cfg.spline_max_error,
            )?),
        };
        let radix = match cfg.search {
            SearchStrategy::RadixSpline { bits } => {
                Some(RadixTable::new(bits)?)
            }
            _ => None,
        };
        let clean_spline = spline.is_some();
        let rlc = cfg.record_level_consistency.then(|| RlcWindow {
            start: cfg.erase_size_pages,
            next: cfg.erase_size_pages,
        });

        let max_error = u32::from(layout.max_records);
        let mut db = Db {
            cfg,
            layout,
            buffers,
            slots,
            data,
            index,
            var,
            spline,
            radix,
            bitmap,
            min_key: None,
            avg_key_diff: 1,
            max_error,
            current_var_loc: 0,
            clean_spline,
            rlc,
            _key: PhantomData,
        };

        let reset = db.cfg.reset_data;
        db.init_data(reset)?;
        db.init_index(reset)?;
        db.init_var(reset)?;
        Ok(db)
    }

    /// Inserts one record. Keys must be strictly ascending.
    pub fn put(&mut self, key: K, data: &[u8]) -> Result<()> {
        self.check_data_len(data)?;
        self.put_record(key.to_raw(), data, None)
    }

    /// Inserts one record together with an optional variable-length
    /// payload.
    pub fn put_var(
        &mut self,
        key: K,
        data: &[u8],
        var_data: Option<&[u8]>,
    ) -> Result<()> {
        if !self.cfg.use_vdata {
            return Err(TidelogError::Config(
                "variable data is not enabled".to_string(),
            ));
        }
        self.check_data_len(data)?;
        let raw = key.to_raw();
        let layout = self.layout;
        let page_size = layout.page_size as u32;

        // Flush the var page when there is no room left for a length
        // prefix, or the fixed write page is about to roll over.
        let write_count = DataView::new(
            self.buffers.slot(self.slots.data_write),
            &layout,
        )
        .count();
        if self.current_var_loc % page_size > page_size - LEN_PREFIX as u32
            || write_count >= layout.max_records
        {
            self.flush_var_page()?;
        }

        let Some(payload) = var_data else {
            return self.put_record(raw, data, None);
        };

        // Reject out-of-order keys before any var state changes.
        if let Some(prev) = self.last_key_seen()? {
            if raw <= prev {
                return Err(TidelogError::OutOfOrder);
            }
        }

        let span = self.var_ref().span();
        let var_ptr = self.current_var_loc % span;

        {
            let buf = self.buffers.slot_mut(self.slots.var_write);
            VarViewMut::new(buf, layout.key_size).set_max_key(raw);
            let off = (self.current_var_loc % page_size) as usize;
            LittleEndian::write_u32(
                &mut buf[off..off + LEN_PREFIX],
                payload.len() as u32,
            );
        }
        self.current_var_loc =
            self.current_var_loc.wrapping_add(LEN_PREFIX as u32);
        if self.current_var_loc % page_size == 0 {
            self.roll_var_page(raw)?;
        }

        let mut written = 0usize;
        while written < payload.len() {
            let off = (self.current_var_loc % page_size) as usize;
            let amt = (layout.page_size - off).min(payload.len() - written);
            {
                let buf = self.buffers.slot_mut(self.slots.var_write);
                buf[off..off + amt]
                    .copy_from_slice(&payload[written..written + amt]);
            }
            written += amt;
            self.current_var_loc =
                self.current_var_loc.wrapping_add(amt as u32);
            if self.current_var_loc % page_size == 0 {
                self.roll_var_page(raw)?;
            }
        }

        self.put_record(raw, data, Some(var_ptr))
    }

    /// Copies the data for `key` into `data_out`. Returns false if the
    /// key is not present.
    pub fn get(&mut self, key: K, data_out: &mut [u8]) -> Result<bool> {
        self.check_data_len(data_out)?;
        let raw = key.to_raw();
        let layout = self.layout;

        if self.data.cursor.next_page_id == 0 {
            // Nothing persisted yet; the write buffer is the database.
            return Ok(self
                .search_write_buffer(raw, Some(data_out))
                .is_some());
        }

        {
            let wview = DataView::new(
                self.buffers.slot(self.slots.data_write),
                &layout,
            );
            if wview.count() != 0 {
                if raw > wview.last_key() {
                    return Ok(false);
                }
                if raw >= wview.first_key() {
                    return Ok(self
                        .search_write_buffer(raw, Some(data_out))
                        .is_some());
                }
            }
        }

        if !self.locate_page(raw)? {
            return Ok(false);
        }
        let buf = self.buffers.slot(self.slots.data_read);
        match search_page(&layout, buf, raw) {
            Some(slot) => {
                data_out.copy_from_slice(
                    DataView::new(buf, &layout).record_data(slot),
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`Db::get`], but also resolves the record's variable-length
    /// payload. `Ok(None)` means the key is not present.
    pub fn get_var(
        &mut self,
        key: K,
        data_out: &mut [u8],
    ) -> Result<Option<VarData>> {
        if !self.cfg.use_vdata {
            return Err(TidelogError::Config(
                "variable data is not enabled".to_string(),
            ));
        }
        self.check_data_len(data_out)?;
        let raw = key.to_raw();

        let slot = if let Some(slot) =
            self.search_write_buffer(raw, Some(data_out))
        {
            // Record is still buffered; persist its payload so the
            // stream can read it back, and scan the buffered page from
            // the read slot like any other page.
            self.flush_var_page()?;
            self.buffers
                .copy_slot(self.slots.data_write, self.slots.data_read);
            self.data.invalidate_cache();
            slot
        } else if self.get(key, data_out)? {
            let buf = self.buffers.slot(self.slots.data_read);
            match search_page(&self.layout, buf, raw) {
                Some(slot) => slot,
                None => return Ok(None),
            }
        } else {
            return Ok(None);
        };

        let var = self.resolve_var_stream(raw, slot)?;
        Ok(Some(var))
    }

    /// Reads payload bytes from a stream into `out`; returns the number
    /// of bytes produced.
    pub fn var_read(
        &mut self,
        stream: &mut VarStream,
        out: &mut [u8],
    ) -> Result<usize> {
        if !self.cfg.use_vdata {
            return Err(TidelogError::Config(
                "variable data is not enabled".to_string(),
            ));
        }
        let slot = self.slots.var_read;
        let buf = self.buffers.slot_mut(slot);
        self.var
            .as_mut()
            .expect("var log present when use_vdata")
            .stream_read(stream, out, buf)
    }

    /// Collects the rest of a stream into one owned buffer.
    pub fn var_read_all(&mut self, stream: &mut VarStream) -> Result<Bytes> {
        let remaining =
            (stream.total_bytes() - stream.bytes_read()) as usize;
        let mut out = Vec::new();
        out.try_reserve_exact(remaining)?;
        out.resize(remaining, 0);
        let n = self.var_read(stream, &mut out)?;
        out.truncate(n);
        Ok(Bytes::from(out))
    }

    /// Persists the write buffers. Partial pages become permanent pages.
    pub fn flush(&mut self) -> Result<()> {
        let layout = self.layout;
        let count = DataView::new(
            self.buffers.slot(self.slots.data_write),
            &layout,
        )
        .count();

        if count > 0 {
            self.prepare_reclaim_if_needed();
            let page_id = {
                let buf = self.buffers.slot_mut(self.slots.data_write);
                self.data.write(buf)?
            };
            self.data.flush()?;
            self.train_spline_from_write_buffer(page_id);

            if self.index.is_some() && self.cfg.use_bmap {
                let (ibuf, dbuf) = self
                    .buffers
                    .pair_mut(self.slots.index_write, self.slots.data_write);
                let index = self.index.as_mut().expect("checked above");
                let bitmap = DataView::new(dbuf, &layout).bitmap();
                index.append(ibuf, bitmap, page_id)?;
                index.log.write(ibuf)?;
                index.log.flush()?;
                let mut page = IndexViewMut::new(ibuf, &index.layout);
                page.init_page();
                page.set_first_data_page(self.data.cursor.next_page_id);
            }

            {
                let buf = self.buffers.slot_mut(self.slots.data_write);
                DataViewMut::new(buf, &layout).init_page();
            }
            self.slide_rlc_window_if_block_done();
        } else {
            self.data.flush()?;
        }

        if self.cfg.use_vdata {
            self.flush_var_page()?;
            self.var_mut().flush()?;
        }
        Ok(())
    }

    /// Smallest key the engine believes is still stored. An estimate
    /// after the log has wrapped.
    pub fn min_key(&self) -> Option<K> {
        self.min_key.map(K::from_raw)
    }

    pub fn next_data_page_id(&self) -> u32 {
        self.data.cursor.next_page_id
    }

    pub fn min_data_page_id(&self) -> u32 {
        self.data.cursor.min_page_id
    }

    pub fn num_avail_data_pages(&self) -> u32 {
        self.data.cursor.avail_pages
    }

    /// Smallest key whose variable payload is still stored.
    pub fn min_var_record_id(&self) -> u64 {
        self.var.as_ref().map(|v| v.min_record_id).unwrap_or(0)
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            reads: self.data.reads,
            writes: self.data.writes,
            index_reads: 0,
            index_writes: 0,
            buffer_hits: self.data.buffer_hits,
            max_error: self.max_error,
        };
        if let Some(index) = &self.index {
            stats.index_reads = index.log.reads;
            stats.index_writes = index.log.writes;
            stats.buffer_hits += index.log.buffer_hits;
        }
        if let Some(var) = &self.var {
            stats.reads += var.reads;
            stats.writes += var.writes;
            stats.buffer_hits += var.buffer_hits;
        }
        stats
    }

    pub fn reset_stats(&mut self) {
        self.data.reads = 0;
        self.data.writes = 0;
        self.data.buffer_hits = 0;
        if let Some(index) = &mut self.index {
            index.log.reads = 0;
            index.log.writes = 0;
            index.log.buffer_hits = 0;
        }
        if let Some(var) = &mut self.var {
            var.reads = 0;
            var.writes = 0;
            var.buffer_hits = 0;
        }
    }

    /// Closes the backing files. Unflushed buffers are dropped, exactly
    /// as they would be on power loss; call [`Db::flush`] first to keep
    /// them.
    pub fn close(mut self) -> Result<()> {
        self.data.close()?;
        if let Some(index) = &mut self.index {
            index.log.close()?;
        }
        if let Some(var) = &mut self.var {
            var.close()?;
        }
        Ok(())
    }

    // ---- insert path ----

    fn check_data_len(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.layout.data_size {
            return Err(TidelogError::Config(format!(
                "data must be exactly {} bytes, got {}",
                self.layout.data_size,
                data.len()
            )));
        }
        Ok(())
    }

    /// The key of the most recent successful insert, from the write
    /// buffer or the last persisted page.
    fn last_key_seen(&mut self) -> Result<Option<u64>> {
        let layout = self.layout;
        let wview = DataView::new(
            self.buffers.slot(self.slots.data_write),
            &layout,
        );
        let count = wview.count();
        if count > 0 {
            return Ok(Some(wview.record_key(count - 1)));
        }
        if self.data.cursor.next_page_id > 0 {
            let last = self.data.cursor.next_page_id - 1;
            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(last, buf)?;
            }
            let view = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            );
            return Ok(Some(view.last_key()));
        }
        Ok(None)
    }

    fn put_record(
        &mut self,
        key: u64,
        data: &[u8],
        var_ptr: Option<u32>,
    ) -> Result<()> {
        if let Some(prev) = self.last_key_seen()? {
            if key <= prev {
                return Err(TidelogError::OutOfOrder);
            }
        }

        let layout = self.layout;
        let count = DataView::new(
            self.buffers.slot(self.slots.data_write),
            &layout,
        )
        .count();
        if count >= layout.max_records {
            self.persist_write_page()?;
        }

        let compare_data = self.cfg.compare_data;
        {
            let buf = self.buffers.slot_mut(self.slots.data_write);
            let mut page = DataViewMut::new(buf, &layout);
            let count = page.view().count();
            page.set_record(count, key, data, var_ptr);
            page.inc_count();

            if layout.has_min_max {
                if count == 0 {
                    page.set_header_min_key(key);
                    page.set_header_max_key(key);
                    page.set_header_min_data(data);
                    page.set_header_max_data(data);
                } else {
                    // Ascending keys: max always moves, min never does.
                    page.set_header_max_key(key);
                    let cmp = compare_data
                        .expect("validated with use_max_min");
                    let below = cmp(data, page.view().header_min_data())
                        == Ordering::Less;
                    if below {
                        page.set_header_min_data(data);
                    }
                    let above = cmp(data, page.view().header_max_data())
                        == Ordering::Greater;
                    if above {
                        page.set_header_max_data(data);
                    }
                }
            }
        }

        if self.min_key.is_none() {
            self.min_key = Some(key);
        }

        if self.cfg.use_bmap {
            let codec =
                self.bitmap.as_ref().expect("validated with use_bmap");
            let buf = self.buffers.slot_mut(self.slots.data_write);
            let mut page = DataViewMut::new(buf, &layout);
            codec.update(data, page.bitmap_mut());
        }

        if self.rlc.is_some() {
            self.write_rlc_temp()?;
        }
        Ok(())
    }

    /// Persists the full write buffer as a permanent page and performs
    /// all per-page bookkeeping.
    fn persist_write_page(&mut self) -> Result<u32> {
        self.prepare_reclaim_if_needed();
        let layout = self.layout;
        let page_id = {
            let buf = self.buffers.slot_mut(self.slots.data_write);
            self.data.write(buf)?
        };
        self.train_spline_from_write_buffer(page_id);

        if self.index.is_some() && self.cfg.use_bmap {
            let (ibuf, dbuf) = self
                .buffers
                .pair_mut(self.slots.index_write, self.slots.data_write);
            let bitmap = DataView::new(dbuf, &layout).bitmap();
            self.index
                .as_mut()
                .expect("checked above")
                .append(ibuf, bitmap, page_id)?;
        }

        self.refresh_avg_key_diff();
        self.bump_max_error_from(self.slots.data_write);

        {
            let buf = self.buffers.slot_mut(self.slots.data_write);
            DataViewMut::new(buf, &layout).init_page();
        }

        self.slide_rlc_window_if_block_done();
        Ok(page_id)
    }

    fn train_spline_from_write_buffer(&mut self, page_id: u32) {
        let first_key = DataView::new(
            self.buffers.slot(self.slots.data_write),
            &self.layout,
        )
        .first_key();
        if let Some(spline) = self.spline.as_mut() {
            spline.add(first_key, page_id);
            if let Some(radix) = self.radix.as_mut() {
                radix.add(spline);
            }
        }
    }

    /// If the next data page write will reclaim an erase block, drop the
    /// spline points for it and advance the minimum-key estimate first.
    fn prepare_reclaim_if_needed(&mut self) {
        if self.data.about_to_reclaim() {
            self.note_reclaimed_records();
        }
    }

    fn note_reclaimed_records(&mut self) {
        if let Some(min_key) = self.min_key {
            if self.clean_spline {
                if let Some(spline) = self.spline.as_mut() {
                    spline.clean(min_key);
                }
            }
            let advance = u64::from(self.cfg.erase_size_pages)
                * u64::from(self.layout.max_records)
                * self.avg_key_diff;
            self.min_key = Some(min_key.saturating_add(advance));
        }
    }

    fn refresh_avg_key_diff(&mut self) {
        let blocks = u64::from(
            (self.data.num_pages() - self.data.cursor.avail_pages).max(1),
        );
        let max_key = DataView::new(
            self.buffers.slot(self.slots.data_write),
            &self.layout,
        )
        .last_key();
        let min_key = self.min_key.unwrap_or(max_key);
        self.avg_key_diff = max_key.saturating_sub(min_key)
            / blocks
            / u64::from(self.layout.max_records);
    }

    fn bump_max_error_from(&mut self, slot: usize) {
        let error =
            page_max_error(&self.layout, self.buffers.slot(slot));
        if error > self.max_error {
            self.max_error = error;
        }
    }

    // ---- record-level consistency ----

    /// Persists a copy of the write buffer into the rotating window so a
    /// partial page survives restart.
    fn write_rlc_temp(&mut self) -> Result<()> {
        let Some(rlc) = self.rlc else {
            return Ok(());
        };
        let erase = self.cfg.erase_size_pages;
        let num = self.data.num_pages();
        let window_end = (rlc.start + 2 * erase) % num;
        let slot = if rlc.next == window_end {
            rlc.start
        } else {
            rlc.next
        };
        {
            let buf = self.buffers.slot_mut(self.slots.data_write);
            DataViewMut::new(buf, &self.layout)
                .set_page_id(self.data.cursor.next_page_id);
            self.data.write_phys(buf, slot)?;
        }
        self.rlc = Some(RlcWindow {
            start: rlc.start,
            next: (slot + 1) % num,
        });
        Ok(())
    }

    /// After a data-page write completes an erase block, the consistency
    /// window slides one block forward; when no free block remains, the
    /// slide reclaims the oldest data block.
    fn slide_rlc_window_if_block_done(&mut self) {
        let Some(rlc) = self.rlc else {
            return;
        };
        let erase = self.cfg.erase_size_pages;
        if self.data.cursor.next_page_id % erase != 0 {
            return;
        }
        let num = self.data.num_pages();
        let start = (rlc.start + erase) % num;
        self.rlc = Some(RlcWindow { start, next: start });
        if self.data.cursor.avail_pages == 0 {
            self.note_reclaimed_records();
            self.data.reclaim_block();
        }
        debug!(start, "slid record-level consistency window");
    }

    // ---- lookup path ----

    /// Searches the write buffer; on a hit, optionally copies the data
    /// out and returns the record slot.
    fn search_write_buffer(
        &mut self,
        key: u64,
        data_out: Option<&mut [u8]>,
    ) -> Option<u16> {
        let layout = self.layout;
        let buf = self.buffers.slot(self.slots.data_write);
        let slot = search_page(&layout, buf, key)?;
        if let Some(out) = data_out {
            out.copy_from_slice(
                DataView::new(buf, &layout).record_data(slot),
            );
        }
        Some(slot)
    }

    /// Brings the page that can hold `key` into the read buffer.
    /// Returns false if no page in the live window can hold it.
    fn locate_page(&mut self, key: u64) -> Result<bool> {
        match self.cfg.search {
            SearchStrategy::Binary => self.locate_page_binary(key),
            SearchStrategy::Spline | SearchStrategy::RadixSpline { .. } => {
                let fit = {
                    let spline =
                        self.spline.as_ref().expect("spline strategies");
                    match self.radix.as_ref() {
                        Some(radix) => spline.find_within(
                            key,
                            Some(radix.lookup(key, spline.count())),
                        ),
                        None => spline.find(key),
                    }
                };

                // The right page may already be buffered.
                if let Some(buffered) = self.data.buffered_page_id() {
                    if fit.low <= buffered && buffered <= fit.high {
                        let view = DataView::new(
                            self.buffers.slot(self.slots.data_read),
                            &self.layout,
                        );
                        if view.count() > 0
                            && view.first_key() <= key
                            && key <= view.last_key()
                        {
                            return Ok(true);
                        }
                    }
                }
                self.linear_probe(key, fit)
            }
        }
    }

    /// Steps page by page from the spline estimate, narrowing the
    /// corridor, until the page bracketing `key` is buffered.
    fn linear_probe(&mut self, key: u64, fit: Fit) -> Result<bool> {
        let layout = self.layout;
        let min = i64::from(self.data.cursor.min_page_id);
        let next = i64::from(self.data.cursor.next_page_id);
        let mut loc = i64::from(fit.loc);
        let mut low = i64::from(fit.low);
        let mut high = i64::from(fit.high);
        loop {
            if loc > high
                || loc < low
                || low > high
                || loc < min
                || loc >= next
            {
                return Ok(false);
            }
            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(loc as u32, buf)?;
            }
            let view = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            );
            if key < view.first_key() {
                loc -= 1;
                high = loc;
            } else if key > view.last_key() {
                loc += 1;
                low = loc;
            } else {
                return Ok(true);
            }
        }
    }

    /// Plain binary search over the live pages, for configurations
    /// without a learned index.
    fn locate_page_binary(&mut self, key: u64) -> Result<bool> {
        let layout = self.layout;
        let min = i64::from(self.data.cursor.min_page_id);
        let next = i64::from(self.data.cursor.next_page_id);
        let mut first = min;
        let mut last = next - 1;
        let mut page = (first + last) / 2;
        loop {
            if page < min || page >= next {
                return Ok(true);
            }
            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(page as u32, buf)?;
            }
            if first >= last {
                return Ok(true);
            }
            let view = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            );
            if key < view.first_key() {
                last = page - 1;
            } else if key > view.last_key() {
                first = page + 1;
            } else {
                return Ok(true);
            }
            page = (first + last) / 2;
        }
    }

    // ---- variable data ----

    fn var_ref(&self) -> &VarLog<F> {
        self.var.as_ref().expect("var log present when use_vdata")
    }

    fn var_mut(&mut self) -> &mut VarLog<F> {
        self.var.as_mut().expect("var log present when use_vdata")
    }

    /// Resolves the variable payload of the record at `slot` of the
    /// page in the read buffer.
    pub(crate) fn resolve_var_stream(
        &mut self,
        key: u64,
        slot: u16,
    ) -> Result<VarData> {
        let layout = self.layout;
        let var_ptr = DataView::new(
            self.buffers.slot(self.slots.data_read),
            &layout,
        )
        .record_var_ptr(slot);
        if var_ptr == NO_VAR_DATA {
            return Ok(VarData::None);
        }
        if key < self.var_ref().min_record_id {
            // The log wrapped over the payload's pages.
            return Ok(VarData::Expired);
        }

        let page_size = layout.page_size as u32;
        let page = (var_ptr / page_size) % self.var_ref().num_pages();
        {
            let buf = self.buffers.slot_mut(self.slots.var_read);
            self.var
                .as_mut()
                .expect("var log present when use_vdata")
                .read(page, buf)?;
        }
        let vbuf = self.buffers.slot(self.slots.var_read);
        let page_offset = (var_ptr % page_size) as usize;
        let total_bytes = LittleEndian::read_u32(
            &vbuf[page_offset..page_offset + LEN_PREFIX],
        );

        let span = self.var_ref().span();
        let header = self.var_ref().header_size() as u32;
        let mut addr = (var_ptr + LEN_PREFIX as u32) % span;
        if addr % page_size == 0 {
            // Landed on a page boundary; payload starts after the header.
            addr = (addr + header) % span;
        }
        Ok(VarData::Stream(VarStream {
            total_bytes,
            bytes_read: 0,
            data_start: addr,
            file_offset: addr,
        }))
    }

    /// Persists the var write buffer if it holds anything, then starts a
    /// fresh page.
    pub(crate) fn flush_var_page(&mut self) -> Result<()> {
        if !self.cfg.use_vdata {
            return Ok(());
        }
        let page_size = self.layout.page_size as u32;
        let header = self.var_ref().header_size() as u32;
        if self.current_var_loc % page_size == header {
            // Nothing after the page header; nothing to persist.
            return Ok(());
        }
        {
            let (wbuf, rbuf) = self
                .buffers
                .pair_mut(self.slots.var_write, self.slots.var_read);
            self.var
                .as_mut()
                .expect("var log present when use_vdata")
                .write(wbuf, rbuf)?;
        }
        self.var_mut().flush()?;
        {
            let buf = self.buffers.slot_mut(self.slots.var_write);
            VarViewMut::new(buf, self.layout.key_size).init_page();
        }
        let remainder = page_size - self.current_var_loc % page_size;
        self.current_var_loc =
            self.current_var_loc.wrapping_add(remainder + header);
        Ok(())
    }

    /// Page boundary reached while streaming a payload: persist the
    /// page and continue on the next one.
    fn roll_var_page(&mut self, key: u64) -> Result<()> {
        {
            let (wbuf, rbuf) = self
                .buffers
                .pair_mut(self.slots.var_write, self.slots.var_read);
            self.var
                .as_mut()
                .expect("var log present when use_vdata")
                .write(wbuf, rbuf)?;
        }
        {
            let buf = self.buffers.slot_mut(self.slots.var_write);
            let mut page = VarViewMut::new(buf, self.layout.key_size);
            page.init_page();
            page.set_max_key(key);
        }
        let header = self.var_ref().header_size() as u32;
        self.current_var_loc = self.current_var_loc.wrapping_add(header);
        Ok(())
    }

    // ---- init & recovery ----

    fn init_data(&mut self, reset: bool) -> Result<()> {
        {
            let buf = self.buffers.slot_mut(self.slots.data_write);
            DataViewMut::new(buf, &self.layout).init_page();
        }
        if !reset && self.data.open(FileMode::RPlusB).is_ok() {
            if self.rlc.is_some() {
                self.recover_data_rlc()?;
            } else {
                self.recover_data()?;
            }
            return Ok(());
        }
        self.data.open(FileMode::WPlusB)
    }

    fn init_index(&mut self, reset: bool) -> Result<()> {
        let Some(index) = &mut self.index else {
            return Ok(());
        };
        {
            let buf = self.buffers.slot_mut(self.slots.index_write);
            let mut page = IndexViewMut::new(buf, &index.layout);
            page.init_page();
            page.set_first_data_page(self.data.cursor.next_page_id);
        }
        if !reset
            && self
                .index
                .as_mut()
                .expect("checked above")
                .log
                .open(FileMode::RPlusB)
                .is_ok()
        {
            return self.recover_index();
        }
        self.index
            .as_mut()
            .expect("checked above")
            .log
            .open(FileMode::WPlusB)
    }

    fn init_var(&mut self, reset: bool) -> Result<()> {
        if self.var.is_none() {
            return Ok(());
        }
        {
            let buf = self.buffers.slot_mut(self.slots.var_write);
            VarViewMut::new(buf, self.layout.key_size).init_page();
        }
        self.current_var_loc = self.var_ref().header_size() as u32;
        if !reset && self.var_mut().open(FileMode::RPlusB).is_ok() {
            return self.recover_var();
        }
        self.var_mut().open(FileMode::WPlusB)
    }

    /// Reconstructs the data cursor, minimum key, and spline by walking
    /// physical pages while their logical ids stay consecutive. A jump
    /// of exactly `1 - num_pages` marks a wrapped log.
    fn recover_data(&mut self) -> Result<()> {
        let layout = self.layout;
        let num = self.data.num_pages();

        let mut max_id = 0u32;
        let mut count = 0u32;
        let mut phys = 0u32;
        let mut wrapped = false;
        let mut oldest_id = 0u32;
        while count < num {
            let ok = {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read_phys(phys, buf).is_ok()
            };
            if !ok {
                break;
            }
            let id = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            )
            .page_id();
            if count == 0 || id == max_id + 1 {
                max_id = id;
                phys += 1;
                count += 1;
                self.bump_max_error_from(self.slots.data_read);
            } else {
                wrapped =
                    id == max_id.wrapping_sub(num).wrapping_add(1);
                oldest_id = id;
                break;
            }
        }

        if count == 0 {
            debug!("data file holds no pages, starting empty");
            return Ok(());
        }

        self.data.cursor.next_page_id = max_id + 1;
        let phys_smallest = if wrapped { oldest_id % num } else { 0 };
        {
            let buf = self.buffers.slot_mut(self.slots.data_read);
            self.data.read_phys(phys_smallest, buf)?;
        }
        let mut min_id = DataView::new(
            self.buffers.slot(self.slots.data_read),
            &layout,
        )
        .page_id();
        if wrapped {
            // Reclamation always advances the window a whole erase block
            // at a time; pages of a reclaimed block that were not yet
            // overwritten are dead, not live. Rounding up keeps them out.
            let erase = self.cfg.erase_size_pages;
            min_id = min_id.div_ceil(erase) * erase;
        }
        self.data.cursor.min_page_id = min_id;
        self.data.cursor.avail_pages = num + min_id - max_id - 1;

        {
            let buf = self.buffers.slot_mut(self.slots.data_read);
            self.data.read(min_id, buf)?;
        }
        self.min_key = Some(
            DataView::new(self.buffers.slot(self.slots.data_read), &layout)
                .first_key(),
        );

        {
            let buf = self.buffers.slot_mut(self.slots.data_read);
            self.data.read(max_id, buf)?;
        }
        self.refresh_avg_key_diff_from(self.slots.data_read);

        if self.spline.is_some() {
            self.replay_spline()?;
        }

        info!(
            next_page_id = self.data.cursor.next_page_id,
            min_page_id = self.data.cursor.min_page_id,
            wrapped,
            "recovered data log"
        );
        Ok(())
    }

    /// Recovery with a consistency window in the file. Data pages are
    /// the ones whose logical id maps back to the slot they occupy;
    /// everything else in the window area is a temporary page.
    fn recover_data_rlc(&mut self) -> Result<()> {
        let layout = self.layout;
        let num = self.data.num_pages();
        let erase = self.cfg.erase_size_pages;
        let usable = num - 2 * erase;

        let mut present: Vec<Option<u32>> = vec![None; num as usize];
        for phys in 0..num {
            let ok = {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read_phys(phys, buf).is_ok()
            };
            if !ok {
                continue;
            }
            let id = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            )
            .page_id();
            if id % num == phys {
                present[phys as usize] = Some(id);
                self.bump_max_error_from(self.slots.data_read);
            }
        }

        let max_id = present.iter().flatten().copied().max();
        if let Some(max_id) = max_id {
            let mut min_id = max_id;
            while min_id > 0
                && max_id - min_id + 1 < usable
                && present[((min_id - 1) % num) as usize]
                    == Some(min_id - 1)
            {
                min_id -= 1;
            }
            self.data.cursor.next_page_id = max_id + 1;
            self.data.cursor.min_page_id = min_id;
            self.data.cursor.avail_pages =
                usable - (max_id + 1 - min_id);

            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(min_id, buf)?;
            }
            self.min_key = Some(
                DataView::new(
                    self.buffers.slot(self.slots.data_read),
                    &layout,
                )
                .first_key(),
            );
            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(max_id, buf)?;
            }
            self.refresh_avg_key_diff_from(self.slots.data_read);
            if self.spline.is_some() {
                self.replay_spline()?;
            }
        }

        let next_id = self.data.cursor.next_page_id;
        let start = ((next_id / erase) * erase + erase) % num;

        // The newest well-formed temporary page stamped with the next
        // logical id is the surviving partial page.
        let last_durable_key = if next_id > 0 {
            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(next_id - 1, buf)?;
            }
            Some(
                DataView::new(
                    self.buffers.slot(self.slots.data_read),
                    &layout,
                )
                .last_key(),
            )
        } else {
            None
        };

        let mut best: Option<(u32, u16)> = None;
        for i in 0..2 * erase {
            let slot = (start + i) % num;
            let ok = {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read_phys(slot, buf).is_ok()
            };
            if !ok {
                continue;
            }
            let view = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            );
            if view.page_id() != next_id {
                continue;
            }
            let count = view.count();
            if count == 0 || count > layout.max_records {
                continue;
            }
            let mut ascending = true;
            let mut prev = view.record_key(0);
            for record in 1..count {
                let key = view.record_key(record);
                if key <= prev {
                    ascending = false;
                    break;
                }
                prev = key;
            }
            if !ascending {
                continue;
            }
            if let Some(last) = last_durable_key {
                if view.record_key(0) <= last {
                    continue;
                }
            }
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((slot, count));
            }
        }

        match best {
            Some((slot, count)) => {
                {
                    let buf =
                        self.buffers.slot_mut(self.slots.data_read);
                    self.data.read_phys(slot, buf)?;
                }
                self.buffers.copy_slot(
                    self.slots.data_read,
                    self.slots.data_write,
                );
                self.data.invalidate_cache();
                self.rlc = Some(RlcWindow {
                    start,
                    next: (slot + 1) % num,
                });
                info!(count, "recovered a partial page of records");
            }
            None => {
                self.rlc = Some(RlcWindow { start, next: start });
            }
        }

        info!(
            next_page_id = self.data.cursor.next_page_id,
            min_page_id = self.data.cursor.min_page_id,
            "recovered data log (record-level consistency)"
        );
        Ok(())
    }

    fn refresh_avg_key_diff_from(&mut self, slot: usize) {
        let blocks = u64::from(
            (self.data.num_pages() - self.data.cursor.avail_pages).max(1),
        );
        let max_key =
            DataView::new(self.buffers.slot(slot), &self.layout)
                .last_key();
        let min_key = self.min_key.unwrap_or(max_key);
        self.avg_key_diff = max_key.saturating_sub(min_key)
            / blocks
            / u64::from(self.layout.max_records);
    }

    /// Streams every live page in logical order back through spline
    /// training.
    fn replay_spline(&mut self) -> Result<()> {
        let layout = self.layout;
        let (min_id, next_id) =
            (self.data.cursor.min_page_id, self.data.cursor.next_page_id);
        for id in min_id..next_id {
            {
                let buf = self.buffers.slot_mut(self.slots.data_read);
                self.data.read(id, buf)?;
            }
            let first_key = DataView::new(
                self.buffers.slot(self.slots.data_read),
                &layout,
            )
            .first_key();
            if let Some(spline) = self.spline.as_mut() {
                spline.add(first_key, id);
                if let Some(radix) = self.radix.as_mut() {
                    radix.add(spline);
                }
            }
        }
        Ok(())
    }

    fn recover_index(&mut self) -> Result<()> {
        let num = self
            .index
            .as_ref()
            .expect("called with index")
            .log
            .num_pages();

        let mut max_id = 0u32;
        let mut count = 0u32;
        let mut phys = 0u32;
        let mut wrapped = false;
        let mut oldest_id = 0u32;
        while count < num {
            let ok = {
                let (buf, index) = (
                    self.buffers.slot_mut(self.slots.index_read),
                    self.index.as_mut().expect("called with index"),
                );
                index.log.read_phys(phys, buf).is_ok()
            };
            if !ok {
                break;
            }
            let id = LittleEndian::read_u32(
                &self.buffers.slot(self.slots.index_read)[0..4],
            );
            if count == 0 || id == max_id + 1 {
                max_id = id;
                phys += 1;
                count += 1;
            } else {
                wrapped =
                    id == max_id.wrapping_sub(num).wrapping_add(1);
                oldest_id = id;
                break;
            }
        }

        if count == 0 {
            return Ok(());
        }
        let phys_smallest = if wrapped { oldest_id % num } else { 0 };
        {
            let (buf, index) = (
                self.buffers.slot_mut(self.slots.index_read),
                self.index.as_mut().expect("called with index"),
            );
            index.log.read_phys(phys_smallest, buf)?;
        }
        let min_id = LittleEndian::read_u32(
            &self.buffers.slot(self.slots.index_read)[0..4],
        );
        let index = self.index.as_mut().expect("called with index");
        index.log.cursor.next_page_id = max_id + 1;
        index.log.cursor.min_page_id = min_id;
        index.log.cursor.avail_pages = num + min_id - max_id - 1;
        info!(
            next_page_id = max_id + 1,
            min_page_id = min_id,
            "recovered index log"
        );
        Ok(())
    }

    fn recover_var(&mut self) -> Result<()> {
        let key_size = self.layout.key_size;
        let num = self.var_ref().num_pages();

        let mut max_id = 0u32;
        let mut count = 0u32;
        let mut phys = 0u32;
        let mut wrapped = false;
        let mut oldest_id = 0u32;
        while count < num {
            let ok = {
                let (buf, var) = (
                    self.buffers.slot_mut(self.slots.var_read),
                    self.var.as_mut().expect("called with var"),
                );
                var.read_phys_uncached(phys, buf).is_ok()
            };
            if !ok {
                break;
            }
            let id =
                VarView::new(self.buffers.slot(self.slots.var_read), key_size)
                    .page_id();
            if count == 0 || id == max_id + 1 {
                max_id = id;
                phys += 1;
                count += 1;
            } else {
                wrapped =
                    id == max_id.wrapping_sub(num).wrapping_add(1);
                oldest_id = id;
                break;
            }
        }

        if count == 0 {
            return Ok(());
        }

        let mut min_page_id = 0u32;
        if wrapped {
            let phys_smallest = oldest_id % num;
            {
                let (buf, var) = (
                    self.buffers.slot_mut(self.slots.var_read),
                    self.var.as_mut().expect("called with var"),
                );
                var.read_phys_uncached(phys_smallest, buf)?;
            }
            let view = VarView::new(
                self.buffers.slot(self.slots.var_read),
                key_size,
            );
            min_page_id = view.page_id();
            let max_key = view.max_key();
            self.var_mut().min_record_id = max_key + 1;
        }

        let var = self.var.as_mut().expect("called with var");
        var.next_page_id = max_id + 1;
        var.avail_pages = num + min_page_id - max_id - 1;
        let header = var.header_size() as u32;
        let page_size = self.layout.page_size as u32;
        self.current_var_loc =
            (var.next_page_id % num) * page_size + header;
        info!(
            next_page_id = max_id + 1,
            min_record_id = self.var_ref().min_record_id,
            "recovered variable data log"
        );
        Ok(())
    }
}

// ---- in-page search helpers ----

/// Key-per-slot slope of the page, from its first and last records.
fn page_slope(layout: &PageLayout, buf: &[u8]) -> f64 {
    let view = DataView::new(buf, layout);
    let count = view.count();
    if count <= 1 {
        return 1.0;
    }
    let first = view.record_key(0) as f64;
    let last = view.record_key(count - 1) as f64;
    (last - first) / f64::from(count - 1)
}

/// Largest deviation between a record's slot and the slot its key
/// projects to under the page's own slope.
fn page_max_error(layout: &PageLayout, buf: &[u8]) -> u32 {
    let view = DataView::new(buf, layout);
    let count = view.count();
    if count == 0 {
        return 0;
    }
    let min_key = view.record_key(0);
    let slope = page_slope(layout, buf);
    if slope <= 0.0 {
        return u32::from(layout.max_records);
    }
    let mut max_error = 0u32;
    for slot in 0..count {
        let relative = (view.record_key(slot) - min_key) as f64;
        let error = (relative / slope - f64::from(slot)).abs() as u32;
        if error > max_error {
            max_error = error;
        }
    }
    max_error.min(u32::from(layout.max_records))
}

/// Projects `key` onto a slot index using the page slope.
fn estimate_key_location(
    layout: &PageLayout,
    buf: &[u8],
    key: u64,
) -> i64 {
    let view = DataView::new(buf, layout);
    let slope = page_slope(layout, buf);
    if slope <= 0.0 {
        return 0;
    }
    let first = view.record_key(0);
    (key.saturating_sub(first) as f64 / slope) as i64
}

/// Binary search within one page, first probing the slot the linear
/// estimate points at.
pub(crate) fn search_page(
    layout: &PageLayout,
    buf: &[u8],
    key: u64,
) -> Option<u16> {
    let view = DataView::new(buf, layout);
    let count = i64::from(view.count());
    if count == 0 {
        return None;
    }
    let mut first = 0i64;
    let mut last = count - 1;
    let mut middle = estimate_key_location(layout, buf, key);
    if middle >= count || middle <= 0 {
        middle = (first + last) / 2;
    }
    if middle > last {
        middle = last;
    }
    while first <= last {
        let probe = view.record_key(middle as u16);
        match probe.cmp(&key) {
            Ordering::Less => first = middle + 1,
            Ordering::Equal => return Some(middle as u16),
            Ordering::Greater => last = middle - 1,
        }
        middle = (first + last) / 2;
    }
    None
}

fn validate<F>(
    cfg: &Config,
    files: &Files<F>,
    bitmap: Option<&dyn BitmapCodec>,
) -> Result<()> {
    let err = |msg: String| Err(TidelogError::Config(msg));

    if cfg.key_size == 0 || cfg.key_size > 8 {
        return err(format!(
            "key size must be 1..=8 bytes, got {}",
            cfg.key_size
        ));
    }
    if cfg.data_size == 0 {
        return err("data size must be at least one byte".to_string());
    }
    if cfg.erase_size_pages == 0 {
        return err("erase block size must be non-zero".to_string());
    }
    if cfg.num_data_pages == 0
        || cfg.num_data_pages % cfg.erase_size_pages != 0
    {
        return err(format!(
            "erase block size {} must divide the data page count {}",
            cfg.erase_size_pages, cfg.num_data_pages
        ));
    }
    let mut min_blocks = 2;
    if cfg.use_index {
        min_blocks += 2;
    }
    if cfg.record_level_consistency {
        min_blocks += 2;
    }
    if cfg.num_data_pages < min_blocks * cfg.erase_size_pages {
        return err(format!(
            "data file needs at least {} erase blocks for this configuration",
            min_blocks
        ));
    }

    if cfg.use_index {
        if files.index.is_none() {
            return err("index enabled but no index file given".to_string());
        }
        if !cfg.use_bmap {
            return err(
                "index requires the bitmap option; the index stores page \
                 bitmaps"
                    .to_string(),
            );
        }
        if cfg.num_index_pages < 2 * cfg.erase_size_pages
            || cfg.num_index_pages % cfg.erase_size_pages != 0
        {
            return err(format!(
                "index file needs a multiple of the erase block size, at \
                 least two blocks, got {} pages",
                cfg.num_index_pages
            ));
        }
    }

    if cfg.use_bmap {
        if cfg.bitmap_size == 0 {
            return err("bitmap enabled with zero size".to_string());
        }
        match bitmap {
            None => {
                return err(
                    "bitmap enabled but no bitmap codec given".to_string()
                )
            }
            Some(codec) if codec.size_bytes() != cfg.bitmap_size => {
                return err(format!(
                    "bitmap codec produces {} bytes but the configuration \
                     says {}",
                    codec.size_bytes(),
                    cfg.bitmap_size
                ));
            }
            Some(_) => {}
        }
    }

    if cfg.use_vdata {
        if files.var.is_none() {
            return err(
                "variable data enabled but no var file given".to_string(),
            );
        }
        if cfg.num_var_pages < 2 * cfg.erase_size_pages
            || cfg.num_var_pages % cfg.erase_size_pages != 0
        {
            return err(format!(
                "var file needs a multiple of the erase block size, at \
                 least two blocks, got {} pages",
                cfg.num_var_pages
            ));
        }
        if cfg.page_size <= cfg.key_size + 4 + LEN_PREFIX {
            return err("page size too small for var pages".to_string());
        }
    }

    if cfg.use_max_min && cfg.compare_data.is_none() {
        return err(
            "min/max headers need a data comparator".to_string(),
        );
    }

    let required_blocks = 2
        + if cfg.use_index { 2 } else { 0 }
        + if cfg.use_vdata { 2 } else { 0 };
    if cfg.buffer_blocks != 0 && cfg.buffer_blocks < required_blocks {
        return err(format!(
            "this configuration needs at least {} page buffers, got {}",
            required_blocks, cfg.buffer_blocks
        ));
    }

    Ok(())
}
