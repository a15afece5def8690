//! Range scans.
//!
//! A [`Scan`] walks the live pages in logical order, emitting records
//! that pass the key and data predicates. With a bitmap index configured
//! it reads one index page per batch of data pages and skips data pages
//! whose bitmap cannot overlap the query, which is where the index pays
//! for itself on selective scans. The unpersisted write buffer is
//! scanned last, so a scan sees every live record exactly once.

use crate::bitmap::overlaps;
use crate::codec::{DataView, IndexView};
use crate::common::error::{Result, TidelogError};
use crate::engine::{Db, IndexKey};
use crate::env::StorageFile;
use crate::var::VarData;

/// Predicates for a range scan. All bounds are inclusive and optional.
#[derive(Clone, Debug)]
pub struct ScanQuery<K> {
    pub min_key: Option<K>,
    pub max_key: Option<K>,
    pub min_data: Option<Vec<u8>>,
    pub max_data: Option<Vec<u8>>,
}

impl<K> Default for ScanQuery<K> {
    fn default() -> Self {
        Self {
            min_key: None,
            max_key: None,
            min_data: None,
            max_data: None,
        }
    }
}

enum ScanOutcome<K> {
    Match((K, Vec<u8>)),
    NoMatch,
    NoMore,
}

/// A cursor over the records matching a [`ScanQuery`], in key order.
pub struct Scan<'a, K: IndexKey, F: StorageFile> {
    db: &'a mut Db<K, F>,
    next_data_page: u32,
    next_data_rec: u16,
    /// Index page that covered the last pruned data page. Both cursors
    /// only move forward, so the search for the next one starts here.
    index_page_hint: u32,
    min_key: Option<u64>,
    max_key: Option<u64>,
    min_data: Option<Vec<u8>>,
    max_data: Option<Vec<u8>>,
    query_bitmap: Option<Vec<u8>>,
}

impl<K: IndexKey, F: StorageFile> Db<K, F> {
    /// Starts a scan over the records matching `query`.
    pub fn scan(&mut self, query: ScanQuery<K>) -> Result<Scan<'_, K, F>> {
        for bound in [&query.min_data, &query.max_data].into_iter().flatten()
        {
            if bound.len() != self.layout.data_size {
                return Err(TidelogError::Config(format!(
                    "data bound must be exactly {} bytes",
                    self.layout.data_size
                )));
            }
            if self.cfg.compare_data.is_none() {
                return Err(TidelogError::Config(
                    "data predicates need a data comparator".to_string(),
                ));
            }
        }

        let query_bitmap = match (&self.bitmap, &query.min_data, &query.max_data)
        {
            (Some(codec), min, max) if min.is_some() || max.is_some() => {
                let mut bitmap = vec![0u8; self.cfg.bitmap_size];
                codec.build_from_range(
                    min.as_deref(),
                    max.as_deref(),
                    &mut bitmap,
                );
                Some(bitmap)
            }
            _ => None,
        };

        // Let the learned index pick the first page worth reading.
        let next_data_page = match (query.min_key, &self.spline) {
            (Some(min_key), Some(spline)) if spline.count() > 0 => {
                let raw = min_key.to_raw();
                let fit = match &self.radix {
                    Some(radix) => spline.find_within(
                        raw,
                        Some(radix.lookup(raw, spline.count())),
                    ),
                    None => spline.find(raw),
                };
                fit.low.max(self.data.cursor.min_page_id)
            }
            _ => self.data.cursor.min_page_id,
        };

        Ok(Scan {
            db: self,
            next_data_page,
            next_data_rec: 0,
            index_page_hint: 0,
            min_key: query.min_key.map(K::to_raw),
            max_key: query.max_key.map(K::to_raw),
            min_data: query.min_data,
            max_data: query.max_data,
            query_bitmap,
        })
    }
}

impl<K: IndexKey, F: StorageFile> Scan<'_, K, F> {
    /// Returns the next matching record, or `None` when the scan is
    /// done.
    pub fn next_record(&mut self) -> Result<Option<(K, Vec<u8>)>> {
        loop {
            let next_page_id = self.db.data.cursor.next_page_id;
            if self.next_data_page > next_page_id {
                return Ok(None);
            }

            if self.next_data_page == next_page_id {
                // Every persisted page is behind us; finish with the
                // write buffer.
                let count = DataView::new(
                    self.db.buffers.slot(self.db.slots.data_write),
                    &self.db.layout,
                )
                .count();
                if count == 0 {
                    return Ok(None);
                }
                self.db.buffers.copy_slot(
                    self.db.slots.data_write,
                    self.db.slots.data_read,
                );
                self.db.data.invalidate_cache();
                return match self.scan_buffered_page() {
                    ScanOutcome::Match(record) => Ok(Some(record)),
                    _ => Ok(None),
                };
            }

            if self.next_data_rec == 0 && self.query_bitmap.is_some() {
                if !self.page_can_match()? {
                    self.next_data_page += 1;
                    continue;
                }
            }

            {
                let buf = self.db.buffers.slot_mut(self.db.slots.data_read);
                self.db.data.read(self.next_data_page, buf)?;
            }
            match self.scan_buffered_page() {
                ScanOutcome::Match(record) => return Ok(Some(record)),
                ScanOutcome::NoMore => return Ok(None),
                ScanOutcome::NoMatch => {
                    self.next_data_page += 1;
                    self.next_data_rec = 0;
                }
            }
        }
    }

    /// Like [`Scan::next_record`], but also resolves the record's
    /// variable payload.
    pub fn next_var(&mut self) -> Result<Option<(K, Vec<u8>, VarData)>> {
        if !self.db.cfg.use_vdata {
            return Err(TidelogError::Config(
                "variable data is not enabled".to_string(),
            ));
        }
        let Some((key, data)) = self.next_record()? else {
            return Ok(None);
        };
        if self.next_data_page == self.db.data.cursor.next_page_id {
            // Reading out of the write buffer; its payloads may still be
            // buffered too.
            self.db.flush_var_page()?;
        }
        let slot = self.next_data_rec - 1;
        let var = self.db.resolve_var_stream(key.to_raw(), slot)?;
        Ok(Some((key, data, var)))
    }

    /// Checks the index bitmap for the page the cursor is about to read.
    /// True when the page must be read (overlap, or no index coverage).
    ///
    /// The division over the per-page capacity is only a first guess:
    /// flushed index pages may be partially filled, shifting every later
    /// bitmap. The header's first-summarised-page field says which data
    /// pages an index page really covers, so the guess is validated and
    /// walked forward until the covering page (or a gap) is found.
    fn page_can_match(&mut self) -> Result<bool> {
        let Some(index) = self.db.index.as_ref() else {
            return Ok(true);
        };
        let per_page = u32::from(index.layout.max_records);
        let cursor = index.log.cursor;
        let data_page = self.next_data_page;

        let mut candidate = (data_page / per_page)
            .max(self.index_page_hint)
            .max(cursor.min_page_id);
        loop {
            if candidate >= cursor.next_page_id {
                // Bitmap not persisted (still in the index write buffer,
                // or the index wrapped past it); read the data page.
                return Ok(true);
            }
            {
                let buf =
                    self.db.buffers.slot_mut(self.db.slots.index_read);
                self.db
                    .index
                    .as_mut()
                    .expect("checked above")
                    .log
                    .read(candidate, buf)?;
            }
            let index = self.db.index.as_ref().expect("checked above");
            let view = IndexView::new(
                self.db.buffers.slot(self.db.slots.index_read),
                &index.layout,
            );
            let first = view.first_data_page();
            let covered = u32::from(view.count());
            if data_page < first {
                return Ok(true);
            }
            if data_page < first + covered {
                self.index_page_hint = candidate;
                let page_bitmap = view.bitmap((data_page - first) as u16);
                let query =
                    self.query_bitmap.as_ref().expect("checked by caller");
                return Ok(overlaps(query, page_bitmap));
            }
            candidate += 1;
        }
    }

    /// Scans the page in the read buffer from the cursor position.
    fn scan_buffered_page(&mut self) -> ScanOutcome<K> {
        let layout = self.db.layout;
        let compare = self.db.cfg.compare_data;
        let view = DataView::new(
            self.db.buffers.slot(self.db.slots.data_read),
            &layout,
        );
        let count = view.count();
        while self.next_data_rec < count {
            let rec = self.next_data_rec;
            self.next_data_rec += 1;

            let key = view.record_key(rec);
            if let Some(min) = self.min_key {
                if key < min {
                    continue;
                }
            }
            if let Some(max) = self.max_key {
                if key > max {
                    // Keys only grow from here on.
                    return ScanOutcome::NoMore;
                }
            }
            let data = view.record_data(rec);
            if let Some(min) = &self.min_data {
                if compare.expect("validated by scan")(data, min)
                    == std::cmp::Ordering::Less
                {
                    continue;
                }
            }
            if let Some(max) = &self.max_data {
                if compare.expect("validated by scan")(data, max)
                    == std::cmp::Ordering::Greater
                {
                    continue;
                }
            }
            return ScanOutcome::Match((K::from_raw(key), data.to_vec()));
        }
        ScanOutcome::NoMatch
    }
}

impl<K: IndexKey, F: StorageFile> Iterator for Scan<'_, K, F> {
    type Item = Result<(K, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
