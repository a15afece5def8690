//! Bitmap index store.
//!
//! A second circular log that runs parallel to the data log: every time
//! a data page is persisted, its column bitmap is appended here. A range
//! scan can then read one index page and rule out dozens of data pages
//! without touching them. The index is purely an accelerator; losing it
//! (or the tail of it) only costs extra data-page reads.

use crate::codec::{IndexLayout, IndexViewMut};
use crate::common::error::Result;
use crate::env::StorageFile;
use crate::log::PageLog;

pub(crate) struct IndexStore<F> {
    pub log: PageLog<F>,
    pub layout: IndexLayout,
}

impl<F: StorageFile> IndexStore<F> {
    pub fn new(log: PageLog<F>, layout: IndexLayout) -> Self {
        Self { log, layout }
    }

    /// Appends one data page's bitmap to the index write buffer,
    /// persisting the buffer first if it is full. `data_page` is the id
    /// of the data page the bitmap describes; it becomes the first
    /// summarised page of a freshly started index page.
    pub fn append(
        &mut self,
        buf: &mut [u8],
        bitmap: &[u8],
        data_page: u32,
    ) -> Result<()> {
        if IndexViewMut::new(buf, &self.layout).count()
            >= self.layout.max_records
        {
            self.log.write(buf)?;
            let mut page = IndexViewMut::new(buf, &self.layout);
            page.init_page();
            page.set_first_data_page(data_page);
        }
        let mut page = IndexViewMut::new(buf, &self.layout);
        let slot = page.count();
        page.set_bitmap(slot, bitmap);
        page.inc_count();
        Ok(())
    }
}
