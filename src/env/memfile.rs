use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::common::error::{Result, TidelogError};
use crate::env::{FileMode, StorageFile};

/// An in-memory [`StorageFile`].
///
/// The page store lives behind a shared handle so it survives `close`;
/// cloning the handle and reopening simulates a device restart without
/// touching the filesystem. Reads of never-written pages fail, like a
/// short read from a real file.
#[derive(Clone, Debug, Default)]
pub struct MemFile {
    inner: Rc<RefCell<Inner>>,
    is_open: bool,
}

#[derive(Debug, Default)]
struct Inner {
    pages: BTreeMap<u32, Vec<u8>>,
    exists: bool,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages ever written.
    pub fn page_count(&self) -> usize {
        self.inner.borrow().pages.len()
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(TidelogError::Storage("file is not open".to_string()))
        }
    }
}

impl StorageFile for MemFile {
    fn open(&mut self, mode: FileMode) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match mode {
            FileMode::WPlusB => {
                inner.pages.clear();
                inner.exists = true;
            }
            FileMode::RPlusB => {
                if !inner.exists {
                    return Err(TidelogError::Storage(
                        "memory file does not exist".to_string(),
                    ));
                }
            }
        }
        drop(inner);
        self.is_open = true;
        Ok(())
    }

    fn read_page(&mut self, buf: &mut [u8], page_num: u32) -> Result<()> {
        self.check_open()?;
        let inner = self.inner.borrow();
        match inner.pages.get(&page_num) {
            Some(page) if page.len() == buf.len() => {
                buf.copy_from_slice(page);
                Ok(())
            }
            Some(_) => Err(TidelogError::Storage(format!(
                "page {} was written with a different page size",
                page_num
            ))),
            None => Err(TidelogError::Storage(format!(
                "page {} was never written",
                page_num
            ))),
        }
    }

    fn write_page(&mut self, buf: &[u8], page_num: u32) -> Result<()> {
        self.check_open()?;
        self.inner
            .borrow_mut()
            .pages
            .insert(page_num, buf.to_vec());
        Ok(())
    }

    fn erase_pages(&mut self, start_page: u32, end_page: u32) -> Result<()> {
        self.check_open()?;
        let mut inner = self.inner.borrow_mut();
        for page in start_page..end_page {
            inner.pages.remove(&page);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()
    }

    fn close(&mut self) -> Result<()> {
        self.is_open = false;
        Ok(())
    }
}
