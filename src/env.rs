//! Storage environments for tidelog to run against different media.
//!
//! The engine never touches the filesystem directly. Everything goes
//! through [`StorageFile`], a page-granularity capability the host
//! supplies for each of the data, index, and variable-data files. On a
//! desktop that is a regular file ([`StdFile`]); on a device it would be
//! an SD card or dataflash driver; in tests it is usually [`MemFile`].

mod memfile;
mod stdfile;

pub use memfile::MemFile;
pub use stdfile::StdFile;

use crate::common::error::Result;

/// How a file is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileMode {
    /// Read/write, created if missing, truncated if present ("w+b").
    WPlusB,
    /// Read/write, must already exist, contents kept ("r+b").
    RPlusB,
}

/// A file that can be read and written one page at a time.
///
/// Page numbers are offsets from the beginning of the file; the page size
/// is the length of the buffer passed in. Implementations must fail a
/// read of a page that was never written so that recovery can find the
/// end of the log.
pub trait StorageFile {
    fn open(&mut self, mode: FileMode) -> Result<()>;

    /// Reads one page into `buf`.
    fn read_page(&mut self, buf: &mut [u8], page_num: u32) -> Result<()>;

    /// Writes one page from `buf`.
    fn write_page(&mut self, buf: &[u8], page_num: u32) -> Result<()>;

    /// Erases the physical pages in `[start_page, end_page)`. Media that
    /// erase on write may leave this a no-op.
    fn erase_pages(&mut self, start_page: u32, end_page: u32) -> Result<()> {
        let _ = (start_page, end_page);
        Ok(())
    }

    /// Pushes any buffered writes down to the medium.
    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
