//! Circular log for variable-length payloads.
//!
//! Records that carry a blob store a byte offset into this log's address
//! space (`num_pages * page_size` bytes, wrapping). Each blob is a 4-byte
//! little-endian length followed by the payload, which may straddle any
//! number of pages; every page starts with a small header (logical id
//! plus the largest key whose payload begins on the page).
//!
//! Reclamation works like the data log, but with a twist: before the
//! oldest erase block is overwritten, the last page of that block is read
//! back and `min_var_record_id` becomes its max key plus one. Lookups
//! compare against that watermark to tell "payload gone" from "payload
//! present", so the engine never serves bytes that have been overwritten.

use tracing::{debug, warn};

use crate::codec::{VarView, VarViewMut};
use crate::common::error::Result;
use crate::env::{FileMode, StorageFile};

/// Bytes of the length prefix in front of every payload.
pub(crate) const LEN_PREFIX: usize = 4;

/// A cursor over one record's payload in the variable-data log.
///
/// Obtained from `Db::get_var` or `Scan::next_var`; read it with
/// `Db::var_read` / `Db::var_read_all`. The stream stays valid until the
/// log wraps over the payload's pages.
#[derive(Clone, Debug)]
pub struct VarStream {
    pub(crate) total_bytes: u32,
    pub(crate) bytes_read: u32,
    pub(crate) data_start: u32,
    pub(crate) file_offset: u32,
}

impl VarStream {
    /// Payload length in bytes.
    pub fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u32 {
        self.bytes_read
    }

    /// Rewinds the stream to the start of the payload.
    pub fn reset(&mut self) {
        self.bytes_read = 0;
        self.file_offset = self.data_start;
    }
}

/// What a variable-data lookup produced for a found record.
#[derive(Debug)]
pub enum VarData {
    /// The record was written without a variable payload.
    None,
    /// The payload is live; read it through the stream.
    Stream(VarStream),
    /// The payload existed but the log has since wrapped over it.
    Expired,
}

pub(crate) struct VarLog<F> {
    file: F,
    num_pages: u32,
    erase_pages: u32,
    page_size: usize,
    key_size: usize,
    pub next_page_id: u32,
    pub avail_pages: u32,
    /// Records with keys below this still exist, but their payloads have
    /// been overwritten.
    pub min_record_id: u64,
    buffered_page: Option<u32>,
    pub reads: u32,
    pub writes: u32,
    pub buffer_hits: u32,
}

impl<F: StorageFile> VarLog<F> {
    pub fn new(
        file: F,
        num_pages: u32,
        erase_pages: u32,
        page_size: usize,
        key_size: usize,
    ) -> Self {
        Self {
            file,
            num_pages,
            erase_pages,
            page_size,
            key_size,
            next_page_id: 0,
            avail_pages: num_pages,
            min_record_id: 0,
            buffered_page: None,
            reads: 0,
            writes: 0,
            buffer_hits: 0,
        }
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Header bytes at the start of every var page.
    pub fn header_size(&self) -> usize {
        4 + self.key_size
    }

    /// Size of the wrapping logical address space.
    pub fn span(&self) -> u32 {
        self.num_pages * self.page_size as u32
    }

    pub fn open(&mut self, mode: FileMode) -> Result<()> {
        self.file.open(mode)
    }

    /// Writes the var write buffer to the next slot. When the log is
    /// full this first reads back the last page of the erase block being
    /// sacrificed and advances the expiry watermark past its max key.
    pub fn write(
        &mut self,
        write_buf: &mut [u8],
        read_buf: &mut [u8],
    ) -> Result<u32> {
        let phys = self.next_page_id % self.num_pages;

        if self.avail_pages == 0 {
            self.avail_pages += self.erase_pages;
            let last_erased =
                (phys + self.erase_pages - 1) % self.num_pages;
            self.read(last_erased, read_buf)?;
            let max_key = VarView::new(read_buf, self.key_size).max_key();
            self.min_record_id = max_key + 1;
            debug!(
                min_record_id = self.min_record_id,
                "variable log wrapped, expired older payloads"
            );
        }

        VarViewMut::new(write_buf, self.key_size)
            .set_page_id(self.next_page_id);
        if let Err(e) = self.file.write_page(write_buf, phys) {
            warn!(page_id = self.next_page_id, "failed to write var page");
            return Err(e);
        }
        self.next_page_id += 1;
        self.avail_pages -= 1;
        self.writes += 1;
        Ok(self.next_page_id - 1)
    }

    /// Reads a physical var page through the single-page cache.
    pub fn read(&mut self, phys: u32, buf: &mut [u8]) -> Result<()> {
        if self.buffered_page == Some(phys) {
            self.buffer_hits += 1;
            return Ok(());
        }
        self.file.read_page(buf, phys)?;
        self.reads += 1;
        self.buffered_page = Some(phys);
        Ok(())
    }

    /// Uncached read used by recovery.
    pub fn read_phys_uncached(
        &mut self,
        phys: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        self.buffered_page = None;
        self.file.read_page(buf, phys)?;
        self.reads += 1;
        Ok(())
    }

    /// Copies payload bytes into `out`, following page boundaries and
    /// skipping per-page headers. Returns the number of bytes produced.
    pub fn stream_read(
        &mut self,
        stream: &mut VarStream,
        out: &mut [u8],
        read_buf: &mut [u8],
    ) -> Result<usize> {
        if out.is_empty() || stream.bytes_read >= stream.total_bytes {
            return Ok(0);
        }
        let page_size = self.page_size as u32;
        let mut page =
            (stream.file_offset / page_size) % self.num_pages;
        self.read(page, read_buf)?;

        let mut amt = 0usize;
        while amt < out.len() && stream.bytes_read < stream.total_bytes {
            let page_offset = (stream.file_offset % page_size) as usize;
            let to_read = (stream.total_bytes - stream.bytes_read)
                .min(page_size - page_offset as u32)
                .min((out.len() - amt) as u32)
                as usize;
            out[amt..amt + to_read]
                .copy_from_slice(&read_buf[page_offset..page_offset + to_read]);
            amt += to_read;
            stream.bytes_read += to_read as u32;
            stream.file_offset =
                stream.file_offset.wrapping_add(to_read as u32);

            if amt < out.len() && stream.bytes_read < stream.total_bytes {
                page = (page + 1) % self.num_pages;
                self.read(page, read_buf)?;
                stream.file_offset = stream
                    .file_offset
                    .wrapping_add(self.header_size() as u32);
            }
        }
        Ok(amt)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MemFile;
    use byteorder::{ByteOrder, LittleEndian};

    const PAGE: usize = 64;
    const KEY: usize = 4;

    fn var_log(num_pages: u32) -> VarLog<MemFile> {
        let mut file = MemFile::new();
        file.open(FileMode::WPlusB).unwrap();
        VarLog::new(file, num_pages, 2, PAGE, KEY)
    }

    #[test]
    fn wrap_advances_expiry_watermark() -> Result<()> {
        let mut log = var_log(4);
        let mut write = vec![0u8; PAGE];
        let mut read = vec![0u8; PAGE];
        for key in 0..4u64 {
            VarViewMut::new(&mut write, KEY).set_max_key(key);
            log.write(&mut write, &mut read)?;
        }
        assert_eq!(log.min_record_id, 0);

        // Fifth write reclaims the block holding keys 0 and 1.
        VarViewMut::new(&mut write, KEY).set_max_key(4);
        log.write(&mut write, &mut read)?;
        assert_eq!(log.min_record_id, 2);
        Ok(())
    }

    #[test]
    fn stream_read_crosses_pages() -> Result<()> {
        let mut log = var_log(4);
        let header = log.header_size();
        let payload_room = PAGE - header;

        // Hand-build two pages holding one payload split across them.
        let payload: Vec<u8> = (0..(payload_room + 10) as u8).collect();
        let mut page0 = vec![0u8; PAGE];
        let mut page1 = vec![0u8; PAGE];
        let split = payload_room - LEN_PREFIX;
        LittleEndian::write_u32(
            &mut page0[header..header + LEN_PREFIX],
            payload.len() as u32,
        );
        page0[header + LEN_PREFIX..].copy_from_slice(&payload[..split]);
        page1[header..header + (payload.len() - split)]
            .copy_from_slice(&payload[split..]);

        let mut read = vec![0u8; PAGE];
        log.write(&mut page0, &mut read)?;
        log.write(&mut page1, &mut read)?;

        let start = (header + LEN_PREFIX) as u32;
        let mut stream = VarStream {
            total_bytes: payload.len() as u32,
            bytes_read: 0,
            data_start: start,
            file_offset: start,
        };
        let mut out = vec![0u8; payload.len()];
        let n = log.stream_read(&mut stream, &mut out, &mut read)?;
        assert_eq!(n, payload.len());
        assert_eq!(out, payload);
        assert_eq!(stream.bytes_read(), stream.total_bytes());

        // Partial reads resume where they stopped.
        stream.reset();
        let mut first = vec![0u8; 7];
        log.stream_read(&mut stream, &mut first, &mut read)?;
        let mut rest = vec![0u8; payload.len() - 7];
        log.stream_read(&mut stream, &mut rest, &mut read)?;
        assert_eq!(&first[..], &payload[..7]);
        assert_eq!(&rest[..], &payload[7..]);
        Ok(())
    }
}
