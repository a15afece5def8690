#![allow(dead_code)]

use std::cmp::Ordering;

use tidelog::{BitmapCodec, Files, MemFile};

/// Install a test subscriber once so engine tracing shows up with
/// `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn compare_u32(a: &[u8], b: &[u8]) -> Ordering {
    let a = u32::from_le_bytes(a.try_into().unwrap());
    let b = u32::from_le_bytes(b.try_into().unwrap());
    a.cmp(&b)
}

pub fn compare_u64(a: &[u8], b: &[u8]) -> Ordering {
    let a = u64::from_le_bytes(a.try_into().unwrap());
    let b = u64::from_le_bytes(b.try_into().unwrap());
    a.cmp(&b)
}

/// A 16-bucket range bitmap over little-endian u32 data values in
/// `[min, max]`. Bucket 0 uses the high bit, so bits are set in
/// increasing order from the smallest value.
pub struct RangeBitmap16 {
    pub min: u32,
    pub max: u32,
}

impl RangeBitmap16 {
    fn bucket(&self, value: u32) -> u16 {
        if value <= self.min {
            return 0;
        }
        if value >= self.max {
            return 15;
        }
        let span = u64::from(self.max - self.min) + 1;
        ((u64::from(value - self.min) * 16) / span) as u16
    }

    fn mask(bucket: u16) -> u16 {
        1 << (15 - bucket)
    }
}

impl BitmapCodec for RangeBitmap16 {
    fn size_bytes(&self) -> usize {
        2
    }

    fn update(&self, data: &[u8], bitmap: &mut [u8]) {
        let value = u32::from_le_bytes(data.try_into().unwrap());
        let mask = Self::mask(self.bucket(value));
        bitmap[0] |= (mask >> 8) as u8;
        bitmap[1] |= mask as u8;
    }

    fn build_from_range(
        &self,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
        bitmap: &mut [u8],
    ) {
        let lo = min.map_or(0, |d| {
            self.bucket(u32::from_le_bytes(d.try_into().unwrap()))
        });
        let hi = max.map_or(15, |d| {
            self.bucket(u32::from_le_bytes(d.try_into().unwrap()))
        });
        for bucket in lo..=hi {
            let mask = Self::mask(bucket);
            bitmap[0] |= (mask >> 8) as u8;
            bitmap[1] |= mask as u8;
        }
    }

    fn contains(&self, data: &[u8], bitmap: &[u8]) -> bool {
        let value = u32::from_le_bytes(data.try_into().unwrap());
        let mask = Self::mask(self.bucket(value));
        let loaded = u16::from_be_bytes([bitmap[0], bitmap[1]]);
        loaded & mask != 0
    }
}

/// In-memory storage for one database; clones of the handles survive
/// close, so the same set can be reopened to simulate a restart.
pub struct FileSet {
    pub data: MemFile,
    pub index: Option<MemFile>,
    pub var: Option<MemFile>,
}

impl FileSet {
    pub fn new(with_index: bool, with_var: bool) -> Self {
        Self {
            data: MemFile::new(),
            index: with_index.then(MemFile::new),
            var: with_var.then(MemFile::new),
        }
    }

    pub fn files(&self) -> Files<MemFile> {
        Files {
            data: self.data.clone(),
            index: self.index.clone(),
            var: self.var.clone(),
        }
    }
}
