//! tidelog is an embedded time-series key-value storage engine for
//! memory-constrained devices with block-addressable storage.
//!
//! Records with strictly ascending integer keys and fixed-size payloads
//! (plus optional variable-length blobs) are appended to a bounded
//! circular page log. Point and range queries run in sub-linear time
//! through a learned index: an online greedy-spline model of
//! `key -> page`, optionally fronted by a radix prefix table. The whole
//! engine works out of a buffer pool of a handful of page-sized slots
//! and recovers its in-memory state from the log files after an unclean
//! shutdown.
//!
//! ```no_run
//! use tidelog::{Config, Db, Files, StdFile};
//!
//! # fn main() -> tidelog::Result<()> {
//! let mut cfg = Config::new(4, 4, 512);
//! cfg.num_data_pages = 1024;
//! let files = Files::data_only(StdFile::new("data.bin"));
//! let mut db: Db<u32, StdFile> = Db::open(cfg, files, None)?;
//!
//! db.put(42, &100u32.to_le_bytes())?;
//! let mut data = [0u8; 4];
//! assert!(db.get(42, &mut data)?);
//! # Ok(())
//! # }
//! ```

mod bitmap;
mod buffer;
mod codec;
mod common;
mod engine;
mod env;
mod index;
mod iter;
mod log;
mod radix;
mod spline;
mod var;

pub use bitmap::BitmapCodec;
pub use common::error::{Result, TidelogError};
pub use engine::{
    Config, DataCompare, Db, Files, IndexKey, SearchStrategy, Stats,
    NO_VAR_DATA,
};
pub use env::{FileMode, MemFile, StdFile, StorageFile};
pub use iter::{Scan, ScanQuery};
pub use var::{VarData, VarStream};
