use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::common::error::{Result, TidelogError};
use crate::env::{FileMode, StorageFile};

/// An implementation of [`StorageFile`] backed by [`std::fs`].
#[derive(Debug)]
pub struct StdFile {
    path: PathBuf,
    file: Option<File>,
}

impl StdFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| TidelogError::Storage("file is not open".to_string()))
    }
}

impl StorageFile for StdFile {
    fn open(&mut self, mode: FileMode) -> Result<()> {
        let file = match mode {
            FileMode::WPlusB => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?,
            FileMode::RPlusB => {
                OpenOptions::new().read(true).write(true).open(&self.path)?
            }
        };
        self.file = Some(file);
        Ok(())
    }

    fn read_page(&mut self, buf: &mut [u8], page_num: u32) -> Result<()> {
        let pos = page_num as u64 * buf.len() as u64;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, buf: &[u8], page_num: u32) -> Result<()> {
        let pos = page_num as u64 * buf.len() as u64;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file_mut()?.sync_data()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}
