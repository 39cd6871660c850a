//! Memory-mapped access to files below a directory root.
//!
//! Directory module readers and directory search-path roots both read resource bytes through
//! [`crate::file::physical::Physical`], which maps a file read-only into the address space and
//! copies out exactly what the caller asks for.
//!
//! # Examples
//!
//! ```rust,ignore
//! use modloader::file::Physical;
//!
//! let physical = Physical::new("classes/com/example/Main.class")?;
//! assert_eq!(&physical.data()[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok::<(), modloader::Error>(())
//! ```

use crate::{
    Error::{self, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A read-only memory map of one file.
///
/// Empty files are not mapped at all (mapping zero bytes is rejected by some platforms); they
/// are represented by an empty buffer instead.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data, `None` for an empty file
    data: Option<Mmap>,
}

impl Physical {
    /// Map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        if file.metadata()?.len() == 0 {
            return Ok(Physical { data: None });
        }

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error::Error(error.to_string())),
        };

        Ok(Physical { data: Some(mmap) })
    }

    /// The complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Copy the mapped contents into an owned buffer.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data().to_vec()
    }
}
