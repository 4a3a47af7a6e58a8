//! File handles for pipeline inputs and outputs.
//!
//! A [`FileHandle`] is an immutable `(root, path)` pair naming a file inside a
//! pipeline stage. Reading is side-effect free; writing goes through an
//! [`OutputFile`] session returned by [`FileHandle::create`], which owns the
//! open stream until it is closed or dropped.
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::FileHandle;
//!
//! let bundle = FileHandle::new("/project/public", "bundle.js");
//! bundle.write_with(|out| {
//!     out.write("var a=1;")?;
//!     out.write("var b=2;")
//! })?;
//! assert_eq!(bundle.read()?, "var a=1;var b=2;");
//! ```

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Error during file handle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FileError {
    /// Read attempted on a file that does not exist
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Write attempted without an open stream
    #[error("Cannot write to unopened file: {}", .0.display())]
    UnopenedFile(PathBuf),
    /// Close attempted without an open stream
    #[error("Cannot close {}: closed stream", .0.display())]
    ClosedStream(PathBuf),
    /// Any other filesystem error
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Full path of the file involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl FileError {
    fn io(path: PathBuf, source: io::Error) -> Self {
        FileError::Io { path, source }
    }

    /// Map a read error, keeping "not found" distinguishable.
    fn from_read(path: PathBuf, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            FileError::NotFound(path)
        } else {
            FileError::io(path, source)
        }
    }
}

/// An addressable file: a base directory and a path relative to it.
///
/// Two handles are equal when both their roots and relative paths are equal.
/// The relative path must not escape the root; this is not validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle {
    /// Absolute base directory
    root: PathBuf,
    /// Path relative to `root`
    path: PathBuf,
}

impl FileHandle {
    /// Create a new file handle.
    ///
    /// # Arguments
    /// - `root` - Absolute base directory
    /// - `path` - Path relative to `root`
    pub fn new(root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), path: path.into() }
    }

    /// Get the base directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path relative to the root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the full path (`root` joined with `path`).
    pub fn fullpath(&self) -> PathBuf {
        self.root.join(&self.path)
    }

    /// Check whether a regular file exists at the full path.
    pub fn exists(&self) -> bool {
        self.fullpath().is_file()
    }

    /// Read the whole file as UTF-8 text.
    pub fn read(&self) -> Result<String, FileError> {
        let fullpath = self.fullpath();
        fs::read_to_string(&fullpath).map_err(|e| FileError::from_read(fullpath, e))
    }

    /// Read the whole file as raw bytes.
    pub fn read_bytes(&self) -> Result<Vec<u8>, FileError> {
        let fullpath = self.fullpath();
        fs::read(&fullpath).map_err(|e| FileError::from_read(fullpath, e))
    }

    /// Create the file for writing.
    ///
    /// Parent directories are created as needed and existing content is
    /// truncated. The returned session owns the stream until it is closed.
    pub fn create(&self) -> Result<OutputFile, FileError> {
        let mut output = OutputFile::new(self.clone());
        output.create()?;
        Ok(output)
    }

    /// Create the file, run `write` against it, and close it.
    ///
    /// The stream is closed on every path out of `write`. When `write` fails
    /// its error is returned and the close result is discarded.
    pub fn write_with<F, E>(&self, write: F) -> Result<(), E>
    where
        F: FnOnce(&mut OutputFile) -> Result<(), E>,
        E: From<FileError>,
    {
        let mut output = self.create()?;
        match write(&mut output) {
            Ok(()) => output.close().map_err(E::from),
            Err(e) => {
                let _ = output.close();
                Err(e)
            }
        }
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fullpath().display())
    }
}

/// A write session on a [`FileHandle`].
///
/// Starts unopened when built with [`OutputFile::new`]; [`OutputFile::create`]
/// opens the stream. Dropping an open session flushes and releases it, but
/// write errors are only reported by an explicit [`OutputFile::close`].
#[derive(Debug)]
pub struct OutputFile {
    /// The file this session writes to
    handle: FileHandle,
    /// Open stream, `None` before create and after close
    stream: Option<BufWriter<File>>,
}

impl OutputFile {
    /// Create an unopened session for `handle`.
    pub fn new(handle: FileHandle) -> Self {
        Self { handle, stream: None }
    }

    /// Get the handle this session writes to.
    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    /// Whether the session currently holds an open stream.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the stream, creating parent directories and truncating the file.
    ///
    /// Calling this on an already open session flushes the previous stream
    /// and starts over with an empty file.
    pub fn create(&mut self) -> Result<(), FileError> {
        let fullpath = self.handle.fullpath();

        if let Some(mut previous) = self.stream.take() {
            previous.flush().map_err(|e| FileError::io(fullpath.clone(), e))?;
        }

        if let Some(parent) = fullpath.parent() {
            fs::create_dir_all(parent).map_err(|e| FileError::io(parent.to_path_buf(), e))?;
        }

        let file = File::create(&fullpath).map_err(|e| FileError::io(fullpath.clone(), e))?;
        self.stream = Some(BufWriter::new(file));
        Ok(())
    }

    /// Append data to the open stream.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> Result<(), FileError> {
        let fullpath = self.handle.fullpath();
        let stream = self.stream.as_mut().ok_or_else(|| FileError::UnopenedFile(fullpath.clone()))?;
        stream.write_all(data.as_ref()).map_err(|e| FileError::io(fullpath, e))
    }

    /// Flush and release the open stream.
    pub fn close(&mut self) -> Result<(), FileError> {
        let fullpath = self.handle.fullpath();
        let mut stream = self.stream.take().ok_or_else(|| FileError::ClosedStream(fullpath.clone()))?;
        stream.flush().map_err(|e| FileError::io(fullpath, e))
    }
}
