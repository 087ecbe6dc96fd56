use std::io::{self, Write};

use super::header::{Header, ALIGNMENT};
use crate::{CtlutilsError, CtlutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const PADDING: [u8; ALIGNMENT as usize] = [0; ALIGNMENT as usize];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A streaming writer producing a "new ASCII" cpio archive.
///
/// Each entry is a call to [`Writer::write_header`] followed by exactly `size` payload bytes
/// through the [`Write`] implementation. [`Writer::finish`] appends the trailer entry.
pub struct Writer<W> {
    /// The underlying byte sink.
    inner: W,

    /// Total bytes emitted so far.
    written: u64,

    /// Payload bytes the current entry still expects.
    remaining: u64,

    /// The name of the current entry, for error reporting.
    current: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<W: Write> Writer<W> {
    /// Creates a writer at the start of a new archive.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            remaining: 0,
            current: String::new(),
        }
    }

    /// Starts a new entry.
    ///
    /// Fails if the previous entry did not receive all the payload bytes it declared.
    pub fn write_header(&mut self, header: &Header) -> CtlutilsResult<()> {
        if self.remaining > 0 {
            return Err(CtlutilsError::ShortPayload {
                name: self.current.clone(),
                missing: self.remaining,
            });
        }
        self.pad()?;

        let fixed = header.encode();
        self.emit(fixed.as_bytes())?;
        self.emit(header.name.as_bytes())?;
        self.emit(&[0])?;
        self.pad()?;

        self.remaining = u64::from(header.size);
        self.current.clone_from(&header.name);
        Ok(())
    }

    /// Appends a directory entry. Parents are not created implicitly.
    pub fn write_dir(&mut self, name: &str, mode: u32, mtime: u32) -> CtlutilsResult<()> {
        self.write_header(&Header::directory(name, mode, mtime))
    }

    /// Appends a regular file entry with the given contents.
    pub fn write_file(
        &mut self,
        name: &str,
        mode: u32,
        mtime: u32,
        contents: &[u8],
    ) -> CtlutilsResult<()> {
        let size = u32::try_from(contents.len()).map_err(|_| CtlutilsError::PayloadOverflow {
            name: name.to_string(),
            available: u64::from(u32::MAX),
        })?;

        self.write_header(&Header::file(name, mode, mtime, size))?;
        self.write_all(contents)?;
        Ok(())
    }

    /// Total bytes written to the underlying sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Writes the trailer entry, flushes, and returns the underlying sink.
    pub fn finish(mut self) -> CtlutilsResult<W> {
        self.write_header(&Header::trailer())?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn pad(&mut self) -> io::Result<()> {
        let unaligned = self.written % ALIGNMENT;
        if unaligned != 0 {
            let fill = (ALIGNMENT - unaligned) as usize;
            self.emit(&PADDING[..fill])?;
        }
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<W: Write> Write for Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining {
            return Err(CtlutilsError::PayloadOverflow {
                name: self.current.clone(),
                available: self.remaining,
            }
            .into());
        }

        let written = self.inner.write(buf)?;
        self.written += written as u64;
        self.remaining -= written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
