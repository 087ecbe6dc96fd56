use std::io::{self, Read};

use super::header::{Header, ALIGNMENT, HEADER_LEN, MAX_NAME_SIZE};
use crate::{CtlutilsError, CtlutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A streaming reader over a "new ASCII" cpio archive.
///
/// [`Reader::next`] positions the reader at the next entry, and the [`Read`] implementation
/// then yields exactly the payload declared by that entry's header. Unread payload and
/// alignment padding are skipped transparently by the following call to `next`.
pub struct Reader<R> {
    /// The underlying byte source.
    inner: R,

    /// Payload bytes of the current entry not yet handed out.
    remaining: u64,

    /// Bytes consumed since the last 4-byte boundary.
    unalignment: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R: Read> Reader<R> {
    /// Creates a reader positioned at the start of an archive.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            unalignment: 0,
        }
    }

    /// Advances to the next entry and returns its header.
    ///
    /// The end of the archive is an entry named [`super::TRAILER_NAME`]; callers detect it with
    /// [`Header::is_trailer`].
    pub fn next(&mut self) -> CtlutilsResult<Header> {
        if self.remaining > 0 {
            self.skip(self.remaining)?;
            self.remaining = 0;
        }
        self.skip_padding()?;

        let header = self.read_header()?;
        self.remaining = u64::from(header.size);
        self.skip_padding()?;

        Ok(header)
    }

    /// Payload bytes of the current entry that have not been read yet.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Consumes the reader, returning the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_header(&mut self) -> CtlutilsResult<Header> {
        let mut raw = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut raw)?;

        let (mut header, name_size) = Header::decode(&raw)?;
        if name_size == 0 || name_size > MAX_NAME_SIZE {
            return Err(CtlutilsError::HeaderField {
                field: "namesize",
                value: format!("{name_size:08x}"),
            });
        }

        let mut name = vec![0u8; name_size];
        self.inner.read_exact(&mut name)?;
        self.consumed((HEADER_LEN + name_size) as u64);

        // The last byte of the name field is dropped whatever it holds; producers are expected
        // to count the terminating NUL in the declared name size.
        name.truncate(name_size - 1);
        header.name = String::from_utf8(name).map_err(|e| CtlutilsError::HeaderField {
            field: "name",
            value: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })?;

        Ok(header)
    }

    fn skip_padding(&mut self) -> CtlutilsResult<()> {
        if self.unalignment != 0 {
            self.skip(ALIGNMENT - self.unalignment)?;
        }
        Ok(())
    }

    fn skip(&mut self, count: u64) -> CtlutilsResult<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(count), &mut io::sink())?;
        if skipped < count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside an entry",
            )
            .into());
        }

        self.consumed(count);
        Ok(())
    }

    fn consumed(&mut self, count: u64) {
        self.unalignment = (self.unalignment + count) % ALIGNMENT;
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let limit = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let read = self.inner.read(&mut buf[..limit])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside an entry payload",
            ));
        }

        self.remaining -= read as u64;
        self.consumed(read as u64);
        Ok(read)
    }
}
