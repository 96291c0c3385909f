//! Byte sources the frame decoder pulls from.
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use self::error::StreamError;

/// Supplier of raw bytes.
///
/// A read returns at most `max_bytes` bytes. Fewer bytes, including none at all, are a valid
/// answer and mean that nothing more arrived within the source's own wait time. The end of the
/// stream and transport failures are reported as [`StreamError`].
pub trait ByteSource {
    fn read(&mut self, max_bytes: usize) -> Result<Bytes, StreamError>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, max_bytes: usize) -> Result<Bytes, StreamError> {
        (**self).read(max_bytes)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, max_bytes: usize) -> Result<Bytes, StreamError> {
        (**self).read(max_bytes)
    }
}

/// Adapter for blocking readers such as serial ports opened with a timeout.
///
/// A read keeps pulling from the reader until `max_bytes` arrived, the reader times out or the
/// reader hits its end. A timeout returns whatever was collected so far.
pub struct IoSource<R> {
    reader: R,
}

impl<R: Read> IoSource<R> {
    pub fn new(reader: R) -> IoSource<R> {
        IoSource { reader }
    }
}

impl<R: Read> ByteSource for IoSource<R> {
    fn read(&mut self, max_bytes: usize) -> Result<Bytes, StreamError> {
        let mut buf = BytesMut::zeroed(max_bytes);
        let mut filled = 0;
        while filled < max_bytes {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(StreamError::Closed),
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }
}

/// In-memory source replaying a list of chunks.
///
/// Each chunk stands for what the transport delivered within one wait period. A read never
/// crosses a chunk boundary, and an empty chunk yields one empty read. After the last chunk the
/// source reports [`StreamError::Closed`].
#[derive(Debug, Default)]
pub struct ChunkedSource {
    chunks: VecDeque<Bytes>,
}

impl ChunkedSource {
    pub fn new(data: impl Into<Bytes>) -> ChunkedSource {
        ChunkedSource::from_chunks([data.into()])
    }

    pub fn from_chunks<I, B>(chunks: I) -> ChunkedSource
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        ChunkedSource {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ByteSource for ChunkedSource {
    fn read(&mut self, max_bytes: usize) -> Result<Bytes, StreamError> {
        let Some(chunk) = self.chunks.front_mut() else {
            return Err(StreamError::Closed);
        };
        let data = chunk.split_to(max_bytes.min(chunk.len()));
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Ok(data)
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum StreamError {
        #[error("Byte stream closed")]
        Closed,
        #[error("Reading from byte stream failed: {0}")]
        Io(#[from] std::io::Error),
    }
}
