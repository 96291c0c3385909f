//! IO devices to read frames from.
use crate::error::FrameCheckError;
use crate::protocol::{check, FrameEvent};
use bytes::BytesMut;

/// Listener on IO device
///
/// Buffers everything read from the device and only parses complete frames, so frames may
/// arrive in arbitrarily small pieces.
pub struct FramedListener<P> {
    port: P,
    buffer: BytesMut,
}

impl<P> FramedListener<P> {
    pub fn new(port: P) -> FramedListener<P> {
        FramedListener {
            port,
            // Allocate buffer with 256 bytes
            buffer: BytesMut::with_capacity(256),
        }
    }

    fn parse(&mut self) -> Option<FrameEvent> {
        match check(&mut self.buffer) {
            Ok(event) => Some(event),
            Err(FrameCheckError::Incomplete) => None,
        }
    }

    /// Called once the device has no more data.
    fn finish(&self) -> anyhow::Result<Option<FrameEvent>> {
        // stream closed. If buffer empty, normal close.
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Err(error::DeviceError::ConnectionLost)?
        }
    }
}

/// Blocking devices such as serial ports opened with a timeout.
pub mod serial {
    use super::FramedListener;
    use crate::protocol::FrameEvent;
    use std::io::{ErrorKind, Read};

    impl<P: Read> FramedListener<P> {
        /// Reads until a frame is complete. `Ok(None)` means the device closed cleanly.
        pub fn read_event(&mut self) -> anyhow::Result<Option<FrameEvent>> {
            let mut stack_buf = [0u8; 256];
            loop {
                if let Some(event) = self.parse() {
                    return Ok(Some(event));
                }

                match self.port.read(&mut stack_buf) {
                    Ok(0) => return self.finish(),
                    Ok(n) => self.buffer.extend_from_slice(&stack_buf[0..n]),
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => (),
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
                    Err(e) => return Err(e)?,
                }
            }
        }
    }
}

/// Async devices such as `tokio_serial::SerialStream`.
pub mod stream {
    use super::FramedListener;
    use crate::protocol::FrameEvent;
    use tokio::io::{AsyncRead, AsyncReadExt};

    impl<P: AsyncRead + Unpin> FramedListener<P> {
        /// Reads until a frame is complete. `Ok(None)` means the device closed cleanly.
        pub async fn read_event_async(&mut self) -> anyhow::Result<Option<FrameEvent>> {
            loop {
                if let Some(event) = self.parse() {
                    return Ok(Some(event));
                }

                if 0 == AsyncReadExt::read_buf(&mut self.port, &mut self.buffer).await? {
                    return self.finish();
                }
            }
        }
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    pub enum DeviceError {
        #[error("Connection lost to device")]
        ConnectionLost,
    }
}
