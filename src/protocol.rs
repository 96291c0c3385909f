//! Wire format of the sensor link.
//!
//! Every frame is laid out as
//!
//! ```text
//! 0xAA | sensor_type | data_len | payload (data_len bytes) | checksum
//! ```
//!
//! where the checksum is the XOR of the start marker, both header bytes and all payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use self::error::{FrameCheckError, FrameError};

/// Byte starting every frame.
pub const START_MARKER: u8 = 0xAA;

/// Sensor type and payload length.
pub const HEADER_LEN: usize = 2;

/// Smallest possible frame: marker, header and checksum without payload.
pub const MIN_FRAME_LEN: usize = 1 + HEADER_LEN + 1;

/// Computes the checksum of a frame carrying `payload` for `sensor_type`.
///
/// The length byte is taken from `payload`, so payloads must not exceed 255 bytes.
pub fn checksum(sensor_type: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(START_MARKER ^ sensor_type ^ payload.len() as u8, |acc, b| acc ^ b)
}

/// Validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    sensor_type: u8,
    payload: Bytes,
    checksum: u8,
}

impl Frame {
    /// Builds a frame for sending, computing its checksum.
    pub fn new(sensor_type: u8, payload: impl Into<Bytes>) -> Result<Frame, FrameError> {
        let payload = payload.into();
        if payload.len() > u8::MAX as usize {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }
        Ok(Frame {
            sensor_type,
            checksum: checksum(sensor_type, &payload),
            payload,
        })
    }

    /// Frame whose checksum has already been verified against the received one.
    pub(crate) fn validated(sensor_type: u8, payload: Bytes, checksum: u8) -> Frame {
        Frame {
            sensor_type,
            payload,
            checksum,
        }
    }

    pub fn sensor_type(&self) -> u8 {
        self.sensor_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn into_parts(self) -> (u8, Bytes) {
        (self.sensor_type, self.payload)
    }

    /// Serializes the frame as it goes over the wire.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + self.payload.len());
        buf.put_u8(START_MARKER);
        buf.put_u8(self.sensor_type);
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        buf.put_u8(self.checksum);
        buf.freeze()
    }
}

/// Field a frame attempt ran out of data in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    Payload,
    Checksum,
}

/// Outcome of one attempt to read a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Checksum matched.
    Frame(Frame),
    /// Frame was complete but its checksum did not match.
    ChecksumMismatch {
        sensor_type: u8,
        received: u8,
        calculated: u8,
    },
    /// Source returned fewer bytes than the current field needs. The frame was abandoned.
    ShortRead {
        stage: Stage,
        expected: usize,
        actual: usize,
    },
}

/// Check if a full frame is available in the buffer and returns it if possible.
///
/// The input buffer is advanced until it starts with a start marker. If a complete frame is in
/// the buffer, it is removed from the buffer and returned as validated frame. A complete frame
/// with a wrong checksum is reported as checksum mismatch and only its start marker is removed,
/// so the next call scans the rejected bytes again. If no complete frame is found,
/// `FrameCheckError::Incomplete` is returned and the buffered bytes are kept for the next call.
pub fn check(buffer: &mut BytesMut) -> Result<FrameEvent, FrameCheckError> {
    match buffer.iter().position(|&b| b == START_MARKER) {
        Some(start) => {
            if start > 0 {
                log::trace!("Skipping {} bytes before start marker", start);
            }
            buffer.advance(start)
        }
        None => {
            buffer.clear();
            return Err(FrameCheckError::Incomplete);
        }
    }

    if buffer.remaining() < 1 + HEADER_LEN {
        return Err(FrameCheckError::Incomplete);
    }
    let data_len = buffer[2] as usize;
    if buffer.remaining() < MIN_FRAME_LEN + data_len {
        return Err(FrameCheckError::Incomplete);
    }

    let sensor_type = buffer[1];
    let received = buffer[1 + HEADER_LEN + data_len];
    let calculated = checksum(sensor_type, &buffer[1 + HEADER_LEN..1 + HEADER_LEN + data_len]);
    if calculated != received {
        // Only the marker is dropped, a frame may start inside the rejected one.
        buffer.advance(1);
        return Ok(FrameEvent::ChecksumMismatch {
            sensor_type,
            received,
            calculated,
        });
    }

    let mut frame_data = buffer.split_to(MIN_FRAME_LEN + data_len);
    frame_data.advance(1 + HEADER_LEN);
    let payload = frame_data.split_to(data_len).freeze();
    Ok(FrameEvent::Frame(Frame::validated(sensor_type, payload, received)))
}

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    pub enum FrameCheckError {
        #[error("No complete frame in buffer")]
        Incomplete,
    }

    #[derive(Error, Debug, PartialEq)]
    pub enum FrameError {
        #[error("Payload of {0} bytes does not fit into a frame")]
        PayloadTooLong(usize),
    }
}

#[cfg(test)]
mod test {
    use super::{check, checksum, Frame, FrameCheckError, FrameError, FrameEvent};
    use bytes::BytesMut;

    #[test]
    fn test_checksum_covers_marker_header_and_payload() {
        assert_eq!(checksum(0x00, &[]), 0xAA);
        assert_eq!(checksum(0x02, &[0xD2, 0x00]), 0xAA ^ 0x02 ^ 0x02 ^ 0xD2);
    }

    #[test]
    fn test_frame_encoding() {
        let frame = Frame::new(0x02, vec![0xD2, 0x00]).unwrap();
        assert_eq!(frame.checksum(), 0x78);
        assert_eq!(&frame.encode()[..], &[0xAA, 0x02, 0x02, 0xD2, 0x00, 0x78]);
    }

    #[test]
    fn test_frame_rejects_oversized_payload() {
        assert_eq!(
            Frame::new(0x01, vec![0u8; 256]),
            Err(FrameError::PayloadTooLong(256))
        );
    }

    #[test]
    fn test_frame_check_detects_incomplete_frame() {
        assert_eq!(
            check(&mut BytesMut::from(&[0xAA, 0x01, 0x04, 0x00, 0x00][..])),
            Err(FrameCheckError::Incomplete)
        );
    }

    #[test]
    fn test_frame_check_keeps_partial_frame_and_drops_noise() {
        let mut buf = BytesMut::from(&[0x13, 0x37, 0xAA, 0x02][..]);
        assert_eq!(check(&mut buf), Err(FrameCheckError::Incomplete));
        assert_eq!(buf, &[0xAA, 0x02][..]);

        let mut buf = BytesMut::from(&[0x13, 0x37, 0x00][..]);
        assert_eq!(check(&mut buf), Err(FrameCheckError::Incomplete));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_check_extracts_frame() {
        let mut buf = BytesMut::from(&[0x45, 0x02][..]);
        buf.extend_from_slice(&Frame::new(0x02, vec![0xD2, 0x00]).unwrap().encode());
        buf.extend_from_slice(&Frame::new(0x01, vec![1, 2, 3, 4]).unwrap().encode());

        assert_eq!(
            check(&mut buf),
            Ok(FrameEvent::Frame(Frame::new(0x02, vec![0xD2, 0x00]).unwrap()))
        );
        assert_eq!(buf, &Frame::new(0x01, vec![1, 2, 3, 4]).unwrap().encode()[..]);
    }

    #[test]
    fn test_frame_check_reports_checksum_mismatch() {
        let mut buf = BytesMut::from(&[0xAA, 0x02, 0x02, 0xD2, 0x00, 0x00, 0xAA][..]);
        assert_eq!(
            check(&mut buf),
            Ok(FrameEvent::ChecksumMismatch {
                sensor_type: 0x02,
                received: 0x00,
                calculated: 0x78
            })
        );
        assert_eq!(buf, &[0x02, 0x02, 0xD2, 0x00, 0x00, 0xAA][..]);
    }
}
