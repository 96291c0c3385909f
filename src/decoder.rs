//! Frame decoder reading straight from a [`ByteSource`].
//!
//! The decoder scans for the start marker one byte at a time, then reads header, payload and
//! checksum with one source read per field. A field that comes back short abandons the frame.
//! Bytes consumed by an abandoned or rejected frame are scanned again for the next start
//! marker, so a corrupted length byte or a stray marker in line noise cannot swallow the frame
//! that follows it.
use bytes::{Buf, Bytes, BytesMut};

use crate::error::StreamError;
use crate::protocol::{checksum, Frame, FrameEvent, Stage, HEADER_LEN, START_MARKER};
use crate::source::ByteSource;

pub struct FrameDecoder<S> {
    source: S,
    /// Bytes already taken from the source that still have to be scanned.
    pending: BytesMut,
    /// Bytes read for the frame attempt in progress, start marker excluded.
    attempt: BytesMut,
    /// Source failure held back until the buffered bytes are scanned.
    deferred: Option<StreamError>,
}

impl<S: ByteSource> FrameDecoder<S> {
    pub fn new(source: S) -> FrameDecoder<S> {
        FrameDecoder {
            source,
            pending: BytesMut::with_capacity(256),
            attempt: BytesMut::with_capacity(256),
            deferred: None,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Runs the decoder until the next frame outcome.
    ///
    /// Returns `Ok(None)` when the source had no data while looking for a start marker. The
    /// decoder then holds no partial frame and the caller may stop or call again.
    pub fn poll_event(&mut self) -> Result<Option<FrameEvent>, StreamError> {
        if !self.seek_start()? {
            return Ok(None);
        }

        match self.read_frame() {
            Ok(event @ FrameEvent::Frame(_)) => {
                self.attempt.clear();
                Ok(Some(event))
            }
            Ok(event) => {
                self.rewind();
                Ok(Some(event))
            }
            Err(e) => {
                self.rewind();
                Err(e)
            }
        }
    }

    /// Blocks until the next frame outcome or a stream error.
    pub fn next_event(&mut self) -> Result<FrameEvent, StreamError> {
        loop {
            if let Some(event) = self.poll_event()? {
                return Ok(event);
            }
        }
    }

    /// Discards bytes until a start marker. Returns false on an empty read.
    fn seek_start(&mut self) -> Result<bool, StreamError> {
        let mut skipped = 0usize;
        loop {
            let byte = if self.pending.has_remaining() {
                self.pending.get_u8()
            } else {
                if let Some(err) = self.deferred.take() {
                    return Err(err);
                }
                let chunk = self.source.read(1)?;
                match chunk.split_first() {
                    Some((&byte, rest)) => {
                        self.pending.extend_from_slice(rest);
                        byte
                    }
                    None => {
                        if skipped > 0 {
                            log::trace!("Discarded {} bytes while seeking start marker", skipped);
                        }
                        return Ok(false);
                    }
                }
            };

            if byte == START_MARKER {
                if skipped > 0 {
                    log::trace!("Discarded {} bytes before start marker", skipped);
                }
                return Ok(true);
            }
            skipped += 1;
        }
    }

    fn read_frame(&mut self) -> Result<FrameEvent, StreamError> {
        let header = self.take(HEADER_LEN)?;
        if header.len() < HEADER_LEN {
            return Ok(short_read(Stage::Header, HEADER_LEN, header.len()));
        }
        let (sensor_type, data_len) = (header[0], header[1] as usize);

        let payload = self.take(data_len)?;
        if payload.len() < data_len {
            return Ok(short_read(Stage::Payload, data_len, payload.len()));
        }

        let received = match self.take(1)?.first() {
            Some(&byte) => byte,
            None => return Ok(short_read(Stage::Checksum, 1, 0)),
        };

        let calculated = checksum(sensor_type, &payload);
        if calculated == received {
            Ok(FrameEvent::Frame(Frame::validated(sensor_type, payload, received)))
        } else {
            Ok(FrameEvent::ChecksumMismatch {
                sensor_type,
                received,
                calculated,
            })
        }
    }

    /// Reads up to `n` bytes for the current field with at most one call to the source.
    ///
    /// A source failure while bytes of the attempt are still unscanned ends the field short.
    /// The failure is raised once scanning runs out of buffered bytes.
    fn take(&mut self, n: usize) -> Result<Bytes, StreamError> {
        let mut field = self.pending.split_to(n.min(self.pending.len()));
        if field.len() < n {
            let mut chunk = if self.deferred.is_some() {
                Bytes::new()
            } else {
                match self.source.read(n - field.len()) {
                    Ok(chunk) => chunk,
                    Err(err) if !self.attempt.is_empty() || !field.is_empty() => {
                        log::debug!(
                            "Deferring stream error until buffered bytes are scanned: {}",
                            err
                        );
                        self.deferred = Some(err);
                        Bytes::new()
                    }
                    Err(err) => return Err(err),
                }
            };
            let wanted = (n - field.len()).min(chunk.len());
            field.extend_from_slice(&chunk.split_to(wanted));
            self.pending.extend_from_slice(&chunk);
        }
        self.attempt.extend_from_slice(&field);
        Ok(field.freeze())
    }

    /// Puts the bytes of a failed frame attempt back in front of the unscanned input.
    fn rewind(&mut self) {
        if self.attempt.is_empty() {
            return;
        }
        let mut rescan = std::mem::take(&mut self.attempt);
        rescan.extend_from_slice(&self.pending);
        self.pending = rescan;
    }
}

fn short_read(stage: Stage, expected: usize, actual: usize) -> FrameEvent {
    FrameEvent::ShortRead {
        stage,
        expected,
        actual,
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::FrameDecoder;
    use crate::error::StreamError;
    use crate::protocol::{checksum, Frame, FrameEvent, Stage, START_MARKER};
    use crate::source::ChunkedSource;
    use proptest::prelude::*;

    /// True if a checksum-valid frame starts at any start marker in `stream[..end]`.
    pub(crate) fn valid_frame_starts_before(stream: &[u8], end: usize) -> bool {
        (0..end.min(stream.len()))
            .filter(|&i| stream[i] == START_MARKER)
            .any(|i| {
                let candidate = &stream[i..];
                if candidate.len() < 4 {
                    return false;
                }
                let len = candidate[2] as usize;
                candidate.len() >= 4 + len
                    && checksum(candidate[1], &candidate[3..3 + len]) == candidate[3 + len]
            })
    }

    fn decode_all(stream: Vec<u8>) -> Vec<FrameEvent> {
        let mut decoder = FrameDecoder::new(ChunkedSource::new(stream));
        let mut events = vec![];
        loop {
            match decoder.next_event() {
                Ok(event) => events.push(event),
                Err(StreamError::Closed) => return events,
                Err(e) => panic!("unexpected stream error: {e}"),
            }
        }
    }

    fn frames(events: &[FrameEvent]) -> Vec<Frame> {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Frame(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decodes_frame_after_noise() {
        let mut stream = vec![0x00, 0x13, 0xFF];
        stream.extend_from_slice(&Frame::new(0x02, vec![0xD2, 0x00]).unwrap().encode());

        assert_eq!(
            decode_all(stream),
            vec![FrameEvent::Frame(Frame::new(0x02, vec![0xD2, 0x00]).unwrap())]
        );
    }

    #[test]
    fn test_reports_checksum_mismatch_and_continues() {
        let mut stream = vec![0xAA, 0x02, 0x02, 0xD2, 0x00, 0x11];
        stream.extend_from_slice(&Frame::new(0x01, vec![0; 4]).unwrap().encode());

        let events = decode_all(stream);
        assert_eq!(
            events[0],
            FrameEvent::ChecksumMismatch {
                sensor_type: 0x02,
                received: 0x11,
                calculated: 0x78
            }
        );
        assert_eq!(frames(&events), vec![Frame::new(0x01, vec![0; 4]).unwrap()]);
    }

    #[test]
    fn test_truncated_stream_ends_without_hanging() {
        let stream = vec![0xAA, 0x01, 200, 1, 2, 3, 4, 5];
        let mut decoder = FrameDecoder::new(ChunkedSource::new(stream));

        assert_eq!(
            decoder.next_event().unwrap(),
            FrameEvent::ShortRead {
                stage: Stage::Payload,
                expected: 200,
                actual: 5
            }
        );
        assert!(matches!(decoder.next_event(), Err(StreamError::Closed)));
    }

    #[test]
    fn test_empty_reads_return_control_at_seek_start() {
        let frame = Frame::new(0x02, vec![0xD2, 0x00]).unwrap();
        let mut decoder =
            FrameDecoder::new(ChunkedSource::from_chunks([vec![], frame.encode().to_vec()]));

        assert_eq!(decoder.poll_event().unwrap(), None);
        assert_eq!(decoder.poll_event().unwrap(), Some(FrameEvent::Frame(frame)));
        assert!(decoder.get_ref().is_exhausted());
    }

    #[test]
    fn test_frame_split_across_reads_is_abandoned() {
        let encoded = Frame::new(0x02, vec![0xD2, 0x00]).unwrap().encode();
        let mut decoder = FrameDecoder::new(ChunkedSource::from_chunks([
            encoded[..4].to_vec(),
            encoded[4..].to_vec(),
        ]));

        assert_eq!(
            decoder.next_event().unwrap(),
            FrameEvent::ShortRead {
                stage: Stage::Payload,
                expected: 2,
                actual: 1
            }
        );
        assert!(matches!(decoder.next_event(), Err(StreamError::Closed)));
    }

    #[test]
    fn test_zero_length_payload() {
        let frame = Frame::new(0x07, vec![]).unwrap();
        assert_eq!(&frame.encode()[..], &[0xAA, 0x07, 0x00, 0xAD]);
        assert_eq!(
            decode_all(frame.encode().to_vec()),
            vec![FrameEvent::Frame(frame)]
        );
    }

    #[test]
    fn test_corrupted_length_does_not_swallow_next_frame() {
        let next = Frame::new(0x01, vec![0x00, 0x00, 0xBC, 0x41]).unwrap();
        let mut stream = vec![0xAA, 0x02, 0x40, 0xD2, 0x00, 0x78];
        stream.extend_from_slice(&next.encode());

        let events = decode_all(stream);
        assert_eq!(frames(&events), vec![next]);
    }

    #[test]
    fn test_end_of_stream_during_rescan_keeps_buffered_frame() {
        // A marker inside the rejected frame declares 0xA9 bytes, more than the stream holds.
        let next = Frame::new(0x01, vec![]).unwrap();
        let mut stream = vec![0xAA, 0x00, 0x43, 0xAA, 0xAA, 0x00, 0xA9];
        stream.extend_from_slice(&next.encode());

        let events = decode_all(stream);
        assert!(matches!(
            events[0],
            FrameEvent::ShortRead {
                stage: Stage::Payload,
                ..
            }
        ));
        assert_eq!(frames(&events), vec![next]);
    }

    #[test]
    fn test_stream_error_raised_after_buffered_bytes() {
        let mut decoder = FrameDecoder::new(ChunkedSource::new(vec![0xAA, 0x00, 0xAA, 0x05, 0x01]));

        assert_eq!(
            decoder.next_event().unwrap(),
            FrameEvent::ShortRead {
                stage: Stage::Payload,
                expected: 0xAA,
                actual: 2
            }
        );
        assert_eq!(
            decoder.next_event().unwrap(),
            FrameEvent::ShortRead {
                stage: Stage::Payload,
                expected: 1,
                actual: 0
            }
        );
        assert!(matches!(decoder.next_event(), Err(StreamError::Closed)));
    }

    proptest! {
        #[test]
        fn prop_round_trip(sensor_type in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 0..=255)) {
            let frame = Frame::new(sensor_type, payload.clone()).unwrap();
            let events = decode_all(frame.encode().to_vec());
            prop_assert_eq!(events.len(), 1);
            match &events[0] {
                FrameEvent::Frame(decoded) => {
                    prop_assert_eq!(decoded.sensor_type(), sensor_type);
                    prop_assert_eq!(decoded.payload(), &payload[..]);
                }
                other => prop_assert!(false, "unexpected event {:?}", other),
            }
        }

        #[test]
        fn prop_single_bit_flip_is_detected_and_resynchronized(
            sensor_type in any::<u8>(),
            payload in prop::collection::vec(any::<u8>(), 0..32),
            next_payload in prop::collection::vec(any::<u8>(), 0..32),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let corrupted = Frame::new(sensor_type, payload).unwrap().encode();
            let next = Frame::new(0x01, next_payload).unwrap();

            // Any byte but the start marker.
            let flipped = 1 + position.index(corrupted.len() - 1);
            let mut stream = corrupted.to_vec();
            stream[flipped] ^= 1 << bit;
            let next_start = stream.len();
            stream.extend_from_slice(&next.encode());

            prop_assume!(!valid_frame_starts_before(&stream, next_start));

            let events = decode_all(stream);
            let detected = if flipped == 2 {
                // A wrong length may run the frame past the end of the stream.
                matches!(
                    events[0],
                    FrameEvent::ChecksumMismatch { .. } | FrameEvent::ShortRead { .. }
                )
            } else {
                matches!(events[0], FrameEvent::ChecksumMismatch { .. })
            };
            prop_assert!(detected, "first event {:?}", events[0]);
            prop_assert_eq!(frames(&events), vec![next]);
        }
    }
}
