//! Turns frame outcomes into sensor events.
use std::fmt::{self, Display};

use crate::codec::{Reading, Registry};
use crate::decoder::FrameDecoder;
use crate::error::{CodecError, StreamError};
use crate::output::Sink;
use crate::protocol::FrameEvent;
use crate::source::ByteSource;

/// Outcome reported for every frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ValidReading(Reading),
    ChecksumMismatch {
        received: u8,
        calculated: u8,
    },
    UnknownSensorType {
        sensor_type: u8,
    },
    MalformedPayload {
        sensor_type: u8,
        expected_width: u8,
        actual_width: usize,
    },
    /// Terminal. Nothing follows.
    StreamError {
        details: String,
    },
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ValidReading(reading) => write!(f, "{}", reading),
            Event::ChecksumMismatch {
                received,
                calculated,
            } => write!(
                f,
                "Checksum mismatch: received 0x{:02X}, calculated 0x{:02X}",
                received, calculated
            ),
            Event::UnknownSensorType { sensor_type } => {
                write!(f, "Unknown sensor type 0x{:02X}", sensor_type)
            }
            Event::MalformedPayload {
                sensor_type,
                expected_width,
                actual_width,
            } => write!(
                f,
                "Malformed payload for sensor type 0x{:02X}: expected {} bytes, got {}",
                sensor_type, expected_width, actual_width
            ),
            Event::StreamError { details } => write!(f, "Stream error: {}", details),
        }
    }
}

impl From<CodecError> for Event {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownSensorType(sensor_type) => Event::UnknownSensorType { sensor_type },
            CodecError::MalformedPayload {
                sensor_type,
                expected_width,
                actual_width,
            } => Event::MalformedPayload {
                sensor_type,
                expected_width,
                actual_width,
            },
        }
    }
}

/// Interprets a frame outcome. Short reads produce no event.
pub fn dispatch(registry: &Registry, event: FrameEvent) -> Option<Event> {
    match event {
        FrameEvent::Frame(frame) => {
            let (sensor_type, payload) = frame.into_parts();
            match registry.decode(sensor_type, &payload) {
                Ok(reading) => {
                    log::trace!("{}", reading);
                    Some(Event::ValidReading(reading))
                }
                Err(err) => {
                    log::warn!("{}", err);
                    Some(err.into())
                }
            }
        }
        FrameEvent::ChecksumMismatch {
            sensor_type,
            received,
            calculated,
        } => {
            log::warn!(
                "Checksum mismatch for sensor type 0x{:02X}: received 0x{:02X}, calculated 0x{:02X}",
                sensor_type,
                received,
                calculated
            );
            Some(Event::ChecksumMismatch {
                received,
                calculated,
            })
        }
        FrameEvent::ShortRead {
            stage,
            expected,
            actual,
        } => {
            log::debug!(
                "Abandoned frame in {:?}: expected {} bytes, got {}",
                stage,
                expected,
                actual
            );
            None
        }
    }
}

/// Decoding session over one byte source.
pub struct Receiver<'r, S> {
    decoder: FrameDecoder<S>,
    registry: &'r Registry,
}

impl<'r, S: ByteSource> Receiver<'r, S> {
    pub fn new(source: S, registry: &'r Registry) -> Receiver<'r, S> {
        Receiver {
            decoder: FrameDecoder::new(source),
            registry,
        }
    }

    /// Returns `Ok(None)` when no complete frame outcome was available.
    pub fn poll_event(&mut self) -> Result<Option<Event>, StreamError> {
        Ok(self
            .decoder
            .poll_event()?
            .and_then(|event| dispatch(self.registry, event)))
    }

    pub fn next_event(&mut self) -> Result<Event, StreamError> {
        loop {
            if let Some(event) = self.poll_event()? {
                return Ok(event);
            }
        }
    }

    /// Forwards events to `sink` until the stream fails.
    ///
    /// The failure is passed on as final [`Event::StreamError`] and returned.
    pub fn run(&mut self, sink: &mut impl Sink) -> anyhow::Result<()> {
        loop {
            match self.next_event() {
                Ok(event) => sink.emit(&event)?,
                Err(err) => {
                    sink.emit(&Event::StreamError {
                        details: err.to_string(),
                    })?;
                    return Err(err.into());
                }
            }
        }
    }
}
