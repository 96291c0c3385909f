extern crate anyhow;

// Rexport main API
pub use codec::{DisplayValue, Reading, Registry, SensorTypeDescriptor, Unit};
pub use decoder::FrameDecoder;
pub use device::FramedListener;
pub use output::Sink;
pub use protocol::{Frame, FrameEvent};
pub use receiver::{dispatch, Event, Receiver};
pub use source::{ByteSource, ChunkedSource, IoSource};

pub mod codec;
pub mod decoder;
pub mod device;
pub mod output;
pub mod protocol;
pub mod receiver;
pub mod source;

/// Rexports all error types
pub mod error {
    pub use crate::codec::error::*;
    pub use crate::device::error::*;
    pub use crate::protocol::error::*;
    pub use crate::source::error::*;
}
