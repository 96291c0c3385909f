//! Adapter for data output
use std::io::Write;

use crate::receiver::Event;

/// Consumer of decoded events.
pub trait Sink {
    fn emit(&mut self, event: &Event) -> anyhow::Result<()>;
}

impl<F> Sink for F
where
    F: FnMut(&Event) -> anyhow::Result<()>,
{
    fn emit(&mut self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

/// Passes every event to all sinks in order.
#[derive(Default)]
pub struct Tee<'a> {
    sinks: Vec<Box<dyn Sink + Send + 'a>>,
}

impl<'a> Tee<'a> {
    pub fn new() -> Tee<'a> {
        Tee::default()
    }

    pub fn with(mut self, sink: impl Sink + Send + 'a) -> Tee<'a> {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl Sink for Tee<'_> {
    fn emit(&mut self, event: &Event) -> anyhow::Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.emit(event)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One human readable line per event.
    Stringify,
    /// InfluxDB line protocol. Only readings are written.
    Influxdb,
}

/// Writes events line by line.
pub struct WriterSink<W> {
    writer: W,
    format: Format,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W, format: Format) -> WriterSink<W> {
        WriterSink { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn emit(&mut self, event: &Event) -> anyhow::Result<()> {
        use influx::ToLineProtocol;

        match (self.format, event) {
            (Format::Stringify, _) => writeln!(self.writer, "{}", event)?,
            (Format::Influxdb, Event::ValidReading(reading)) => {
                writeln!(self.writer, "{}", reading.to_lineprotocol())?
            }
            (Format::Influxdb, _) => (),
        }
        Ok(())
    }
}

pub mod influx {
    use chrono::{DateTime, Utc};
    use std::fmt;

    use crate::codec::Reading;

    pub trait ToLineProtocol {
        fn to_lineprotocol(&self) -> LineProtocol;
    }

    pub enum LineProtocolValue {
        Float(f64),
        Integer(i64),
        UInteger(u64),
        String(String),
        Boolean(bool),
        Tag(String),
    }

    impl fmt::Display for LineProtocolValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Float(x) => write!(f, "{}", x),
                Self::Integer(x) => write!(f, "{}i", x),
                Self::UInteger(x) => write!(f, "{}u", x),
                Self::String(x) => {
                    write!(f, "\"{}\"", x.replace('\\', "\\\\").replace('"', "\\\""))
                }
                Self::Boolean(x) => write!(f, "{}", x),
                Self::Tag(x) => write!(f, "{}", escape_tag(x)),
            }
        }
    }

    /// Tag values must escape commas, equal signs and spaces.
    fn escape_tag(s: &str) -> String {
        let mut escaped = String::with_capacity(s.len());
        for c in s.chars() {
            if matches!(c, ',' | '=' | ' ') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    impl From<i64> for LineProtocolValue {
        fn from(x: i64) -> Self {
            LineProtocolValue::Integer(x)
        }
    }

    impl From<u64> for LineProtocolValue {
        fn from(x: u64) -> Self {
            LineProtocolValue::UInteger(x)
        }
    }

    impl From<f64> for LineProtocolValue {
        fn from(x: f64) -> Self {
            LineProtocolValue::Float(x)
        }
    }

    impl From<&str> for LineProtocolValue {
        fn from(x: &str) -> Self {
            LineProtocolValue::String(x.into())
        }
    }

    impl From<bool> for LineProtocolValue {
        fn from(x: bool) -> Self {
            LineProtocolValue::Boolean(x)
        }
    }

    struct Item(String, LineProtocolValue);

    impl fmt::Display for Item {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}={}", self.0, self.1)
        }
    }

    pub struct LineProtocol {
        measurement: String,
        tags: Vec<Item>,
        values: Vec<Item>,
        time: Option<DateTime<Utc>>,
    }

    impl LineProtocol {
        pub fn new(measurement: impl Into<String>) -> LineProtocol {
            LineProtocol {
                measurement: measurement.into(),
                tags: vec![],
                values: vec![],
                time: None,
            }
        }

        pub fn add_tag(mut self, name: impl Into<String>, tag: impl fmt::Display) -> LineProtocol {
            self.tags.push(Item(
                name.into(),
                LineProtocolValue::Tag(format!("{}", tag)),
            ));
            self
        }

        pub fn add_value<V>(mut self, name: impl Into<String>, value: V) -> LineProtocol
        where
            V: Into<LineProtocolValue>,
        {
            self.values.push(Item(name.into(), value.into()));
            self
        }

        /// Sets the timestamp, written with nanosecond precision.
        pub fn add_time(mut self, time: Option<DateTime<Utc>>) -> LineProtocol {
            self.time = time;
            self
        }
    }

    impl fmt::Display for LineProtocol {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut tag_string = "".to_string();
            tag_string.extend(self.tags.iter().map(|item| format!(",{}", item)));

            let value_string = self
                .values
                .iter()
                .map(|item| format!("{}", item))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "{}{} {}", self.measurement, tag_string, value_string)?;
            if let Some(nanos) = self.time.and_then(|t| t.timestamp_nanos_opt()) {
                write!(f, " {}", nanos)?;
            }
            Ok(())
        }
    }

    impl ToLineProtocol for Reading {
        fn to_lineprotocol(&self) -> LineProtocol {
            LineProtocol::new("sensor")
                .add_tag("sensorType", self.sensor_type)
                .add_tag("sensorName", &self.sensor_name)
                .add_value("value", self.value.value())
                .add_value("unit", self.unit().symbol())
                .add_time(Some(Utc::now()))
        }
    }

    #[cfg(test)]
    mod test {
        use super::{LineProtocol, ToLineProtocol};
        use crate::codec::{Registry, HUMIDITY};
        use chrono::{TimeZone, Utc};

        #[test]
        fn line_protocol_fmt() {
            let line = LineProtocol::new("measurement1");
            assert_eq!(format!("{}", line), "measurement1 ");

            assert_eq!(
                format!(
                    "{}",
                    LineProtocol::new("measurement1")
                        .add_value("keyI64", 1i64)
                        .add_value("keyU64", 1u64)
                        .add_value("keyStr", "value")
                        .add_value("keyBool", true)
                        .add_value("keyF64", 1.1)
                ),
                "measurement1 keyI64=1i,keyU64=1u,keyStr=\"value\",keyBool=true,keyF64=1.1"
            );

            assert_eq!(
                format!(
                    "{}",
                    LineProtocol::new("measurement1")
                        .add_tag("tag1", "1")
                        .add_tag("tag2", "some thing")
                        .add_time(Utc.timestamp_opt(1, 5).single())
                ),
                "measurement1,tag1=1,tag2=some\\ thing  1000000005"
            );
        }

        #[test]
        fn string_value_escapes_backslash_and_quote() {
            let line = LineProtocol::new("m").add_value("path", "C:\\a\"b");
            assert_eq!(format!("{}", line), r#"m path="C:\\a\"b""#);

            let line = LineProtocol::new("m").add_value("dir", "C:\\");
            assert_eq!(format!("{}", line), r#"m dir="C:\\""#);
        }

        #[test]
        fn reading_correctly_translated_to_lineprotocol() {
            let reading = Registry::builtin().decode(HUMIDITY, &[0xD2, 0x00]).unwrap();
            let line = format!("{}", reading.to_lineprotocol().add_time(None));
            assert_eq!(
                line,
                "sensor,sensorType=2,sensorName=HUMIDITY value=21,unit=\"%\""
            );
        }
    }
}

pub mod csv {
    use chrono::Local;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    use super::Sink;
    use crate::codec::Reading;
    use crate::receiver::Event;

    const HEADER: &str = "timestamp,name,value,unit";

    /// Append-only log of readings.
    pub struct CsvLogger<W> {
        writer: W,
    }

    impl CsvLogger<File> {
        /// Opens `path` for appending. The header is only written to an empty file.
        pub fn open(path: impl AsRef<Path>) -> anyhow::Result<CsvLogger<File>> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_ref())?;
            let fresh = file.metadata()?.len() == 0;
            log::info!("Logging readings to {}", path.as_ref().display());
            CsvLogger::new(file, fresh)
        }
    }

    impl<W: Write> CsvLogger<W> {
        pub fn new(mut writer: W, write_header: bool) -> anyhow::Result<CsvLogger<W>> {
            if write_header {
                writeln!(writer, "{}", HEADER)?;
                writer.flush()?;
            }
            Ok(CsvLogger { writer })
        }

        pub fn log(&mut self, reading: &Reading) -> anyhow::Result<()> {
            writeln!(
                self.writer,
                "{},{},{},{}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                reading.sensor_name,
                reading.value.formatted_value(),
                reading.unit()
            )?;
            // Rows must survive a crash of the receiver.
            self.writer.flush()?;
            Ok(())
        }

        pub fn into_inner(self) -> W {
            self.writer
        }
    }

    impl<W: Write> Sink for CsvLogger<W> {
        fn emit(&mut self, event: &Event) -> anyhow::Result<()> {
            match event {
                Event::ValidReading(reading) => self.log(reading),
                _ => Ok(()),
            }
        }
    }

}

#[cfg(test)]
mod test {
    use super::{Format, Sink, Tee, WriterSink};
    use crate::codec::{Registry, TEMPERATURE};
    use crate::receiver::Event;

    #[test]
    fn stringify_writes_every_event() {
        let reading = Registry::builtin()
            .decode(TEMPERATURE, &23.5f32.to_le_bytes())
            .unwrap();
        let mut sink = WriterSink::new(Vec::new(), Format::Stringify);
        sink.emit(&Event::ValidReading(reading)).unwrap();
        sink.emit(&Event::UnknownSensorType { sensor_type: 0xFF })
            .unwrap();

        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "TEMPERATURE (0x01): 23.50 C\nUnknown sensor type 0xFF\n"
        );
    }

    #[test]
    fn influxdb_skips_non_readings() {
        let mut sink = WriterSink::new(Vec::new(), Format::Influxdb);
        sink.emit(&Event::StreamError {
            details: "gone".into(),
        })
        .unwrap();
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn tee_reaches_all_sinks() {
        let mut first = 0;
        let mut second = 0;
        {
            let mut tee = Tee::new()
                .with(|_: &Event| -> anyhow::Result<()> {
                    first += 1;
                    Ok(())
                })
                .with(|_: &Event| -> anyhow::Result<()> {
                    second += 1;
                    Ok(())
                });
            tee.emit(&Event::UnknownSensorType { sensor_type: 1 })
                .unwrap();
        }
        assert_eq!((first, second), (1, 1));
    }
}
