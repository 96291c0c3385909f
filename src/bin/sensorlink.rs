use clap::{Parser, ValueEnum};
use sensorlink::{
    dispatch,
    output::{csv::CsvLogger, Format, Sink, Tee, WriterSink},
    FramedListener, IoSource, Receiver, Registry,
};
use std::{path::PathBuf, time::Duration};
use tokio_serial::SerialPortBuilderExt;

/// Baud rate the sensor controller firmware sends with.
const BAUD_RATE: u32 = 115_200;

#[derive(Parser)]
#[command(author, version, about, long_about=None)]
struct Cli {
    /// Serial device to read from
    device: String,

    /// Baud rate of the serial link
    #[arg(long, default_value_t=BAUD_RATE)]
    baud: u32,

    /// Read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Output protocol
    #[arg(long, value_enum, default_value_t=OutEnum::Stringify)]
    output: OutEnum,

    /// Append readings to this CSV file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Buffer partial frames across reads instead of resynchronizing
    #[arg(long)]
    buffered: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutEnum {
    /// Stringify
    Stringify,
    /// InfluxDB Line Protocol
    Influxdb,
}

impl From<OutEnum> for Format {
    fn from(output: OutEnum) -> Self {
        match output {
            OutEnum::Stringify => Format::Stringify,
            OutEnum::Influxdb => Format::Influxdb,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut sink = make_sink(cli.output, cli.log_file.as_ref())?;

    if cli.buffered {
        read_buffered(&cli, &mut sink).await
    } else {
        let Cli {
            device,
            baud,
            timeout_ms,
            ..
        } = cli;
        tokio::task::spawn_blocking(move || read_stream(device, baud, timeout_ms, &mut sink))
            .await?
    }
}

fn make_sink(output: OutEnum, log_file: Option<&PathBuf>) -> anyhow::Result<Tee<'static>> {
    let mut sink = Tee::new().with(WriterSink::new(std::io::stdout(), output.into()));
    if let Some(path) = log_file {
        sink = sink.with(CsvLogger::open(path)?);
    }
    Ok(sink)
}

/// Blocking decoder pulling the port one field at a time.
fn read_stream(
    device: String,
    baud: u32,
    timeout_ms: u64,
    sink: &mut impl Sink,
) -> anyhow::Result<()> {
    let port = serialport::new(&device, baud)
        .timeout(Duration::from_millis(timeout_ms))
        .open()?;
    log::info!("Reading from {} at {} baud", device, baud);

    let registry = Registry::builtin();
    Receiver::new(IoSource::new(port), &registry).run(sink)
}

/// Async listener buffering partial frames until they are complete.
async fn read_buffered(cli: &Cli, sink: &mut impl Sink) -> anyhow::Result<()> {
    let mut port = tokio_serial::new(&cli.device, cli.baud).open_native_async()?;

    #[cfg(unix)]
    port.set_exclusive(false)?;

    log::info!("Reading from {} at {} baud (buffered)", cli.device, cli.baud);

    let registry = Registry::builtin();
    let mut reader = FramedListener::new(port);

    loop {
        let res = tokio::select! {
            res = reader.read_event_async() => res,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        match res {
            Ok(Some(event)) => {
                if let Some(event) = dispatch(&registry, event) {
                    sink.emit(&event)?;
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                sink.emit(&sensorlink::Event::StreamError {
                    details: e.to_string(),
                })?;
                return Err(e);
            }
        }
    }
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
