use clap::Parser;

const NOTES: &str = "\
Notes:
  * Runs as a client or a server.
  * An ip address and port connect to a datalogger running as a server; we poll it.
  * A port alone runs as a server; dataloggers connect to us and push readings.
  * A port must always be given, either here or in the config file.";

/// Inverter Collector - reads telemetry from solar inverter dataloggers
#[derive(Debug, Parser)]
#[clap(author, version, after_help = NOTES)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// Datalogger ip address (or host name) to poll
    #[clap(short = 'i', long = "ip")]
    pub host: Option<String>,

    /// Datalogger port, or the port to listen on
    #[clap(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Datalogger serial number, decimal or 0x hex
    #[clap(short = 's', long = "serial", value_parser = crate::config::parse_serial)]
    pub serial: Option<u32>,

    /// Seconds to wait between polls (default 60)
    #[clap(short = 'd', long = "delay")]
    pub delay: Option<u64>,

    /// File to append readings to (default stdout)
    #[clap(short = 'f', long = "file")]
    pub output_file: Option<String>,

    /// File to append readings to as JSON lines
    #[clap(short = 'j', long = "json")]
    pub datalog_file: Option<String>,

    /// Poll over UDP instead of TCP
    #[clap(short = 'u', long = "udp")]
    pub udp: bool,

    /// Log level (error, warn, info, debug, trace)
    #[clap(short = 'l', long = "loglevel")]
    pub loglevel: Option<String>,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
