use crate::datalogger::transport::TransportKind;
use crate::prelude::*;

use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Datalogger to poll. Without one we listen for dataloggers instead.
    pub host: Option<String>,
    #[serde(default)]
    pub port: u16,

    #[serde(default = "Config::default_transport")]
    pub transport: TransportKind,

    #[serde(default, deserialize_with = "de_serial")]
    pub serial: u32,

    /// Seconds between polls, and before each reconnect attempt.
    #[serde(default = "Config::default_poll_delay")]
    pub poll_delay: u64,

    /// Rendered readings are appended here; stdout if unset.
    pub output_file: Option<String>,

    /// Optional path to append readings to in JSON format
    pub datalog_file: Option<String>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    #[serde(default = "Config::default_enabled")]
    pub inverter_serial: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            transport: Self::default_transport(),
            serial: 0,
            poll_delay: Self::default_poll_delay(),
            output_file: None,
            datalog_file: None,
            loglevel: Self::default_loglevel(),
            inverter_serial: Self::default_enabled(),
        }
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|err| anyhow!("error parsing {}: {}", file, err))?;
        Ok(config)
    }

    /// Config file (if any) first, then command line flags on top.
    pub fn from_options(options: &Options) -> Result<Self> {
        let mut config = match &options.config_file {
            Some(file) => Self::new(file.clone())?,
            None => Self::default(),
        };

        if let Some(host) = &options.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = options.port {
            config.port = port;
        }
        if let Some(serial) = options.serial {
            config.serial = serial;
        }
        if let Some(delay) = options.delay {
            config.poll_delay = delay;
        }
        if let Some(file) = &options.output_file {
            config.output_file = Some(file.clone());
        }
        if let Some(file) = &options.datalog_file {
            config.datalog_file = Some(file.clone());
        }
        if let Some(level) = &options.loglevel {
            config.loglevel = level.clone();
        }
        if options.udp {
            config.transport = TransportKind::Datagram;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be between 1 and 65535");
        }

        if let Some(host) = &self.host {
            if host.is_empty() {
                bail!("host cannot be empty");
            }
        } else if self.transport == TransportKind::Datagram {
            bail!("datagram transport needs a host to poll; listening is stream only");
        }

        Ok(())
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        match &self.host {
            Some(host) => {
                info!("  Mode: client");
                info!("  Host: {}", host);
                info!("  Serial: {} ({:#010x})", self.serial, self.serial);
                info!("  Poll Delay: {}s", self.poll_delay);
            }
            None => info!("  Mode: server"),
        }
        info!("  Port: {}", self.port);
        info!("  Transport: {:?}", self.transport);
        info!(
            "  Output: {}",
            self.output_file.as_deref().unwrap_or("stdout")
        );
        if let Some(file) = &self.datalog_file {
            info!("  Datalog File: {}", file);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(self.poll_delay)
    }

    pub fn output_file(&self) -> Option<&str> {
        self.output_file.as_deref()
    }

    pub fn datalog_file(&self) -> Option<&str> {
        self.datalog_file.as_deref()
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn inverter_serial(&self) -> bool {
        self.inverter_serial
    }

    fn default_transport() -> TransportKind {
        TransportKind::Stream
    }

    fn default_poll_delay() -> u64 {
        60
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_enabled() -> bool {
        true
    }
}

/// Datalogger serials are written either in decimal or as 0x-prefixed hex.
pub fn parse_serial(input: &str) -> Result<u32> {
    let s = input.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => u32::from_str(s),
    };

    parsed.map_err(|err| anyhow!("invalid serial {:?}: {}", input, err))
}

fn de_serial<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSerial {
        Number(u32),
        Text(String),
    }

    match RawSerial::deserialize(deserializer)? {
        RawSerial::Number(n) => Ok(n),
        RawSerial::Text(s) => parse_serial(&s).map_err(serde::de::Error::custom),
    }
}
