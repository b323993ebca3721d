use crate::channels::Receiver;
use crate::prelude::*;
use std::fs::OpenOptions;
use std::path::Path;

/// Appends every reading to a file as one JSON object per line.
pub struct DatalogWriter {
    file: std::fs::File,
    path: String,
    readings_written: u64,
    receiver: Receiver,
}

impl DatalogWriter {
    pub fn new(path: &str, channels: &Channels) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        // Ensure the directory exists
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file,
            path: path.to_string(),
            readings_written: 0,
            receiver: channels.from_inverter.subscribe(),
        })
    }

    pub fn readings_written(&self) -> u64 {
        self.readings_written
    }

    pub async fn start(mut self) -> Result<()> {
        loop {
            match self.receiver.recv().await {
                Ok(ChannelData::Reading(reading)) => {
                    if let Err(e) = self.write_reading(&reading) {
                        // keep going; the next reading may well succeed
                        warn!("{}", e);
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("datalog writer fell behind, {} readings dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!(
            "datalog writer exiting after {} readings",
            self.readings_written
        );
        Ok(())
    }

    pub fn write_reading(&mut self, reading: &Reading) -> Result<()> {
        let mut json_data = serde_json::Map::new();
        json_data.insert(
            "utc_timestamp".to_string(),
            serde_json::Value::Number(reading.captured_at.timestamp().into()),
        );
        json_data.insert(
            "logger_serial".to_string(),
            serde_json::Value::Number(reading.logger_serial.into()),
        );
        json_data.insert(
            "inverter_serial".to_string(),
            match reading.inverter_serial {
                Some(serial) => serde_json::Value::String(serial.to_string()),
                None => serde_json::Value::Null,
            },
        );

        // Raw registers, still in their wire units
        let mut raw_data = match serde_json::to_value(reading)? {
            serde_json::Value::Object(map) => map,
            other => bail!("reading serialized to {:?}, expected an object", other),
        };
        for key in ["logger_serial", "inverter_serial", "captured_at"] {
            raw_data.remove(key);
        }
        json_data.insert("raw_data".to_string(), serde_json::Value::Object(raw_data));

        let json_string = serde_json::to_string(&serde_json::Value::Object(json_data))?;

        writeln!(self.file, "{}", json_string)
            .and_then(|_| self.file.flush())
            .map_err(|e| anyhow!("Failed to write to datalog file {}: {}", self.path, e))?;

        self.readings_written += 1;
        debug!("Total readings stored in datalog file: {}", self.readings_written);

        Ok(())
    }
}
