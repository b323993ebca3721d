use crate::channels::Receiver;
use crate::prelude::*;

use std::fs::OpenOptions;

/// Human readable block for one reading, units restored from the raw
/// deci/centi registers.
pub fn render(reading: &Reading) -> String {
    let deci = |v: u16| f64::from(v) / 10.0;
    let centi = |v: u16| f64::from(v) / 100.0;

    format!(
        "Time:\t\t{}\n\
         Temperature:\t{:5.1} degrees Celsius\n\
         PV1 voltage:\t{:5.1} V\n\
         PV2 voltage:\t{:5.1} V\n\
         PV3 voltage:\t{:5.1} V\n\
         PV1 current:\t{:5.1} A\n\
         PV2 current:\t{:5.1} A\n\
         PV3 current:\t{:5.1} A\n\
         L1 current:\t{:5.1} A\n\
         L2 current:\t{:5.1} A\n\
         L3 current:\t{:5.1} A\n\
         L1 voltage:\t{:5.1} V\n\
         L2 voltage:\t{:5.1} V\n\
         L3 voltage:\t{:5.1} V\n\
         Frequency:\t{:6.2} Hz\n\
         L1 power:\t{:3} W\n\
         L2 power:\t{:3} W\n\
         L3 power:\t{:3} W\n\
         Today's total:\t{:6.2} kWh\n\
         Total:\t\t{:5.1} kWh\n\
         \n",
        reading.captured_at.format("%Y%m%dT%H%M%SZ"),
        deci(reading.temperature),
        deci(reading.pv1_voltage),
        deci(reading.pv2_voltage),
        deci(reading.pv3_voltage),
        deci(reading.pv1_current),
        deci(reading.pv2_current),
        deci(reading.pv3_current),
        deci(reading.l1_current),
        deci(reading.l2_current),
        deci(reading.l3_current),
        deci(reading.l1_voltage),
        deci(reading.l2_voltage),
        deci(reading.l3_voltage),
        centi(reading.frequency),
        reading.l1_power,
        reading.l2_power,
        reading.l3_power,
        centi(reading.today_total),
        f64::from(reading.lifetime_total) / 10.0,
    )
}

/// Where rendered readings end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(String),
}

impl Destination {
    fn open(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            Self::Stdout => Ok(Box::new(std::io::stdout())),
            Self::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|err| anyhow!("error opening {}: {}", path, err))?;
                Ok(Box::new(file))
            }
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::File(path) => write!(f, "{}", path),
        }
    }
}

pub struct ReportWriter {
    destination: Destination,
    out: Box<dyn Write + Send>,
    receiver: Receiver,
}

impl ReportWriter {
    /// Opens the destination straight away so a bad path fails at startup,
    /// and subscribes before any reading can be published.
    pub fn new(path: Option<&str>, channels: &Channels) -> Result<Self> {
        let destination = match path {
            Some(path) => Destination::File(path.to_owned()),
            None => Destination::Stdout,
        };
        let out = destination.open()?;

        Ok(Self {
            destination,
            out,
            receiver: channels.from_inverter.subscribe(),
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub async fn start(mut self) -> Result<()> {
        info!("writing readings to {}", self.destination);

        loop {
            match self.receiver.recv().await {
                Ok(ChannelData::Reading(reading)) => {
                    if let Err(e) = self.write(&reading) {
                        warn!("{}", e);
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("report writer fell behind, {} readings dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("report writer exiting");
        Ok(())
    }

    fn write(&mut self, reading: &Reading) -> Result<()> {
        self.out
            .write_all(render(reading).as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|err| anyhow!("error writing to {}: {}", self.destination, err))
    }
}
