pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::channels::{ChannelData, Channels};
pub use crate::config::{self, Config};
pub use crate::datalogger::{
    self,
    packet::{InverterSerial, Reading, RequestFrame},
};
pub use crate::options::Options;
