use crate::error::DecodeError;
use crate::prelude::*;

use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, le_u32},
    IResult,
};
use nom_derive::{Nom, Parse};
use serde::{Serialize, Serializer};

/// Size of a telemetry frame sent by the datalogger.
pub const FRAME_LEN: usize = 103;
/// Size of the request ("magic string") we send to ask for a frame.
pub const REQUEST_LEN: usize = 16;
/// Size of the acknowledgement blob the datalogger sends after a frame.
pub const ACK_LEN: usize = 31;

const REQUEST_PREFIX: [u8; 4] = [0x68, 0x02, 0x40, 0x30];
const REQUEST_TRAILER: u8 = 0x16;
const INVERTER_SERIAL_LEN: usize = 14;

// InverterSerial {{{
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InverterSerial([u8; INVERTER_SERIAL_LEN]);

impl std::fmt::Display for InverterSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Debug for InverterSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for InverterSerial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
} // }}}

/// Whether `decode_reading` should copy the inverter serial out of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialField {
    Copy,
    Skip,
}

// Reading {{{
/// One telemetry snapshot. Registers are kept raw: temperatures, voltages
/// and currents are deci-units, frequency is centi-Hz, power is W, today's
/// total is centi-kWh and the lifetime total is deci-kWh.
#[derive(Clone, Debug, PartialEq, Serialize, Nom)]
#[nom(BigEndian)]
pub struct Reading {
    // 0x04, stored with the most significant byte last
    #[nom(SkipBefore(4))]
    #[nom(Parse = "le_u32")]
    pub logger_serial: u32,

    // 0x11
    #[nom(SkipBefore(9))]
    #[nom(Parse = "Reading::inverter_serial_for_nom")]
    pub inverter_serial: Option<InverterSerial>,

    pub temperature: u16,
    pub pv1_voltage: u16,
    pub pv2_voltage: u16,
    pub pv3_voltage: u16,
    pub pv1_current: u16,
    pub pv2_current: u16,
    pub pv3_current: u16,
    pub l1_current: u16,
    pub l2_current: u16,
    pub l3_current: u16,
    pub l1_voltage: u16,
    pub l2_voltage: u16,
    pub l3_voltage: u16,
    pub frequency: u16,
    pub l1_power: u16,
    pub l2_power: u16,
    pub l3_power: u16,

    // 0x45; only the low half of the 4 byte slot is read
    #[nom(SkipBefore(4))]
    pub today_total: u16,

    // 0x49; same again, 16 bits out of a 32 bit slot
    #[nom(SkipBefore(2))]
    #[nom(Parse = "Reading::be_u16_widened")]
    pub lifetime_total: u32,

    #[nom(Parse = "Reading::current_time_for_nom")]
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    fn inverter_serial_for_nom(input: &[u8]) -> IResult<&[u8], Option<InverterSerial>> {
        let (input, raw) = take(INVERTER_SERIAL_LEN)(input)?;
        let mut serial = [0u8; INVERTER_SERIAL_LEN];
        serial.copy_from_slice(raw);
        Ok((input, Some(InverterSerial(serial))))
    }

    fn be_u16_widened(input: &[u8]) -> IResult<&[u8], u32> {
        let (input, value) = be_u16(input)?;
        Ok((input, u32::from(value)))
    }

    fn current_time_for_nom(input: &[u8]) -> IResult<&[u8], DateTime<Utc>> {
        Ok((input, Utc::now()))
    }
} // }}}

/// Decode a telemetry frame. Anything but exactly `FRAME_LEN` bytes is
/// rejected; no partial readings are ever produced.
pub fn decode_reading(frame: &[u8], serial_field: SerialField) -> Result<Reading, DecodeError> {
    if frame.len() != FRAME_LEN {
        return Err(DecodeError::BadLength(frame.len()));
    }

    let (_, mut reading) =
        Reading::parse(frame).map_err(|_| DecodeError::BadLength(frame.len()))?;

    if serial_field == SerialField::Skip {
        reading.inverter_serial = None;
    }

    Ok(reading)
}

// RequestFrame {{{
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame([u8; REQUEST_LEN]);

impl RequestFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn checksum(&self) -> u8 {
        self.0[14]
    }

    /// The serial this frame was built from.
    pub fn serial(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }
}

impl std::fmt::Debug for RequestFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestFrame({:02x?})", self.0)
    }
} // }}}

/// Build the 16 byte request for a datalogger serial number.
pub fn encode_request(serial: u32) -> RequestFrame {
    let mut r = [0u8; REQUEST_LEN];

    r[0..4].copy_from_slice(&REQUEST_PREFIX);
    r[4..8].copy_from_slice(&serial.to_le_bytes());
    r[8..12].copy_from_slice(&serial.to_le_bytes());
    r[12] = 0x01;
    r[13] = 0x00;
    // plain 8 bit sum, not a CRC
    r[14] = additive_checksum(&r[1..14]);
    r[15] = REQUEST_TRAILER;

    RequestFrame(r)
}

fn additive_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}
