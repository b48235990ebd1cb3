use crate::error::{Error, Result};

pub const BAUD_RATE: u32 = 612_500;

/// Address answered by the first module of the chain that has no address yet.
pub const UNADDRESSED: u8 = 0x00;
pub const MAX_MODULE_ADDR: u8 = 0x3E;
pub const BROADCAST: u8 = 0x3F;

pub const REG_DEV_STATUS: u8 = 0x00;
pub const REG_GPAI: u8 = 0x01;
pub const REG_ALERT_STATUS: u8 = 0x20;
pub const REG_FAULT_STATUS: u8 = 0x21;
pub const REG_COV_FAULT: u8 = 0x22;
pub const REG_CUV_FAULT: u8 = 0x23;
pub const REG_ADC_CTRL: u8 = 0x30;
pub const REG_IO_CTRL: u8 = 0x31;
pub const REG_BAL_CTRL: u8 = 0x32;
pub const REG_BAL_TIME: u8 = 0x33;
pub const REG_ADC_CONV: u8 = 0x34;
pub const REG_ADDR_CTRL: u8 = 0x3B;
pub const REG_RESET: u8 = 0x3C;

/// Value written to [`REG_RESET`] to drop every module back to address 0.
pub const RESET_MAGIC: u8 = 0xA5;
/// Marks a value written to [`REG_ADDR_CTRL`] as an address assignment.
pub const ADDRESS_ASSIGN_FLAG: u8 = 0x80;
/// Set by a module in the echoed address byte of its reply.
pub const REPLY_FLAG: u8 = 0x80;

pub const RESET_ACK: [u8; 4] = [0x7F, REG_RESET, RESET_MAGIC, 0x57];
pub const DISCOVERY_SIGNATURE: [u8; 3] = [REPLY_FLAG, REG_DEV_STATUS, 0x01];

/// Every reply starts with the three request bytes.
pub const ECHO_LENGTH: usize = 3;

pub const CELLS_PER_MODULE: usize = 6;
pub const SENSORS_PER_MODULE: usize = 2;

/// ModuleV, CellV1-6, Temp1, Temp2, two bytes each.
pub const ADC_BLOCK_LENGTH: u8 = 0x12;
pub const STATUS_BLOCK_LENGTH: u8 = 0x04;

const CRC_POLYNOMIAL: u8 = 0x07;

const MODULE_VOLTS_PER_COUNT: f32 = 0.0020346293922562;
const CELL_VOLTS_PER_COUNT: f32 = 0.000381493;

const STEINHART_A: f64 = 0.0007610373573;
const STEINHART_B: f64 = 0.0002728524832;
const STEINHART_C: f64 = 0.0000001022822735;

/// CRC-8, polynomial 0x07, initial value 0, no reflection, no output xor.
pub fn checksum(buffer: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for b in buffer {
        crc ^= b;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Builds a request frame. The address byte layout is `0bBAAAAAAW` where
/// `B` is the blocking bit (always sent as 0), `A` the module address and `W`
/// the write bit. Writes carry a trailing CRC, reads do not.
pub fn encode_request(
    module_address: u8,
    register: u8,
    payload_or_length: u8,
    is_write: bool,
) -> Result<Vec<u8>> {
    if module_address > BROADCAST {
        return Err(Error::InvalidArgument(format!(
            "module address {} exceeds {}",
            module_address, BROADCAST
        )));
    }
    let mut tx_buffer = Vec::with_capacity(4);
    tx_buffer.push((module_address << 1) | u8::from(is_write));
    tx_buffer.push(register);
    tx_buffer.push(payload_or_length);
    if is_write {
        tx_buffer.push(checksum(&tx_buffer));
    }
    Ok(tx_buffer)
}

/// Splits an address byte into `(module_address, is_write)`, ignoring the
/// blocking/reply bit.
pub fn decode_address_byte(byte: u8) -> (u8, bool) {
    ((byte >> 1) & BROADCAST, byte & 0x01 != 0)
}

/// Checks the trailing CRC of a reply against the preceding bytes.
pub fn validate_checksum(address: u8, register: u8, rx_buffer: &[u8]) -> Result<()> {
    let Some((&received, body)) = rx_buffer.split_last() else {
        return Err(Error::NoResponse { address, register });
    };
    let calculated = checksum(body);
    if received != calculated {
        log::warn!(
            "Invalid checksum - calculated={:02X?} received={:02X?} buffer={:02X?}",
            calculated,
            received,
            rx_buffer
        );
        return Err(Error::CrcMismatch {
            address,
            register,
            received,
            calculated,
        });
    }
    Ok(())
}

pub fn validate_len(address: u8, register: u8, rx_buffer: &[u8], required: usize) -> Result<()> {
    if rx_buffer.len() < required {
        log::warn!(
            "Invalid buffer size - required={} received={}",
            required,
            rx_buffer.len()
        );
        return Err(Error::ReplySize {
            address,
            register,
            required,
            received: rx_buffer.len(),
        });
    }
    Ok(())
}

/// Expected reply length for a read of `count` bytes: echo, payload and CRC.
pub const fn reply_size(count: u8) -> usize {
    ECHO_LENGTH + count as usize + 1
}

pub fn module_voltage(raw: u16) -> f32 {
    raw as f32 * MODULE_VOLTS_PER_COUNT
}

pub fn cell_voltage(raw: u16) -> f32 {
    raw as f32 * CELL_VOLTS_PER_COUNT
}

/// The two thermistor inputs of a module. They share the curve but differ in
/// their ADC calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thermistor {
    Sensor1,
    Sensor2,
}

impl Thermistor {
    pub const ALL: [Thermistor; SENSORS_PER_MODULE] = [Thermistor::Sensor1, Thermistor::Sensor2];

    fn calibration(self) -> (f64, f64) {
        match self {
            Thermistor::Sensor1 => (2.0, 33046.0),
            Thermistor::Sensor2 => (9.0, 33068.0),
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Thermistor::Sensor1 => 1,
            Thermistor::Sensor2 => 2,
        }
    }
}

/// Converts a raw thermistor code to °C.
pub fn thermistor_temperature(raw: u16, sensor: Thermistor) -> Result<f32> {
    let (offset, divisor) = sensor.calibration();
    let resistance = (1.78 / ((raw as f64 + offset) / divisor) - 3.57) * 1000.0;
    if !(resistance > 0.0) {
        return Err(Error::SensorOutOfRange {
            sensor: sensor.number(),
            raw,
        });
    }
    let ln_r = resistance.ln();
    let kelvin = 1.0 / (STEINHART_A + STEINHART_B * ln_r + STEINHART_C * ln_r.powi(3));
    Ok((kelvin - 273.15) as f32)
}

pub fn read_u16(rx_buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([rx_buffer[offset], rx_buffer[offset + 1]])
}
