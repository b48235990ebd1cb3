use std::fmt;

/// Step of the discovery run that did not get acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStage {
    /// Broadcast reset of all module addresses.
    Reset,
    /// Assignment of the given address to the head of the unaddressed chain.
    AddressAssignment(u8),
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiscoveryStage::Reset => write!(f, "address reset"),
            DiscoveryStage::AddressAssignment(address) => {
                write!(f, "assignment of address {}", address)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(
        "CRC mismatch from module {address} register {register:#04X} - received={received:#04X} calculated={calculated:#04X}"
    )]
    CrcMismatch {
        address: u8,
        register: u8,
        received: u8,
        calculated: u8,
    },
    #[error("No response from module {address} register {register:#04X}")]
    NoResponse { address: u8, register: u8 },
    #[error(
        "Invalid reply size from module {address} register {register:#04X} - required={required} received={received}"
    )]
    ReplySize {
        address: u8,
        register: u8,
        required: usize,
        received: usize,
    },
    #[error("Temperature sensor {sensor} reading {raw:#06X} is out of range")]
    SensorOutOfRange { sensor: u8, raw: u16 },
    #[error("Discovery failed: {stage} not acknowledged after {attempts} attempts")]
    DiscoveryTimeout { stage: DiscoveryStage, attempts: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialport")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
