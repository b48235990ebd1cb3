use crate::error::Result;
use crate::protocol::BAUD_RATE;
use crate::transport::Transport;
use std::io::{Read, Write};
use std::time::Duration;

/// [`Transport`] over a local serial port, usually an FTDI adapter wired to
/// the first module of the chain.
#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn new(port: &str, timeout: Duration) -> Result<Self> {
        let serial = serialport::new(port, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;
        log::debug!("Serial port '{}' opened at {} baud", port, BAUD_RATE);
        Ok(Self { serial })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, tx_buffer: &[u8]) -> Result<()> {
        self.serial.write_all(tx_buffer)?;
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(self.serial.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.serial.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}
