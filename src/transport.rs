use crate::error::Result;

/// Raw byte I/O on the module bus.
///
/// The bus is half-duplex and shared by every module of the chain, so a
/// transport is only ever driven by one [`BusClient`](crate::bus::BusClient)
/// at a time.
pub trait Transport {
    fn write_all(&mut self, tx_buffer: &[u8]) -> Result<()>;

    /// Number of received bytes waiting to be read.
    fn bytes_to_read(&mut self) -> Result<usize>;

    /// Reads one byte, blocking up to the transport's read timeout.
    fn read_byte(&mut self) -> Result<u8>;

    /// Reads until no more bytes are pending.
    fn read_pending(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = Vec::new();
        loop {
            let pending = self.bytes_to_read()?;
            if pending == 0 {
                break;
            }
            log::trace!("Got {} pending bytes", pending);
            for _ in 0..pending {
                rx_buffer.push(self.read_byte()?);
            }
        }
        Ok(rx_buffer)
    }
}
