//! Request/response transactions on the module bus.
//!
//! Every transaction sends one frame, waits the settle delay and then
//! collects whatever the modules put on the line. Replies are returned whole:
//! the three echoed request bytes, the payload and the trailing CRC.

use crate::error::Result;
use crate::protocol::{self, encode_request};
use crate::transport::Transport;
use std::time::Duration;

/// Slowest expected module response at 612500 baud.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct BusClient<T: Transport> {
    transport: T,
    settle_delay: Duration,
}

impl<T: Transport> BusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn set_settle_delay(&mut self, settle_delay: Duration) {
        self.settle_delay = settle_delay;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        // clear all incoming serial to avoid data collision
        let stale = self.transport.read_pending()?;
        if !stale.is_empty() {
            log::trace!("Dropped {} stale bytes: {:02X?}", stale.len(), stale);
        }
        log::trace!("send_bytes: {:02X?}", tx_buffer);
        self.transport.write_all(tx_buffer)
    }

    fn receive_bytes(&mut self) -> Result<Vec<u8>> {
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        let rx_buffer = self.transport.read_pending()?;
        log::trace!("receive_bytes: {:02X?}", rx_buffer);
        Ok(rx_buffer)
    }

    fn transaction(
        &mut self,
        address: u8,
        register: u8,
        value: u8,
        is_write: bool,
    ) -> Result<Vec<u8>> {
        let tx_buffer = encode_request(address, register, value, is_write)?;
        self.send_bytes(&tx_buffer)?;
        self.receive_bytes()
    }

    /// Reads `count` bytes starting at `register`. The reply is only
    /// returned when its trailing CRC matches and it carries the echo plus
    /// all `count` payload bytes.
    pub fn read(&mut self, address: u8, register: u8, count: u8) -> Result<Vec<u8>> {
        let rx_buffer = self.transaction(address, register, count, false)?;
        protocol::validate_checksum(address, register, &rx_buffer)?;
        protocol::validate_len(address, register, &rx_buffer, protocol::reply_size(count))?;
        Ok(rx_buffer)
    }

    /// Same as [`read`](Self::read) without CRC validation. Only meant for
    /// discovery probes, where an unaddressed module's reply cannot be trusted
    /// yet. May return an empty buffer.
    pub fn read_no_crc(&mut self, address: u8, register: u8, count: u8) -> Result<Vec<u8>> {
        self.transaction(address, register, count, false)
    }

    /// Writes `value` to `register` and validates the acknowledgment, which
    /// is at least the echoed request followed by a CRC.
    pub fn write(&mut self, address: u8, register: u8, value: u8) -> Result<Vec<u8>> {
        let rx_buffer = self.transaction(address, register, value, true)?;
        protocol::validate_checksum(address, register, &rx_buffer)?;
        protocol::validate_len(address, register, &rx_buffer, protocol::ECHO_LENGTH + 1)?;
        Ok(rx_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::MockChain;
    use crate::protocol::*;

    fn client(chain: MockChain) -> BusClient<MockChain> {
        let mut bus = BusClient::new(chain);
        bus.set_settle_delay(Duration::ZERO);
        bus
    }

    #[test]
    fn read_rejects_bad_crc() {
        let mut chain = MockChain::new(0);
        chain.queue_reply(&[0x02, 0x01, 0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0x00]);
        let mut bus = client(chain);

        let result = bus.read(1, REG_GPAI, 4);
        assert!(matches!(
            result,
            Err(Error::CrcMismatch {
                address: 1,
                register: REG_GPAI,
                received: 0x00,
                calculated: 0x76,
            })
        ));
        assert_eq!(bus.transport().sent_frames(), &[vec![0x02u8, 0x01, 0x04]]);
    }

    #[test]
    fn read_returns_whole_reply() {
        let mut chain = MockChain::new(0);
        chain.queue_reply(&[0x02, 0x01, 0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0x76]);
        let mut bus = client(chain);

        let rx = bus.read(1, REG_GPAI, 4).unwrap();
        assert_eq!(&rx[ECHO_LENGTH..rx.len() - 1], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn read_no_crc_passes_anything() {
        let mut chain = MockChain::new(0);
        chain.queue_reply(&[0x80, 0x00, 0x01, 0x99]);
        let mut bus = client(chain);
        assert_eq!(
            bus.read_no_crc(UNADDRESSED, REG_DEV_STATUS, 1).unwrap(),
            vec![0x80, 0x00, 0x01, 0x99]
        );
        // nothing answers, nothing returned
        assert!(bus.read_no_crc(UNADDRESSED, REG_DEV_STATUS, 1).unwrap().is_empty());
    }

    #[test]
    fn silent_bus_is_no_response() {
        let mut bus = client(MockChain::new(0));
        assert!(matches!(
            bus.read(5, REG_ALERT_STATUS, 4),
            Err(Error::NoResponse {
                address: 5,
                register: REG_ALERT_STATUS
            })
        ));
    }

    #[test]
    fn write_appends_crc_and_checks_ack() {
        let mut bus = client(MockChain::new(1));
        bus.write(BROADCAST, REG_RESET, RESET_MAGIC).unwrap();
        bus.write(UNADDRESSED, REG_ADDR_CTRL, 1 | ADDRESS_ASSIGN_FLAG)
            .unwrap();

        let ack = bus.write(1, REG_BAL_TIME, 5).unwrap();
        assert_eq!(&ack[..3], &[0x83, REG_BAL_TIME, 5]);
        let frame = bus.transport().sent_frames().last().unwrap().clone();
        assert_eq!(frame.len(), 4);
        assert_eq!(frame[3], checksum(&frame[..3]));
    }

    #[test]
    fn truncated_replies_are_rejected() {
        let mut chain = MockChain::new(0);
        // a lone zero byte carries a matching CRC over nothing
        chain.queue_reply(&[0x00]);
        chain.queue_reply(&[0x02, 0x01, 0x04, 0xDF]);
        let mut bus = client(chain);

        assert!(matches!(
            bus.write(BROADCAST, REG_BAL_CTRL, 0x00),
            Err(Error::ReplySize {
                address: BROADCAST,
                register: REG_BAL_CTRL,
                required: 4,
                received: 1,
            })
        ));
        assert!(matches!(
            bus.read(1, REG_GPAI, 4),
            Err(Error::ReplySize {
                address: 1,
                register: REG_GPAI,
                required: 8,
                received: 4,
            })
        ));
    }

    #[test]
    fn stale_bytes_are_dropped_before_sending() {
        let mut chain = MockChain::new(1);
        chain.inject_inbound(&[0xDE, 0xAD]);
        let mut bus = client(chain);
        let ack = bus.write(BROADCAST, REG_RESET, RESET_MAGIC).unwrap();
        assert_eq!(ack, RESET_ACK);
    }

    #[test]
    fn invalid_address_is_rejected_before_sending() {
        let mut bus = client(MockChain::new(0));
        assert!(matches!(
            bus.read(0x40, REG_GPAI, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(bus.transport().sent_frames().is_empty());
    }
}
