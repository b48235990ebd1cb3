//! Simulated daisy chain of modules for tests.
//!
//! Modules answer the way the real boards do: a reply echoes the request
//! with the reply flag set in the address byte, followed by the payload and a
//! CRC. Address 0 reaches the first module of the chain that still has no
//! address; broadcasts are echoed verbatim.

use crate::error::{Error, Result};
use crate::protocol::*;
use crate::transport::Transport;
use std::collections::VecDeque;

const REGISTER_COUNT: usize = 0x40;

#[derive(Debug, Clone)]
pub struct MockModule {
    pub address: u8,
    pub registers: [u8; REGISTER_COUNT],
    /// Flip the CRC of every reply.
    pub corrupt: bool,
    /// Stop answering after being addressed.
    pub silent: bool,
}

impl MockModule {
    fn new() -> Self {
        Self {
            address: UNADDRESSED,
            registers: [0; REGISTER_COUNT],
            corrupt: false,
            silent: false,
        }
    }

    pub fn set_adc(&mut self, module_raw: u16, cells_raw: [u16; CELLS_PER_MODULE], temps_raw: [u16; 2]) {
        let words = std::iter::once(module_raw)
            .chain(cells_raw)
            .chain(temps_raw);
        for (i, word) in words.enumerate() {
            let offset = REG_GPAI as usize + i * 2;
            self.registers[offset..offset + 2].copy_from_slice(&word.to_be_bytes());
        }
    }

    pub fn set_status(&mut self, status: [u8; 4]) {
        let offset = REG_ALERT_STATUS as usize;
        self.registers[offset..offset + 4].copy_from_slice(&status);
    }
}

#[derive(Debug, Default)]
pub struct MockChain {
    modules: Vec<MockModule>,
    inbound: VecDeque<u8>,
    scripted: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    /// Number of reset broadcasts to leave unanswered.
    pub ignored_resets: u32,
    /// Number of address assignments to leave unanswered.
    pub ignored_assignments: u32,
    /// Number of address assignments taken without an acknowledgment.
    pub lost_assignment_acks: u32,
}

impl MockChain {
    pub fn new(n_modules: usize) -> Self {
        Self {
            modules: vec![MockModule::new(); n_modules],
            ..Default::default()
        }
    }

    /// Module at `index` in chain order.
    pub fn module_mut(&mut self, index: usize) -> &mut MockModule {
        &mut self.modules[index]
    }

    pub fn modules(&self) -> &[MockModule] {
        &self.modules
    }

    /// Answers the next request with `reply` instead of simulating it.
    pub fn queue_reply(&mut self, reply: &[u8]) {
        self.scripted.push_back(reply.to_vec());
    }

    /// Puts bytes on the line right away, as line noise would.
    pub fn inject_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Frames written to `register` of `address`, as `(address, value)`.
    pub fn writes_to(&self, register: u8) -> Vec<(u8, u8)> {
        self.sent
            .iter()
            .filter(|frame| frame.len() == 4 && frame[1] == register)
            .map(|frame| (decode_address_byte(frame[0]).0, frame[2]))
            .collect()
    }

    fn reply(&mut self, mut rx_buffer: Vec<u8>, corrupt: bool) {
        let mut crc = checksum(&rx_buffer);
        if corrupt {
            crc ^= 0xFF;
        }
        rx_buffer.push(crc);
        self.inbound.extend(rx_buffer);
    }

    fn simulate(&mut self, frame: &[u8]) {
        if frame.len() < 3 {
            return;
        }
        let (address, is_write) = decode_address_byte(frame[0]);
        let (register, value) = (frame[1], frame[2]);
        if is_write && (frame.len() != 4 || checksum(&frame[..3]) != frame[3]) {
            return;
        }

        if address == BROADCAST {
            if !is_write {
                return;
            }
            if register == REG_RESET && value == RESET_MAGIC {
                if self.ignored_resets > 0 {
                    self.ignored_resets -= 1;
                    return;
                }
                for module in &mut self.modules {
                    module.address = UNADDRESSED;
                }
            } else {
                for module in &mut self.modules {
                    module.registers[register as usize % REGISTER_COUNT] = value;
                }
            }
            self.reply(frame[..3].to_vec(), false);
            return;
        }

        let Some(index) = self.modules.iter().position(|m| m.address == address) else {
            return;
        };
        if self.modules[index].silent {
            return;
        }
        let echo = vec![frame[0] | REPLY_FLAG, register, value];
        if is_write {
            if register == REG_ADDR_CTRL && value & ADDRESS_ASSIGN_FLAG != 0 {
                if self.ignored_assignments > 0 {
                    self.ignored_assignments -= 1;
                    return;
                }
                self.modules[index].address = value & BROADCAST;
                self.modules[index].registers[REG_ADDR_CTRL as usize] = value;
                if self.lost_assignment_acks > 0 {
                    self.lost_assignment_acks -= 1;
                    return;
                }
            } else {
                self.modules[index].registers[register as usize % REGISTER_COUNT] = value;
            }
            let corrupt = self.modules[index].corrupt;
            self.reply(echo, corrupt);
        } else {
            let module = &self.modules[index];
            let start = register as usize;
            let end = (start + value as usize).min(REGISTER_COUNT);
            let mut rx_buffer = echo;
            rx_buffer.extend_from_slice(&module.registers[start.min(end)..end]);
            let corrupt = module.corrupt;
            self.reply(rx_buffer, corrupt);
        }
    }
}

impl Transport for MockChain {
    fn write_all(&mut self, tx_buffer: &[u8]) -> Result<()> {
        self.sent.push(tx_buffer.to_vec());
        if let Some(reply) = self.scripted.pop_front() {
            self.inbound.extend(reply);
        } else {
            self.simulate(tx_buffer);
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(self.inbound.len())
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.inbound
            .pop_front()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::TimedOut.into()))
    }
}
