//! The whole pack: address assignment, polling and balancing.

use crate::balance::{self, BalanceCommand};
use crate::bus::BusClient;
use crate::driver;
use crate::error::{DiscoveryStage, Error, Result};
use crate::module::{Freshness, ModuleRecord};
use crate::protocol::*;
use crate::transport::Transport;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct PackSettings {
    pub max_reset_attempts: u32,
    pub max_address_attempts: u32,
    /// Pause between discovery retries, after stopping balancing and between
    /// the two balancing writes.
    pub command_pause: Duration,
    pub balance_tolerance: f32,
    /// Reads of the balance control register after balancing, for the log only.
    pub balance_monitor_iterations: u32,
    pub balance_monitor_interval: Duration,
}

impl Default for PackSettings {
    fn default() -> Self {
        Self {
            max_reset_attempts: 50,
            max_address_attempts: 50,
            command_pause: Duration::from_millis(20),
            balance_tolerance: balance::DEFAULT_TOLERANCE,
            balance_monitor_iterations: 10,
            balance_monitor_interval: Duration::from_secs(1),
        }
    }
}

/// Progress of one chain slot through discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressState {
    Unaddressed,
    AddressPending { address: u8, attempts: u32 },
    Addressed(u8),
}

/// Pack-wide values of one poll cycle, taken over the modules read
/// successfully in that cycle.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PackAggregate {
    pub pack_voltage: f32,
    pub lowest_cell_voltage: Option<f32>,
    pub highest_cell_voltage: Option<f32>,
    pub lowest_temperature: Option<f32>,
    pub highest_temperature: Option<f32>,
    pub fresh_modules: usize,
}

impl PackAggregate {
    pub fn from_modules(modules: &[ModuleRecord]) -> Self {
        let mut aggregate = Self::default();
        for module in modules.iter().filter(|m| m.is_fresh()) {
            aggregate.fresh_modules += 1;
            aggregate.pack_voltage += module.module_voltage;
            fold_min(&mut aggregate.lowest_cell_voltage, module.lowest_cell_voltage());
            fold_max(&mut aggregate.highest_cell_voltage, module.highest_cell_voltage());
            fold_min(
                &mut aggregate.lowest_temperature,
                module.temperature_extremes.lowest,
            );
            fold_max(
                &mut aggregate.highest_temperature,
                module.temperature_extremes.highest,
            );
        }
        aggregate
    }
}

fn fold_min(current: &mut Option<f32>, value: f32) {
    *current = Some(current.map_or(value, |c| c.min(value)));
}

fn fold_max(current: &mut Option<f32>, value: f32) {
    *current = Some(current.map_or(value, |c| c.max(value)));
}

/// A module that could not be read in a cycle.
#[derive(Debug)]
pub struct ModuleFailure {
    pub address: u8,
    pub error: Error,
}

#[derive(Debug)]
pub struct PollReport {
    pub aggregate: PackAggregate,
    pub failures: Vec<ModuleFailure>,
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

/// CRC failures and silence are worth another attempt, anything else is not.
fn is_retryable(err: &Error) -> bool {
    matches!(
        err,
        Error::CrcMismatch { .. } | Error::NoResponse { .. } | Error::ReplySize { .. }
    )
}

#[derive(Debug)]
pub struct PackManager<T: Transport> {
    bus: BusClient<T>,
    modules: Vec<ModuleRecord>,
    settings: PackSettings,
}

impl<T: Transport> PackManager<T> {
    pub fn new(bus: BusClient<T>, settings: PackSettings) -> Self {
        Self {
            bus,
            modules: Vec::new(),
            settings,
        }
    }

    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    pub fn bus(&self) -> &BusClient<T> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BusClient<T> {
        &mut self.bus
    }

    fn broadcast(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.write(BROADCAST, register, value)?;
        Ok(())
    }

    /// Drops every module of the chain back to address 0.
    pub fn reset_module_addresses(&mut self) -> Result<()> {
        log::debug!("Resetting module addresses");
        let attempts = self.settings.max_reset_attempts;
        for attempt in 1..=attempts {
            match self.bus.write(BROADCAST, REG_RESET, RESET_MAGIC) {
                Ok(ack) if ack == RESET_ACK => {
                    log::debug!("Module addresses reset after {} attempts", attempt);
                    return Ok(());
                }
                Ok(ack) => log::trace!("Unexpected reset acknowledgment {:02X?}", ack),
                Err(err) if is_retryable(&err) => {
                    log::trace!("Failed try {} of {}, repeating ({err})", attempt, attempts)
                }
                Err(err) => return Err(err),
            }
            pause(self.settings.command_pause);
        }
        Err(Error::DiscoveryTimeout {
            stage: DiscoveryStage::Reset,
            attempts,
        })
    }

    /// True when an unaddressed module sits at the head of the remaining chain.
    fn probe_unaddressed(&mut self) -> Result<bool> {
        let rx_buffer = self.bus.read_no_crc(UNADDRESSED, REG_DEV_STATUS, 1)?;
        Ok(rx_buffer.starts_with(&DISCOVERY_SIGNATURE))
    }

    /// True when a module answers at `address` and reports it as its own.
    fn answers_at(&mut self, address: u8) -> Result<bool> {
        match self.bus.read(address, REG_ADDR_CTRL, 1) {
            Ok(rx_buffer) => Ok(rx_buffer
                .get(ECHO_LENGTH)
                .is_some_and(|value| value & BROADCAST == address)),
            Err(err) if is_retryable(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn try_assign_address(&mut self, address: u8) -> Result<bool> {
        let value = address | ADDRESS_ASSIGN_FLAG;
        let expected = [REPLY_FLAG | 0x01, REG_ADDR_CTRL, value];
        match self.bus.write(UNADDRESSED, REG_ADDR_CTRL, value) {
            Ok(ack) if ack.starts_with(&expected) => return Ok(true),
            Ok(ack) => log::trace!("Unexpected address acknowledgment {:02X?}", ack),
            Err(err) if is_retryable(&err) => {
                log::trace!("Address {} not acknowledged ({err})", address)
            }
            Err(err) => return Err(err),
        }
        // a lost ack may hide a module that took the address; retrying at
        // address 0 would then hand the same address to the next module
        if self.answers_at(address)? {
            log::debug!("Module took address {} without acknowledging", address);
            return Ok(true);
        }
        Ok(false)
    }

    /// Resets the chain and hands out addresses 1, 2, ... in chain order.
    ///
    /// Only the first unaddressed module answers address 0, so each
    /// assignment exposes the next module. Discovery ends at the first probe
    /// nobody answers. Modules addressed before a failure stay known.
    pub fn auto_assign_module_addresses(&mut self) -> Result<usize> {
        self.modules.clear();
        self.reset_module_addresses()?;
        log::debug!("Assigning module addresses");

        'discovery: for address in 1..=MAX_MODULE_ADDR {
            let mut state = AddressState::Unaddressed;
            loop {
                state = match state {
                    AddressState::Unaddressed => {
                        if !self.probe_unaddressed()? {
                            break 'discovery;
                        }
                        log::debug!("Unaddressed module found, assigning address {}", address);
                        AddressState::AddressPending {
                            address,
                            attempts: 0,
                        }
                    }
                    AddressState::AddressPending { address, attempts } => {
                        if attempts >= self.settings.max_address_attempts {
                            return Err(Error::DiscoveryTimeout {
                                stage: DiscoveryStage::AddressAssignment(address),
                                attempts,
                            });
                        }
                        if self.try_assign_address(address)? {
                            AddressState::Addressed(address)
                        } else {
                            pause(self.settings.command_pause);
                            AddressState::AddressPending {
                                address,
                                attempts: attempts + 1,
                            }
                        }
                    }
                    AddressState::Addressed(address) => {
                        self.modules.push(ModuleRecord::new(address));
                        break;
                    }
                };
            }
        }

        log::info!("Found {} modules", self.modules.len());
        Ok(self.modules.len())
    }

    /// Reads the status flags of every module. Failures are reported per
    /// module and do not stop the sweep.
    pub fn read_all_status(&mut self) -> Vec<ModuleFailure> {
        let mut failures = Vec::new();
        for module in &mut self.modules {
            if let Err(error) = driver::read_status(&mut self.bus, module) {
                log::warn!("Module {} status read failed: {error}", module.address);
                failures.push(ModuleFailure {
                    address: module.address,
                    error,
                });
            }
        }
        failures
    }

    /// One poll cycle. Balancing is stopped first so the bleed resistors do
    /// not skew the readings.
    ///
    /// Readings of the previous cycle are stale from here on; only a
    /// successful read makes a module fresh again, so an aborted cycle leaves
    /// nothing for balancing to act on.
    pub fn read_all_volt_temp(&mut self) -> Result<PollReport> {
        for module in self.modules.iter_mut().filter(|m| m.is_fresh()) {
            module.freshness = Freshness::Stale;
        }
        self.stop_balancing()?;
        pause(self.settings.command_pause);

        let mut failures = Vec::new();
        for module in &mut self.modules {
            log::debug!(
                "Module {} reading voltage and temperature values",
                module.address
            );
            match driver::read_voltage_and_temperature(&mut self.bus, module) {
                Ok(()) => log::debug!(
                    "Module {} (since reset) lowest cell={:.4}V highest cell={:.4}V",
                    module.address,
                    module
                        .cell_extremes
                        .iter()
                        .map(|e| e.lowest)
                        .fold(f32::INFINITY, f32::min),
                    module
                        .cell_extremes
                        .iter()
                        .map(|e| e.highest)
                        .fold(f32::NEG_INFINITY, f32::max)
                ),
                Err(error) => {
                    log::warn!("Module {} read failed: {error}", module.address);
                    module.freshness = Freshness::Stale;
                    failures.push(ModuleFailure {
                        address: module.address,
                        error,
                    });
                }
            }
        }

        let aggregate = PackAggregate::from_modules(&self.modules);
        log::debug!("Pack aggregate: {:?}", aggregate);
        Ok(PollReport {
            aggregate,
            failures,
        })
    }

    /// Switches on the balancing resistors of every cell above the lowest cell
    /// plus tolerance, for `duration` seconds. Modules whose latest read failed
    /// are left out, as is their data when looking for the lowest cell.
    pub fn balance_cells(&mut self, duration: u8) -> Result<Vec<BalanceCommand>> {
        let snapshot: Vec<_> = self
            .modules
            .iter()
            .filter(|m| {
                if !m.is_fresh() {
                    log::debug!("Module {} has no fresh readings, not balancing", m.address);
                }
                m.is_fresh()
            })
            .map(|m| (m.address, m.cell_voltages))
            .collect();

        let commands = balance::plan(&snapshot, self.settings.balance_tolerance);
        for command in &commands {
            log::debug!(
                "Setting balancing duration on Module: {} : 0x{:X}",
                command.address,
                command.mask
            );
            self.bus.write(command.address, REG_BAL_TIME, duration)?;
            pause(self.settings.command_pause);
            self.bus.write(command.address, REG_BAL_CTRL, command.mask)?;
        }

        if let Some(last) = commands.last() {
            self.monitor_balancing(last.address);
        }
        Ok(commands)
    }

    /// Logs the balance control register of `address` a few times.
    pub fn monitor_balancing(&mut self, address: u8) {
        for _ in 0..self.settings.balance_monitor_iterations {
            match self.bus.read(address, REG_BAL_CTRL, 1) {
                Ok(rx_buffer) => log::debug!(
                    "Module {} balance control: {:02X?}",
                    address,
                    rx_buffer
                ),
                Err(err) => log::warn!("Module {} balance control read failed: {err}", address),
            }
            pause(self.settings.balance_monitor_interval);
        }
    }

    pub fn stop_balancing(&mut self) -> Result<()> {
        self.broadcast(REG_BAL_CTRL, 0x00)
    }

    pub fn clear_faults(&mut self) -> Result<()> {
        log::debug!("Resetting alerts and faults");
        self.broadcast(REG_ALERT_STATUS, 0xFF)?;
        self.broadcast(REG_ALERT_STATUS, 0x00)?;
        self.broadcast(REG_FAULT_STATUS, 0xFF)?;
        self.broadcast(REG_FAULT_STATUS, 0x00)?;
        log::debug!("Alerts and faults reset");
        Ok(())
    }

    pub fn sleep_boards(&mut self) -> Result<()> {
        log::debug!("Putting the boards to sleep");
        self.broadcast(REG_IO_CTRL, 0x04)
    }

    pub fn wake_boards(&mut self) -> Result<()> {
        log::debug!("Waking up the boards");
        // clear the sleep bit, then pulse the alert reset
        self.broadcast(REG_IO_CTRL, 0x00)?;
        self.broadcast(REG_ALERT_STATUS, 0x04)?;
        self.broadcast(REG_ALERT_STATUS, 0x00)
    }
}
