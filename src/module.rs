use crate::protocol::{CELLS_PER_MODULE, SENSORS_PER_MODULE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lowest and highest value seen since the last reset.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extremes {
    pub lowest: f32,
    pub highest: f32,
}

impl Extremes {
    pub const VOLTAGE_SEED: Extremes = Extremes::new(200.0, 0.0);
    pub const TEMPERATURE_SEED: Extremes = Extremes::new(200.0, -100.0);

    pub const fn new(lowest: f32, highest: f32) -> Self {
        Self { lowest, highest }
    }

    /// Widens the range to include `value`.
    pub fn fold(&mut self, value: f32) {
        self.lowest = self.lowest.min(value);
        self.highest = self.highest.max(value);
    }
}

/// Outcome of the latest read of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Freshness {
    #[default]
    Never,
    Fresh,
    /// The latest read failed; values are from an earlier cycle.
    Stale,
}

/// State of one module of the pack.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleRecord {
    pub address: u8,
    pub cell_voltages: [f32; CELLS_PER_MODULE],
    pub cell_extremes: [Extremes; CELLS_PER_MODULE],
    /// Sum of the cell voltages.
    pub module_voltage: f32,
    /// Voltage reported by the module's own pack input.
    pub measured_voltage: f32,
    pub measured_voltage_extremes: Extremes,
    pub temperatures: [f32; SENSORS_PER_MODULE],
    pub temperature_extremes: Extremes,
    pub alerts: u8,
    pub faults: u8,
    pub cov_faults: u8,
    pub cuv_faults: u8,
    pub freshness: Freshness,
}

impl ModuleRecord {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            cell_voltages: [0.0; CELLS_PER_MODULE],
            cell_extremes: [Extremes::VOLTAGE_SEED; CELLS_PER_MODULE],
            module_voltage: 0.0,
            measured_voltage: 0.0,
            measured_voltage_extremes: Extremes::VOLTAGE_SEED,
            temperatures: [0.0; SENSORS_PER_MODULE],
            temperature_extremes: Extremes::TEMPERATURE_SEED,
            alerts: 0,
            faults: 0,
            cov_faults: 0,
            cuv_faults: 0,
            freshness: Freshness::Never,
        }
    }

    /// Drops all readings and extremes, keeping the address.
    pub fn clear(&mut self) {
        *self = Self::new(self.address);
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    pub fn set_status(&mut self, status: [u8; 4]) {
        [self.alerts, self.faults, self.cov_faults, self.cuv_faults] = status;
    }

    pub fn has_faults(&self) -> bool {
        self.faults != 0 || self.cov_faults != 0 || self.cuv_faults != 0
    }

    pub fn update_measured_voltage(&mut self, volts: f32) {
        self.measured_voltage = volts;
        self.measured_voltage_extremes.fold(volts);
    }

    pub fn update_cells(&mut self, volts: [f32; CELLS_PER_MODULE]) {
        for (i, v) in volts.into_iter().enumerate() {
            self.cell_voltages[i] = v;
            self.cell_extremes[i].fold(v);
        }
        self.module_voltage = volts.iter().sum();
    }

    pub fn update_temperatures(&mut self, temperatures: [f32; SENSORS_PER_MODULE]) {
        self.temperatures = temperatures;
        for t in temperatures {
            self.temperature_extremes.fold(t);
        }
    }

    pub fn lowest_cell_voltage(&self) -> f32 {
        self.cell_voltages.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn highest_cell_voltage(&self) -> f32 {
        self.cell_voltages
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max)
    }
}
