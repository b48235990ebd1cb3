//! Register sequences for a single module.
//!
//! Bus errors are returned unchanged; whether a failed module is retried or
//! skipped is up to the caller.

use crate::bus::BusClient;
use crate::error::Result;
use crate::module::{Freshness, ModuleRecord};
use crate::protocol::*;
use crate::transport::Transport;

/// Auto mode, all inputs: both temperatures, module voltage and six cells.
const ADC_CTRL_ALL_CHANNELS: u8 = 0x3D;
/// Enables the VSS pins of the temperature dividers.
const IO_CTRL_TEMP_SENSE: u8 = 0x03;
const ADC_CONV_START: u8 = 0x01;

/// Reads alert, fault, COV fault and CUV fault registers.
pub fn read_status<T: Transport>(bus: &mut BusClient<T>, module: &mut ModuleRecord) -> Result<()> {
    let rx_buffer = bus.read(module.address, REG_ALERT_STATUS, STATUS_BLOCK_LENGTH)?;
    validate_len(
        module.address,
        REG_ALERT_STATUS,
        &rx_buffer,
        reply_size(STATUS_BLOCK_LENGTH),
    )?;
    module.set_status([rx_buffer[3], rx_buffer[4], rx_buffer[5], rx_buffer[6]]);
    log::debug!(
        "Module {} alerts={:02X} faults={:02X} COV={:02X} CUV={:02X}",
        module.address,
        module.alerts,
        module.faults,
        module.cov_faults,
        module.cuv_faults
    );
    Ok(())
}

/// Triggers a conversion of every ADC input and decodes the results into
/// `module`.
pub fn read_voltage_and_temperature<T: Transport>(
    bus: &mut BusClient<T>,
    module: &mut ModuleRecord,
) -> Result<()> {
    let address = module.address;
    read_status(bus, module)?;

    bus.write(address, REG_ADC_CTRL, ADC_CTRL_ALL_CHANNELS)?;
    bus.write(address, REG_IO_CTRL, IO_CTRL_TEMP_SENSE)?;
    bus.write(address, REG_ADC_CONV, ADC_CONV_START)?;

    let rx_buffer = bus.read(address, REG_GPAI, ADC_BLOCK_LENGTH)?;
    validate_len(address, REG_GPAI, &rx_buffer, reply_size(ADC_BLOCK_LENGTH))?;

    // Convert all values first so a bad sensor leaves the record untouched.
    let payload = &rx_buffer[ECHO_LENGTH..];
    let measured = module_voltage(read_u16(payload, 0));
    let mut cells = [0.0; CELLS_PER_MODULE];
    for (i, cell) in cells.iter_mut().enumerate() {
        *cell = cell_voltage(read_u16(payload, 2 + i * 2));
    }
    let mut temperatures = [0.0; SENSORS_PER_MODULE];
    for (i, sensor) in Thermistor::ALL.into_iter().enumerate() {
        temperatures[i] = thermistor_temperature(read_u16(payload, 14 + i * 2), sensor)?;
    }

    module.update_measured_voltage(measured);
    module.update_cells(cells);
    module.update_temperatures(temperatures);
    module.freshness = Freshness::Fresh;

    log::debug!(
        "Module {} voltage={:.3}V measured={:.3}V cells={:.3?} temperatures={:.1?}",
        address,
        module.module_voltage,
        module.measured_voltage,
        module.cell_voltages,
        module.temperatures
    );
    Ok(())
}

/// Switches off the balancing resistors of one module.
pub fn stop_balancing<T: Transport>(bus: &mut BusClient<T>, module: &ModuleRecord) -> Result<()> {
    bus.write(module.address, REG_BAL_CTRL, 0x00)?;
    Ok(())
}
