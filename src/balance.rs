//! Selection of the cells to bleed down.
//!
//! Every cell more than a tolerance above the lowest cell of the pack gets
//! its balancing resistor switched on. Decisions are batched per module into
//! one 6-bit mask and taken from a single snapshot of the voltages.

use crate::protocol::CELLS_PER_MODULE;

/// Anything within this many volts of the lowest cell is left alone.
pub const DEFAULT_TOLERANCE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCommand {
    pub address: u8,
    /// Bit `k` selects cell `k + 1`.
    pub mask: u8,
}

/// Builds the balancing mask of one module.
pub fn cell_mask(cells: &[f32; CELLS_PER_MODULE], threshold: f32) -> u8 {
    cells
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v > threshold)
        .fold(0u8, |mask, (cell, _)| mask | (1u8 << cell))
}

/// Plans balancing for `modules`, given as `(address, cell voltages)` in
/// address order. Modules without any cell above the threshold get no command.
pub fn plan(modules: &[(u8, [f32; CELLS_PER_MODULE])], tolerance: f32) -> Vec<BalanceCommand> {
    let Some(lowest) = modules
        .iter()
        .flat_map(|(_, cells)| cells.iter().copied())
        .reduce(f32::min)
    else {
        return Vec::new();
    };
    let threshold = lowest + tolerance;
    log::debug!("Lowest cell {:.4}V, balancing above {:.4}V", lowest, threshold);

    modules
        .iter()
        .map(|(address, cells)| BalanceCommand {
            address: *address,
            mask: cell_mask(cells, threshold),
        })
        .filter(|command| command.mask != 0)
        .collect()
}
