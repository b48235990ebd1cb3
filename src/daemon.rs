use anyhow::Result;
use log::{error, info};
use serde::Serialize;
use teslabms_lib::module::ModuleRecord;
use teslabms_lib::pack::{PackAggregate, PackManager, PollReport};
use teslabms_lib::transport::Transport;

use crate::commandline::OutputFormat;

#[derive(Debug, Serialize)]
struct FailureView {
    address: u8,
    error: String,
}

#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    timestamp: String,
    modules: &'a [ModuleRecord],
    aggregate: &'a PackAggregate,
    failures: Vec<FailureView>,
}

pub fn print_report(modules: &[ModuleRecord], report: &PollReport, format: OutputFormat) -> Result<()> {
    let snapshot = Snapshot {
        timestamp: chrono::Local::now().to_rfc3339(),
        modules,
        aggregate: &report.aggregate,
        failures: report
            .failures
            .iter()
            .map(|f| FailureView {
                address: f.address,
                error: f.error.to_string(),
            })
            .collect(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&snapshot)?),
        OutputFormat::Debug => {
            println!("--- Data at {} ---", snapshot.timestamp);
            for module in snapshot.modules {
                println!("Module {}: {:?}", module.address, module);
            }
            println!("Pack: {:?}", snapshot.aggregate);
            for failure in &snapshot.failures {
                println!("Module {} failed: {}", failure.address, failure.error);
            }
            println!("--------------------------");
        }
    }
    Ok(())
}

pub fn run<T: Transport>(
    mut pack: PackManager<T>,
    interval: std::time::Duration,
    balance: Option<u8>,
    format: OutputFormat,
) -> Result<()> {
    info!("Starting daemon mode: interval={interval:?}, balance={balance:?}, format={format:?}");
    loop {
        match pack.read_all_volt_temp() {
            Ok(report) => {
                print_report(pack.modules(), &report, format)?;
                if let Some(duration) = balance {
                    match pack.balance_cells(duration) {
                        Ok(commands) => info!("Balancing {} modules", commands.len()),
                        Err(e) => error!("Error balancing cells: {e}"),
                    }
                }
            }
            Err(e) => error!("Error reading pack: {e}"),
        }
        std::thread::sleep(interval);
    }
}
