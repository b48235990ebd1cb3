use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};
use teslabms_lib::bus::BusClient;
use teslabms_lib::pack::{PackManager, PackSettings};
use teslabms_lib::serialport::SerialTransport;

mod commandline;
mod config;
mod daemon;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn discover(pack: &mut PackManager<SerialTransport>) -> Result<Vec<u8>> {
    pack.auto_assign_module_addresses()
        .with_context(|| "Cannot assign module addresses")?;
    let addresses: Vec<u8> = pack.modules().iter().map(|m| m.address).collect();
    info!("Module addresses: {:?}", addresses);
    Ok(addresses)
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut settings = PackSettings::default();
    let mut settle_delay = args.settle_delay;
    if let Some(config_file) = &args.config {
        let config = config::PackConfig::load(config_file)?;
        config.apply(&mut settings);
        settle_delay = config.settle_delay().unwrap_or(settle_delay);
    }

    let transport = SerialTransport::new(&args.device, args.timeout)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    let mut bus = BusClient::new(transport);
    bus.set_settle_delay(settle_delay);
    let mut pack = PackManager::new(bus, settings);

    // broadcasts reach every module without addresses, so only the other
    // commands run discovery first
    match args.command {
        CliCommands::StopBalancing => pack
            .stop_balancing()
            .with_context(|| "Cannot stop balancing")?,
        CliCommands::ClearFaults => pack.clear_faults().with_context(|| "Cannot clear faults")?,
        CliCommands::Sleep => pack
            .sleep_boards()
            .with_context(|| "Cannot put boards to sleep")?,
        CliCommands::Wake => pack.wake_boards().with_context(|| "Cannot wake boards")?,
        CliCommands::Discover => {
            let addresses = discover(&mut pack)?;
            println!("Modules: {:?}", addresses);
        }
        CliCommands::Status => {
            discover(&mut pack)?;
            for failure in pack.read_all_status() {
                error!("Module {}: {}", failure.address, failure.error);
            }
            for module in pack.modules() {
                println!(
                    "Module {}: alerts={:02X} faults={:02X} COV={:02X} CUV={:02X}",
                    module.address,
                    module.alerts,
                    module.faults,
                    module.cov_faults,
                    module.cuv_faults
                );
            }
        }
        CliCommands::Poll { format } => {
            discover(&mut pack)?;
            let report = pack
                .read_all_volt_temp()
                .with_context(|| "Cannot read pack")?;
            daemon::print_report(pack.modules(), &report, format)?;
        }
        CliCommands::Balance { duration, format } => {
            discover(&mut pack)?;
            let report = pack
                .read_all_volt_temp()
                .with_context(|| "Cannot read pack")?;
            daemon::print_report(pack.modules(), &report, format)?;
            let commands = pack
                .balance_cells(duration)
                .with_context(|| "Cannot balance cells")?;
            for command in commands {
                println!(
                    "Balancing module {}: mask={:06b}",
                    command.address, command.mask
                );
            }
        }
        CliCommands::Daemon {
            interval,
            balance,
            format,
        } => {
            discover(&mut pack)?;
            daemon::run(pack, interval, balance, format)?
        }
    }

    Ok(())
}
