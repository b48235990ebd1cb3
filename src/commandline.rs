use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Debug,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Reset all modules and assign bus addresses in chain order
    Discover,
    /// Show alert and fault flags of every module
    Status,
    /// Read voltages and temperatures of every module once
    Poll {
        #[arg(long, value_enum, default_value_t = OutputFormat::Debug)]
        format: OutputFormat,
    },
    /// Read all modules, then bleed down every cell above the lowest cell plus tolerance
    Balance {
        /// Balancing time in seconds
        #[arg(long, short, default_value_t = 5)]
        duration: u8,
        #[arg(long, value_enum, default_value_t = OutputFormat::Debug)]
        format: OutputFormat,
    },
    /// Switch off all balancing resistors
    StopBalancing,
    /// Reset alert and fault flags on all modules
    ClearFaults,
    /// Put all modules to sleep
    Sleep,
    /// Wake all modules up
    Wake,
    /// Run in daemon mode, periodically reading the pack and printing a snapshot
    Daemon {
        /// Interval between poll cycles (e.g., "10s", "2m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "2m")]
        interval: Duration,
        /// Balance after every poll cycle for this many seconds
        #[clap(long, short)]
        balance: Option<u8>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Debug)]
        format: OutputFormat,
    },
}

const fn about_text() -> &'static str {
    "tesla battery module command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for reading a single byte from the serial port (e.g., "1s", "500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "1s")]
    pub timeout: Duration,

    /// Time to wait for module replies after each request (e.g., "100ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub settle_delay: Duration,

    /// YAML file overriding discovery and balancing settings
    #[arg(long, short)]
    pub config: Option<String>,
}
