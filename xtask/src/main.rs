// Host tooling: unwrap/expect/panic are acceptable outside the firmware.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod check;
mod doc;
mod flash;
mod test;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// Cross target of both core images.
pub const TARGET: &str = "thumbv7em-none-eabihf";

/// probe-rs chip name of the STM32H745.
pub const CHIP: &str = "STM32H745ZITx";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Titan flight computer development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which core image to act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Core {
    /// Cortex-M7 application core.
    Cm7,
    /// Cortex-M4 auxiliary core.
    Cm4,
    /// Both images, core B first.
    Both,
}

impl Core {
    /// Binary names to build and flash, in flashing order.
    pub fn binaries(self) -> &'static [&'static str] {
        match self {
            Self::Cm7 => &["titan-cm7"],
            Self::Cm4 => &["titan-cm4"],
            Self::Both => &["titan-cm4", "titan-cm7"],
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build and flash the core images via probe-rs
    Flash {
        /// Build and flash release version
        #[arg(short, long)]
        release: bool,
        /// Image(s) to flash
        #[arg(long, value_enum, default_value = "both")]
        core: Core,
    },
    /// Check the target images, the no_std platform crate, clippy and fmt
    Check,
    /// Run host tests (unit, integration and doc)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
        /// Run a single integration binary (e.g. rpc_scenarios)
        #[arg(long)]
        scenario: Option<String>,
    },
    /// Build and optionally open documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Flash { release, core } => flash::run(release, core),
        Commands::Check => check::run(),
        Commands::Test {
            unit,
            integration,
            scenario,
        } => test::run(unit, integration, scenario.as_deref()),
        Commands::Doc { open } => doc::run(open),
    }
}
