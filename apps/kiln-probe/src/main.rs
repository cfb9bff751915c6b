//! Kiln device probe
//!
//! Opens a window, selects a GPU, creates the logical device and a command
//! session, submits one empty batch and reports what was chosen.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p kiln-probe -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--no-validation`: Disable Vulkan validation layers
//! - `--allow-no-float64`: Accept devices without double-precision shaders
//! - `--buffers <N>`: Command buffers to allocate and submit (default: 1)
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod probe;

use tracing_subscriber::EnvFilter;

use crate::probe::{run_probe, ProbeConfig};

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProbeConfig::from_args(std::env::args().skip(1))?;
    run_probe(config)
}

fn print_help() {
    eprintln!(
        "Kiln device probe

USAGE:
    kiln-probe [OPTIONS]

OPTIONS:
    --no-validation       Disable Vulkan validation layers
    --allow-no-float64    Accept devices without double-precision shaders
    --buffers <N>         Command buffers to allocate and submit (default: 1)
    -h, --help            Print this help message

ENVIRONMENT:
    RUST_LOG              Log level (e.g., info, debug, trace)"
    );
}
