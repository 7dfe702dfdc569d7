//! Serve a simulated XPAD detector over TCP.
//!
//! Hosts the generic detector device and the model specific device on one
//! simulated camera, so `xpad_acq_test` and `save_config_l_test` can run
//! without hardware:
//!
//! ```text
//! xpad_sim_server --bind 127.0.0.1:10000 --model IMXPAD_S540
//! XPAD_HOST=127.0.0.1:10000 xpad_acq_test all
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use xpad_sim::config::{DEFAULT_BIND, GENERIC_DEVICE, SPECIFIC_ALIAS, SPECIFIC_DEVICE};
use xpad_sim::{DeviceServer, ServerConfig, XpadModel};

#[derive(Parser, Debug)]
#[command(name = "xpad_sim_server")]
#[command(about = "Simulated XPAD detector device server")]
#[command(version)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = DEFAULT_BIND)]
    bind: String,

    /// Detector model (BACKPLANE, HUB, IMXPAD_S70, IMXPAD_S140, IMXPAD_S340, IMXPAD_S540)
    #[arg(short, long, default_value = "IMXPAD_S540")]
    model: String,

    /// Ready modules mask, e.g. 0x0f; all fitted modules by default
    #[arg(long, value_parser = parse_mask)]
    modules: Option<u8>,

    /// Generic detector device name
    #[arg(long, default_value = GENERIC_DEVICE)]
    generic: String,

    /// Model specific device name
    #[arg(long, default_value = SPECIFIC_DEVICE)]
    specific: String,

    /// Extra names for the model specific device
    #[arg(long = "alias", default_value = SPECIFIC_ALIAS)]
    aliases: Vec<String>,
}

fn parse_mask(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid modules mask '{s}': {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let model = XpadModel::from_name(&args.model)?;

    let config = ServerConfig {
        bind: args.bind,
        model,
        generic_name: args.generic,
        specific_name: args.specific,
        specific_aliases: args.aliases,
        modules: args.modules,
    };
    info!("Starting simulated {} detector", config.model);

    let server = DeviceServer::bind(&config)
        .with_context(|| format!("Failed to start device server on {}", config.bind))?;
    server.run()?;
    Ok(())
}
