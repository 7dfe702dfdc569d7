//! Write one DACL row of a module to the XPAD detector RAM and load it back.
//!
//! The row is sent with `SaveConfigL` as `[module, calib, chip, row, 80 values]`
//! and the calibration slot is then loaded with `LoadConfig [module, calib]`.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use xpad::cli::{ConnectionArgs, DaclArgs};
use xpad::routines::{ping_report, save_dacl};
use xpad::{DevResult, FailureReport, TcpDeviceProxy, XpadDevice};

#[derive(Parser, Debug)]
#[command(name = "save_config_l_test")]
#[command(about = "Save a DACL row with SaveConfigL and load it with LoadConfig")]
#[command(version)]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,

    /// XPAD specific device
    #[arg(long, default_value = "det/xpad/xpad.1")]
    device: String,

    #[command(flatten)]
    dacl: DaclArgs,
}

fn run(args: &Args) -> DevResult<()> {
    let mut proxy = TcpDeviceProxy::connect_with(&args.device, &args.conn.proxy_config())?;
    println!("===============================================");
    println!("{}", ping_report("xpad", &mut proxy)?);

    let row = args.dacl.save_config_l();
    info!(
        "SaveConfigL module {} calib {} chip {} row {} value {}",
        row.module, row.calib_id, row.chip, row.row, args.dacl.value
    );

    let mut xpad = XpadDevice::new(proxy);
    save_dacl(&mut xpad, &row, args.dacl.load_config())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Err(failure) = run(&args) {
        print!("{}", FailureReport(&failure));
        bail!(failure);
    }

    info!("Done!");
    Ok(())
}
