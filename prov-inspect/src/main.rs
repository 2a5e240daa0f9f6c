//! Provisioning data inspector
//!
//! For debugging only: prints the provisioning files a device app leaves in
//! its working directory.

use anyhow::Context;
use clap::Parser;
use std::fmt::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use stdevice_shared::provisioning::ProvisioningData;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "stprov", version, about)]
struct Args {
    /// Location of the provisioning data files (where the device app was run)
    #[arg(default_value = "./")]
    directory: PathBuf,

    /// Print the access point password instead of masking it
    #[arg(long)]
    show_secrets: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();

    let mut report = String::new();
    let result = inspect(&args, &mut report);
    // Whatever was read is shown, even when a file is missing
    print!("{}", report);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Render the provisioning data into `out`, then report why reading stopped
fn inspect(args: &Args, out: &mut String) -> anyhow::Result<()> {
    debug!("Reading provisioning data from {}", args.directory.display());
    let report = ProvisioningData::read(&args.directory);
    out.push_str(&render(&report.data, args.show_secrets));

    match report.error {
        None => Ok(()),
        Some(e) => {
            Err(e).with_context(|| format!("Using directory: {}", args.directory.display()))
        }
    }
}

fn render(data: &ProvisioningData, show_secrets: bool) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_report(&mut out, data, show_secrets);
    out
}

fn write_report(
    out: &mut String,
    data: &ProvisioningData,
    show_secrets: bool,
) -> std::fmt::Result {
    let Some(status) = &data.wifi_status else {
        return Ok(());
    };
    writeln!(out, "\tWifi Provisioning Status...{}", status)?;

    if let Some(ssid) = &data.ssid {
        writeln!(out, "\t\tSSID = {}", ssid)?;
    }
    if let Some(auth) = data.auth {
        writeln!(out, "\t\tAuthorization type: {}", auth)?;
    }
    if let Some(password) = &data.password {
        if show_secrets {
            writeln!(out, "\t\tPassword = {}", password)?;
        } else {
            writeln!(out, "\t\tPassword = {}", "*".repeat(password.len()))?;
        }
    }
    if let Some(bssid) = data.bssid {
        writeln!(out, "\t\tMac Address:  {}", bssid)?;
    }

    if let Some(status) = &data.cloud_status {
        writeln!(out, "\n\tCloud Provisioning Status...{}", status)?;
    }
    if let Some(url) = &data.server_url {
        writeln!(out, "\t\tST Server URL = {}", url)?;
    }
    if let Some(port) = &data.server_port {
        writeln!(out, "\t\tST Server Port = {}", port)?;
    }
    if let Some(device_id) = &data.device_id {
        writeln!(out, "\n\tDevice ID = {}", device_id)?;
    }
    if let Some(label) = &data.label {
        writeln!(out, "\tLabel = {}", label)?;
    }
    writeln!(out)
}
