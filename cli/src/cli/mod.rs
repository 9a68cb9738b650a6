/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod commands;
mod common;
mod helpers;
mod macros;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use clap::{CommandFactory, Parser};
use clap_num::maybe_hex;
use log::{info, warn};
use mtkflash::{ConnectionType, Device, DeviceBuilder, SerialMTKPort};

use crate::cli::commands::*;
use crate::cli::macros::mtk_commands;
use crate::images::CliImages;
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Enable verbose logging, including debug information
    #[arg(short, long)]
    pub verbose: bool,
    /// Serial port the device shows up on (e.g. /dev/ttyACM0, COM5)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<String>,
    #[arg(short, long)]
    pub baudrate: Option<u32>,
    /// The DA file to use
    #[arg(short, long = "da", value_name = "DA_FILE")]
    pub da_file: Option<PathBuf>,
    /// Payload uploaded to the BROM before the DA
    #[arg(long, value_name = "PAYLOAD_FILE")]
    pub payload: Option<PathBuf>,
    /// Load and entry address of the payload
    #[arg(long, value_parser = maybe_hex::<u32>)]
    pub payload_addr: Option<u32>,
    /// Settings file instead of the one in the config directory
    #[arg(long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
    /// Reboot the device instead of shutting it down when done
    #[arg(long)]
    pub reboot: bool,
    /// Print the effective settings as TOML and exit
    #[arg(long)]
    pub print_settings: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl CliArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = &self.port {
            settings.port = Some(port.clone());
        }
        if let Some(baudrate) = self.baudrate {
            settings.baudrate = baudrate;
        }
        if let Some(da) = &self.da_file {
            settings.da = Some(da.clone());
        }
        if let Some(payload) = &self.payload {
            settings.payload = Some(payload.clone());
        }
        if let Some(addr) = self.payload_addr {
            settings.payload_addr = addr;
        }
    }
}

mtk_commands! {
    Info(InfoArgs),
    Pgpt(PgptArgs),
    Read(ReadArgs),
    Write(WriteArgs),
    Erase(EraseArgs),
    Verify(VerifyArgs),
    Peek(PeekArgs),
}

#[async_trait]
pub trait MtkCommand {
    /// Whether the command needs the device to run a DA. Commands that
    /// don't stay in BROM or Preloader.
    fn needs_da(&self) -> bool {
        true
    }
    async fn run(&self, dev: &mut Device) -> Result<()>;
}

pub async fn run_cli(args: &CliArgs) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    if args.print_settings {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    let Some(cmd) = &args.command else {
        CliArgs::command().print_help()?;
        return Ok(());
    };

    let port_name = settings
        .port
        .clone()
        .ok_or_else(|| anyhow!("No port given, pass --port or set `port` in the settings"))?;
    let port = SerialMTKPort::new(port_name.as_str(), settings.baudrate, ConnectionType::Brom);

    let mut builder =
        DeviceBuilder::default().with_mtk_port(Box::new(port)).with_timeouts(settings.timeouts());
    if cmd.needs_da() {
        builder = builder.with_images(Arc::new(CliImages::load(&settings).await?));
    }
    let mut dev = builder.build()?;

    info!("Waiting for MTK device on {}...", port_name);
    dev.connect().await?;

    if let Some(chip) = dev.chip_info() {
        info!("=====================================");
        info!("SBC: {}", chip.sbc_enabled());
        info!("SLA: {}", chip.sla_enabled());
        info!("DAA: {}", chip.daa_enabled());
        info!("=====================================");
    }

    // Ctrl-C stops writes and erases between chunks
    let cancel = dev.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current chunk");
            cancel.cancel();
        }
    });

    let res = cmd.run(&mut dev).await;
    watcher.abort();

    if let Err(e) = dev.disconnect(args.reboot).await {
        warn!("Failed to disconnect cleanly: {}", e);
    }
    res
}
