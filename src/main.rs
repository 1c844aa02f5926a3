//! DCS-BIOS bridge - multicast UDP <-> serial panels
//!
//! Usage:
//!   dcsb-bridge --serial /dev/ttyUSB0           Bridge one panel
//!   dcsb-bridge --config cockpit.toml           Bridge what the config lists
//!   dcsb-bridge --pty /tmp/dcsbios --text       Virtual panel on a PTY
//!   dcsb-bridge list                            List serial ports

use clap::Parser;
use dcs_bios_bridge::cli::{Cli, Command};
use dcs_bios_bridge::input::{source, IndicatorSet, InputRouter, LogOutput, Mapping};
use dcs_bios_bridge::protocol::MessageParser;
use dcs_bios_bridge::transport::serial::{describe, SerialTransport};
use dcs_bios_bridge::{config, logging, Bridge, BridgeError, Result};
use parking_lot::Mutex;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Bridge setup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.command == Some(Command::List) {
        list_ports();
        return Ok(());
    }

    let mut config = config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    if cli.command == Some(Command::ShowConfig) {
        match toml::to_string_pretty(&config) {
            Ok(text) => println!("{}", text),
            Err(e) => warn!(error = %e, "Cannot render config"),
        }
        return Ok(());
    }

    let mapping = match &config.inputs.mapping {
        Some(path) => Mapping::load(path)?,
        None => Mapping::default(),
    };

    let mut parser = MessageParser::new();
    for pattern in &cli.watch {
        parser.register_handler(pattern, |msg| {
            info!(name = %msg.name, value = %msg.value, "Watched message");
            Ok(())
        })?;
    }
    if !mapping.outputs.is_empty() {
        IndicatorSet::new(mapping.outputs.clone(), LogOutput::new()).attach(&mut parser)?;
    }
    if parser.handler_count() > 0 && !config.bridge.parse_text {
        info!("Text handlers registered, enabling text parsing");
        config.bridge.parse_text = true;
    }
    let parser = Arc::new(Mutex::new(parser));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Runtime { source: e })?;

    let inputs_done = Arc::new(AtomicBool::new(false));
    let handle = runtime.block_on(async {
        let handle = Bridge::new(config.clone()).with_parser(parser).start()?;

        let router = InputRouter::new(&mapping.inputs);
        if config.inputs.stdin {
            // Not joined: the thread may sit in a blocking stdin read
            source::spawn_stdin(router, handle.command_sink(), inputs_done.clone())
                .map_err(|e| BridgeError::Runtime { source: e })?;
            info!("Reading input events from stdin");
        } else if !router.is_empty() {
            info!(commands = router.len(), "Inputs mapped but no input source enabled (--stdin-inputs)");
        }

        wait_for_shutdown().await;
        Ok::<_, BridgeError>(handle)
    })?;

    inputs_done.store(true, Ordering::SeqCst);
    handle.stop();
    Ok(())
}

fn list_ports() {
    let ports = SerialTransport::available();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        println!("{}", describe(port));
    }
}

/// Wait for SIGINT/SIGTERM (Ctrl-C elsewhere)
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
                return;
            }
            _ => warn!("Cannot install signal handlers, falling back to Ctrl-C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
