//! mbsim - simulated ADK board
//!
//! Connects to a microbridge hub, streams a sweeping sensor value and
//! prints every LED command it receives.
//!
//! # Usage
//!
//! ```bash
//! mbsim --addr 127.0.0.1:4568 --interval-ms 200 --step 16
//! ```

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use microbridge_sim::{BoardSimulator, SimConfig, SimEvent};

/// Simulated ADK board for exercising a microbridge hub
#[derive(Parser, Debug)]
#[command(name = "mbsim", version, about)]
struct Args {
    /// Hub address as HOST:PORT
    #[arg(short, long, default_value = "127.0.0.1:4568")]
    addr: String,

    /// Milliseconds between two sensor samples
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,

    /// Step of the sensor sweep
    #[arg(short, long, default_value_t = 32)]
    step: u16,

    /// Print every sample sent
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("microbridge_sim=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = SimConfig {
        addr: args.addr,
        sample_interval: Duration::from_millis(args.interval_ms.max(1)),
        step: args.step,
        ..Default::default()
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();
    let simulator = BoardSimulator::new(config, event_tx, cancel_token.clone());
    let sim_task = tokio::spawn(simulator.run());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, disconnecting");
                cancel_token.cancel();
                break;
            }
            event = event_rx.recv() => match event {
                Some(event) => print_event(&event, args.verbose),
                None => break,
            },
        }
    }

    sim_task.await?;
    Ok(())
}

fn print_event(event: &SimEvent, verbose: bool) {
    match event {
        SimEvent::Connected { addr } => println!("connected to {addr}"),
        SimEvent::Disconnected { reason } => println!("disconnected: {reason}"),
        SimEvent::SampleSent(value) if verbose => println!("sample {}", value.raw()),
        SimEvent::SampleSent(_) => {}
        SimEvent::LedChanged(state) => println!("LED {state}"),
        SimEvent::InvalidCommand { byte } => println!("invalid command byte {byte:#04x}"),
    }
}
