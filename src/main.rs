use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rwc_nst::nst::nst_cmd::{self, CommandStatus};
use rwc_nst::nst::nst_console::Console;
use rwc_nst::nst::sim::{SimGpio, SimRadio};
use rwc_nst::nst::{Nst, NstTest, State, TestParameters};

#[derive(Parser)]
#[command(name = "rwc-nst")]
#[command(about = "Radio timing test controller on a simulated bench")]
struct Cli {
    /// JSON file with initial test parameters
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective parameters as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Serial port for the operator console (default: stdin/stdout)
    #[arg(short, long)]
    port: Option<String>,

    /// Probability that a received frame is dropped
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Drive this input pin with a square wave, as an external trigger
    #[arg(long)]
    trigger_pin: Option<u8>,

    #[arg(long, default_value_t = 1000)]
    trigger_period_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let params = match &cli.config {
        Some(path) => TestParameters::from_json_file(path)?,
        None => TestParameters::default(),
    };
    if cli.dump_config {
        println!("{}", params.to_json()?);
        return Ok(());
    }

    /* nothing inspects the bench logs here */
    let radio = SimRadio::with_wall_clock().with_loss(cli.loss).with_log_limit(0);
    let mut nst = Nst::new(radio, SimGpio::new().with_log_limit(0), params);
    nst.begin();

    let mut console = match &cli.port {
        Some(port) => Console::open_serial(port)?,
        None => Console::open_stdin(),
    };
    info!("ready");

    let t0 = Instant::now();
    let half_period = (cli.trigger_period_ms / 2).max(1);
    loop {
        if let Some(line) = console.try_read_line() {
            let status = nst_cmd::dispatch(&mut nst, &line, &mut console)?;
            if status != CommandStatus::Success {
                writeln!(console, "{}", status)?;
            }
            console.flush()?;
        } else if console.is_closed() {
            warn!("console closed, stopping");
            nst.end();
        }

        if let Some(pin) = cli.trigger_pin {
            let phase = t0.elapsed().as_millis() as u64 / half_period;
            nst.gpio_mut().set_level(pin, phase % 2 == 0);
        }

        nst.poll();
        if nst.state() == State::Final {
            break;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    Ok(())
}
