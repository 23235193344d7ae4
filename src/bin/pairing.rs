// Commissioning aid: scan for the smart meter's PAN and print what answers
// SPDX-License-Identifier: MPL-2.0
//
use anyhow::bail;
use clap::Parser;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::FmtSubscriber;
use wattmeter::discovery;
use wattmeter::skstack::{Command, Condition, Controller, Event, PanDesc, Response};

/// Run one active scan with the given route B credentials and list every
/// PAN coordinator that answered.
#[derive(Parser, Debug)]
#[command(name = "pairing")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Route B ID (32 characters)
    #[arg(long)]
    id: String,

    /// Route B password (12 characters)
    #[arg(long)]
    password: String,

    /// Serial device; discovered by USB product string when omitted
    #[arg(short = 'D', long)]
    device: Option<String>,

    /// Scan duration per channel (1-14)
    #[arg(short = 'T', long, default_value_t = 6)]
    duration: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder().with_max_level(tracing::Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pairing: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let tty = match cli.device {
        Some(device) => device,
        None => discovery::find_tty()?,
    };
    tracing::info!("scanning via {tty}");
    let ctrl = Controller::open(&tty)?;

    checked("SKSETPWD", ctrl.send(Command::SetPwd { pwd: cli.password }).await?)?;
    checked("SKSETRBID", ctrl.send(Command::SetRbId { rbid: cli.id }).await?)?;

    let found: Arc<Mutex<Vec<PanDesc>>> = Arc::default();
    let capture = Arc::clone(&found);
    let conditions: Vec<Condition> = vec![Box::new(move |event| match event {
        Event::PanDesc(desc) => {
            capture.lock().unwrap().push(desc.clone());
            false
        }
        Event::Notification(n) => n.num == 0x22,
        _ => false,
    })];
    checked(
        "SKSCAN",
        ctrl.send_watching(
            Command::Scan { mode: 2, mask: 0xffff_ffff, duration: cli.duration },
            conditions,
        )
        .await?,
    )?;

    let found = found.lock().unwrap();
    if found.is_empty() {
        println!("No PAN coordinator answered; is the meter in range?");
        return Ok(());
    }
    for desc in found.iter() {
        println!(
            "channel={:02X} pan_id={:04X} addr={} lqi={:02X} pair_id={}",
            desc.channel, desc.pan_id, desc.addr, desc.lqi, desc.pair_id
        );
    }
    Ok(())
}

fn checked(what: &str, response: Response) -> anyhow::Result<Response> {
    match response {
        Response::Fail(code) => bail!("{what} failed: FAIL {code}"),
        other => Ok(other),
    }
}
