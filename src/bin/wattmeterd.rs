// Smart meter gateway daemon
// SPDX-License-Identifier: MPL-2.0
//
use anyhow::{Context, bail};
use chrono::Local;
use clap::Parser;
use cron::Schedule;
use rust_decimal::Decimal;
use std::net::Ipv6Addr;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing_subscriber::FmtSubscriber;
use wattmeter::config::Config;
use wattmeter::discovery;
use wattmeter::echonetlite::smart_meter::{
    self, CLASS_CONTROLLER, CLASS_SMART_METER, EnergyUnit, epc,
};
use wattmeter::echonetlite::{EchonetObject, Frame, TidSource, esv};
use wattmeter::sink::TimeSeriesSink;
use wattmeter::skstack::{Command, Condition, Controller, Event, EventKind, PanDesc, Response};

/// Wi-SUN route B gateway: joins the meter's PAN and forwards power
/// readings to the time-series database.
#[derive(Parser, Debug)]
#[command(name = "wattmeterd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "wattmeter.toml")]
    config: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wattmeterd: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.logger.tracing_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let tty = discovery::find_tty()?;
    tracing::info!("smart meter gateway on {tty}");
    let ctrl = Controller::open(&tty)?;
    let tids = TidSource::new();

    checked(
        "SKSETPWD",
        ctrl.send(Command::SetPwd { pwd: config.routeb.password.clone() }).await?,
    )?;
    checked("SKSETRBID", ctrl.send(Command::SetRbId { rbid: config.routeb.id.clone() }).await?)?;

    let pan = scan_for_pan(&ctrl).await?;
    tracing::info!(
        "found PAN channel={:02X} pan_id={:04X} addr={}",
        pan.channel,
        pan.pan_id,
        pan.addr
    );

    checked(
        "SKSREG S2",
        ctrl.send(Command::Sreg { reg: 2, val: format!("{:02X}", pan.channel) }).await?,
    )?;
    checked(
        "SKSREG S3",
        ctrl.send(Command::Sreg { reg: 3, val: format!("{:04X}", pan.pan_id) }).await?,
    )?;

    let addr = link_local_address(&ctrl, &pan.addr).await?;
    let instance = join(&ctrl, addr).await?;
    tracing::info!("smart meter instance {instance} at {addr}");

    let unit = read_energy_unit(&ctrl, &tids, addr, instance).await?;
    tracing::info!("cumulative energy unit {} kWh", unit.0);

    let sink = TimeSeriesSink::connect(&config.database.host, config.database.port)
        .context("connect time-series sink")?;
    register_forwarder(&ctrl, sink, unit, instance);

    let historic = periodic_get(
        &ctrl,
        &tids,
        addr,
        instance,
        "5 */10 * * * *",
        epc::CUMULATIVE_ENERGY_AT_FIXED_TIME,
    );
    let instantaneous =
        periodic_get(&ctrl, &tids, addr, instance, "*/10 * * * * *", epc::INSTANTANEOUS_POWER);
    tokio::try_join!(historic, instantaneous)?;
    Ok(())
}

fn checked(what: &str, response: Response) -> anyhow::Result<Response> {
    match response {
        Response::Fail(code) => bail!("{what} failed: FAIL {code}"),
        other => Ok(other),
    }
}

/// Active scan, repeated until some PAN coordinator answers. EVENT 0x22
/// marks the end of one scan pass.
async fn scan_for_pan(ctrl: &Controller) -> anyhow::Result<PanDesc> {
    loop {
        let found: Arc<Mutex<Option<PanDesc>>> = Arc::default();
        let capture = Arc::clone(&found);
        let conditions: Vec<Condition> = vec![Box::new(move |event| match event {
            Event::PanDesc(desc) => {
                *capture.lock().unwrap() = Some(desc.clone());
                false
            }
            Event::Notification(n) => n.num == 0x22,
            _ => false,
        })];
        checked(
            "SKSCAN",
            ctrl.send_watching(
                Command::Scan { mode: 2, mask: 0xffff_ffff, duration: 6 },
                conditions,
            )
            .await?,
        )?;
        if let Some(desc) = found.lock().unwrap().take() {
            return Ok(desc);
        }
        tracing::info!("scan finished without a PAN descriptor, retrying");
    }
}

/// SKLL64 answers with the link-local address as a bare result line.
async fn link_local_address(ctrl: &Controller, hwaddr: &str) -> anyhow::Result<Ipv6Addr> {
    match ctrl.send(Command::Ll64 { hwaddr: hwaddr.to_string() }).await? {
        Response::Result(text) => {
            text.trim().parse().with_context(|| format!("SKLL64 returned {text:?}"))
        }
        other => bail!("SKLL64 failed: {other:?}"),
    }
}

/// PANA join, then wait for the node-profile INF advertising the meter
/// instance. EVENT 0x24/0x25 close the authentication exchange either way.
async fn join(ctrl: &Controller, addr: Ipv6Addr) -> anyhow::Result<u8> {
    let notified: Arc<Mutex<Option<Frame>>> = Arc::default();
    let capture = Arc::clone(&notified);
    let conditions: Vec<Condition> = vec![
        Box::new(|event| {
            matches!(event, Event::Notification(n) if n.num == 0x24 || n.num == 0x25)
        }),
        Box::new(move |event| {
            let Event::RxUdp(rx) = event else { return false };
            match Frame::from_bytes(&rx.data) {
                Ok(frame) if frame.esv == esv::INF => {
                    *capture.lock().unwrap() = Some(frame);
                    true
                }
                _ => false,
            }
        }),
    ];
    checked("SKJOIN", ctrl.send_watching(Command::Join { ipaddr: addr }, conditions).await?)?;
    let frame =
        notified.lock().unwrap().take().context("no instance list notification received")?;
    smart_meter::meter_instance(&frame).context("no smart meter instance advertised")
}

async fn read_energy_unit(
    ctrl: &Controller,
    tids: &TidSource,
    addr: Ipv6Addr,
    instance: u8,
) -> anyhow::Result<EnergyUnit> {
    let unit: Arc<Mutex<Option<EnergyUnit>>> = Arc::default();
    let capture = Arc::clone(&unit);
    let frame = Frame::get(
        tids.next(),
        EchonetObject::new(CLASS_CONTROLLER, 1),
        EchonetObject::new(CLASS_SMART_METER, instance),
        &[epc::CUMULATIVE_ENERGY_UNIT],
    );
    let conditions: Vec<Condition> = vec![Box::new(move |event| {
        let Event::RxUdp(rx) = event else { return false };
        let Ok(reply) = Frame::from_bytes(&rx.data) else { return false };
        if reply.seoj.class == CLASS_SMART_METER
            && reply.seoj.instance == instance
            && reply.esv == esv::GET_RES
        {
            if let Some(found) = reply.props.first().and_then(|p| EnergyUnit::from_edt(&p.edt)) {
                *capture.lock().unwrap() = Some(found);
                return true;
            }
        }
        false
    })];
    checked(
        "SKSENDTO",
        ctrl.send_watching(
            Command::SendTo {
                handle: 1,
                ipaddr: addr,
                port: smart_meter::UDP_PORT,
                sec: 1,
                data: frame.to_bytes()?,
            },
            conditions,
        )
        .await?,
    )?;
    unit.lock().unwrap().take().context("cumulative energy unit not reported")
}

/// Forward every GET response from the meter to the sink. Payloads that do
/// not decode are dropped here; the dispatcher must survive them.
fn register_forwarder(ctrl: &Controller, sink: TimeSeriesSink, unit: EnergyUnit, instance: u8) {
    ctrl.register_handler(EventKind::RxUdp, move |event| {
        let Event::RxUdp(rx) = event else { return };
        let frame = match Frame::from_bytes(&rx.data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("dropping datagram: {e}");
                return;
            }
        };
        if frame.seoj.class != CLASS_SMART_METER
            || frame.seoj.instance != instance
            || frame.esv != esv::GET_RES
        {
            return;
        }
        for prop in &frame.props {
            match prop.epc {
                epc::CUMULATIVE_ENERGY_AT_FIXED_TIME => {
                    match smart_meter::cumulative_at_fixed_time(&prop.edt) {
                        Some(m) => {
                            let kwh = unit.0 * Decimal::from(m.raw);
                            if let Err(e) = sink.watt_hour(m.measured_at, kwh) {
                                tracing::error!("sink write failed: {e}");
                            }
                        }
                        None => tracing::warn!("dropping cumulative energy reading: bad payload"),
                    }
                }
                epc::INSTANTANEOUS_POWER => match smart_meter::instantaneous_power(&prop.edt) {
                    Some(watt) => {
                        if let Err(e) = sink.watt(watt) {
                            tracing::error!("sink write failed: {e}");
                        }
                    }
                    None => tracing::warn!("dropping instantaneous power reading: bad payload"),
                },
                _ => {}
            }
        }
    });
}

/// Issue one GET per schedule tick, forever. The answers come back as
/// ERXUDP events and go through the registered forwarder.
async fn periodic_get(
    ctrl: &Controller,
    tids: &TidSource,
    addr: Ipv6Addr,
    instance: u8,
    schedule: &str,
    epc: u8,
) -> anyhow::Result<()> {
    let schedule = Schedule::from_str(schedule)?;
    for next in schedule.upcoming(Local) {
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        tracing::trace!("next read of EPC {epc:#04x} at {next}, sleeping {wait:?}");
        tokio::time::sleep(wait).await;
        let frame = Frame::get(
            tids.next(),
            EchonetObject::new(CLASS_CONTROLLER, 1),
            EchonetObject::new(CLASS_SMART_METER, instance),
            &[epc],
        );
        let request = Command::SendTo {
            handle: 1,
            ipaddr: addr,
            port: smart_meter::UDP_PORT,
            sec: 1,
            data: frame.to_bytes()?,
        };
        if let Response::Fail(code) = ctrl.send(request).await? {
            tracing::warn!("periodic read refused: FAIL {code}");
        }
    }
    Ok(())
}
