// SKSTACK asynchronous event lines
// SPDX-License-Identifier: MPL-2.0
//
use nom::Parser;
use nom::bytes::complete::{take_while1, take_while_m_n};
use nom::character::complete::{hex_digit1, space1};
use nom::combinator::{map, map_res, opt};
use nom::multi::many0;
use nom::sequence::preceded;
use std::net::Ipv6Addr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed line: {0:?}")]
pub struct MalformedLine(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub ipaddr: Ipv6Addr,
    pub hwaddr: String,
    pub channel: u8,
    pub pan_id: u16,
    pub addr16: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxUdp {
    pub sender: Ipv6Addr,
    pub dest: Ipv6Addr,
    pub rport: u16,
    pub lport: u16,
    pub sender_lla: String,
    pub secured: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxTcp {
    pub sender: Ipv6Addr,
    pub rport: u16,
    pub lport: u16,
    pub sender_lla: String,
    pub data: Vec<u8>,
}

/// ETCP carries the remote endpoint only while the connection is not
/// established (status != 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpNotice {
    pub status: u8,
    pub handle: u8,
    pub ipaddr: Option<Ipv6Addr>,
    pub rport: Option<u16>,
    pub lport: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub ipaddr: Ipv6Addr,
    pub hwaddr: String,
    pub addr16: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanDesc {
    pub channel: u8,
    pub page: u8,
    pub pan_id: u16,
    pub addr: String,
    pub lqi: u8,
    pub pair_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdLevel {
    pub channel: u8,
    pub rssi: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ports {
    pub udp: [u16; 6],
    pub tcp: [u16; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHandle {
    pub handle: u8,
    pub ipaddr: Ipv6Addr,
    pub rport: u16,
    pub lport: u16,
}

/// EVENT xx lines; the parameter byte string is only present for 0x21.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub num: u8,
    pub sender: Ipv6Addr,
    pub param: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sreg { val: String },
    Info(Info),
    Ver { version: String },
    AppVer { version: String },
    RxUdp(RxUdp),
    RxTcp(RxTcp),
    Pong { sender: Ipv6Addr },
    Tcp(TcpNotice),
    Addr(Vec<Ipv6Addr>),
    Neighbor(Vec<Neighbor>),
    PanDesc(PanDesc),
    EdScan(Vec<EdLevel>),
    Port(Ports),
    Handle(Vec<TcpHandle>),
    Notification(Notification),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Sreg,
    Info,
    Ver,
    AppVer,
    RxUdp,
    RxTcp,
    Pong,
    Tcp,
    Addr,
    Neighbor,
    PanDesc,
    EdScan,
    Port,
    Handle,
    Notification,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Sreg { .. } => EventKind::Sreg,
            Event::Info(_) => EventKind::Info,
            Event::Ver { .. } => EventKind::Ver,
            Event::AppVer { .. } => EventKind::AppVer,
            Event::RxUdp(_) => EventKind::RxUdp,
            Event::RxTcp(_) => EventKind::RxTcp,
            Event::Pong { .. } => EventKind::Pong,
            Event::Tcp(_) => EventKind::Tcp,
            Event::Addr(_) => EventKind::Addr,
            Event::Neighbor(_) => EventKind::Neighbor,
            Event::PanDesc(_) => EventKind::PanDesc,
            Event::EdScan(_) => EventKind::EdScan,
            Event::Port(_) => EventKind::Port,
            Event::Handle(_) => EventKind::Handle,
            Event::Notification(_) => EventKind::Notification,
        }
    }
}

/// Event kinds whose contents arrive on continuation lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiKind {
    Addr,
    Neighbor,
    PanDesc,
    EdScan,
    Port,
    Handle,
}

/// Outcome of classifying an event starter line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Starter {
    Complete(Event),
    Incomplete(MultiKind),
}

// 8ビット16進数(任意桁)
fn u8_hex(input: &str) -> nom::IResult<&str, u8> {
    map_res(hex_digit1, |h| u8::from_str_radix(h, 16)).parse(input)
}

// 8ビット16進数(2桁固定)
fn u8_hex2(input: &str) -> nom::IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()), |s| {
        u8::from_str_radix(s, 16)
    })
    .parse(input)
}

// 16ビット16進数(任意桁)
fn u16_hex(input: &str) -> nom::IResult<&str, u16> {
    map_res(hex_digit1, |h| u16::from_str_radix(h, 16)).parse(input)
}

// Accepts both the module's grouped form and the compressed `::` form.
fn ipv6addr(input: &str) -> nom::IResult<&str, Ipv6Addr> {
    map_res(
        take_while1(|c: char| c == ':' || c.is_ascii_hexdigit()),
        |s: &str| s.parse::<Ipv6Addr>(),
    )
    .parse(input)
}

fn token(input: &str) -> nom::IResult<&str, &str> {
    take_while1(|c| c != ' ').parse(input)
}

fn hex_payload(input: &str) -> nom::IResult<&str, Vec<u8>> {
    many0(u8_hex2).parse(input)
}

/// Classify one event starter line (terminator already stripped). The first
/// whitespace-delimited token selects the kind; multi-line kinds return an
/// `Incomplete` shell to be finished with [`finish`] once the controller sees
/// the end of the event.
pub fn parse_starter(line: &str) -> Result<Starter, MalformedLine> {
    let (mnemonic, rest) = match line.split_once(' ') {
        Some((m, r)) => (m, r),
        None => (line, ""),
    };
    let malformed = || MalformedLine(line.to_string());
    let complete = match mnemonic {
        "EADDR" => return Ok(Starter::Incomplete(MultiKind::Addr)),
        "ENEIGHBOR" => return Ok(Starter::Incomplete(MultiKind::Neighbor)),
        "EPANDESC" => return Ok(Starter::Incomplete(MultiKind::PanDesc)),
        "EEDSCAN" => return Ok(Starter::Incomplete(MultiKind::EdScan)),
        "EPORT" => return Ok(Starter::Incomplete(MultiKind::Port)),
        "EHANDLE" => return Ok(Starter::Incomplete(MultiKind::Handle)),
        "ESREG" => map(token, |val: &str| Event::Sreg { val: val.to_string() })
            .parse(rest)
            .map(|(_, ev)| ev),
        "EINFO" => map(
            (ipv6addr, space1, token, space1, u8_hex, space1, u16_hex, space1, u16_hex),
            |(ipaddr, _, hwaddr, _, channel, _, pan_id, _, addr16)| {
                Event::Info(Info { ipaddr, hwaddr: hwaddr.to_string(), channel, pan_id, addr16 })
            },
        )
        .parse(rest)
        .map(|(_, ev)| ev),
        "EVER" => map(token, |v: &str| Event::Ver { version: v.to_string() })
            .parse(rest)
            .map(|(_, ev)| ev),
        "EAPPVER" => map(token, |v: &str| Event::AppVer { version: v.to_string() })
            .parse(rest)
            .map(|(_, ev)| ev),
        "ERXUDP" => map(
            (
                ipv6addr, space1, ipv6addr, space1, u16_hex, space1, u16_hex, space1, token,
                space1, u8_hex, space1, u16_hex, space1, hex_payload,
            ),
            |(sender, _, dest, _, rport, _, lport, _, lla, _, secured, _, _datalen, _, data)| {
                Event::RxUdp(RxUdp {
                    sender,
                    dest,
                    rport,
                    lport,
                    sender_lla: lla.to_string(),
                    secured,
                    data,
                })
            },
        )
        .parse(rest)
        .map(|(_, ev)| ev),
        "ERXTCP" => map(
            (ipv6addr, space1, u16_hex, space1, u16_hex, space1, token, space1, u16_hex, space1, hex_payload),
            |(sender, _, rport, _, lport, _, lla, _, _datalen, _, data)| {
                Event::RxTcp(RxTcp {
                    sender,
                    rport,
                    lport,
                    sender_lla: lla.to_string(),
                    data,
                })
            },
        )
        .parse(rest)
        .map(|(_, ev)| ev),
        "EPONG" => map(ipv6addr, |sender| Event::Pong { sender })
            .parse(rest)
            .map(|(_, ev)| ev),
        "ETCP" => parse_tcp(rest),
        "EVENT" => map(
            (u8_hex, space1, ipv6addr, opt(preceded(space1, hex_payload))),
            |(num, _, sender, param)| {
                Event::Notification(Notification { num, sender, param })
            },
        )
        .parse(rest)
        .map(|(_, ev)| ev),
        _ => return Err(malformed()),
    };
    complete.map(Starter::Complete).map_err(|_| malformed())
}

fn parse_tcp(rest: &str) -> Result<Event, nom::Err<nom::error::Error<&str>>> {
    let (rest, (status, _, handle)) = (u8_hex, space1, u8_hex).parse(rest)?;
    if status == 1 {
        return Ok(Event::Tcp(TcpNotice { status, handle, ipaddr: None, rport: None, lport: None }));
    }
    let (_, (_, ipaddr, _, rport, _, lport)) =
        (space1, ipv6addr, space1, u16_hex, space1, u16_hex).parse(rest)?;
    Ok(Event::Tcp(TcpNotice {
        status,
        handle,
        ipaddr: Some(ipaddr),
        rport: Some(rport),
        lport: Some(lport),
    }))
}

/// Finalise a multi-line event from its accumulated continuation lines.
pub fn finish(kind: MultiKind, lines: &[String]) -> Result<Event, MalformedLine> {
    match kind {
        MultiKind::Addr => lines
            .iter()
            .map(|l| l.trim().parse::<Ipv6Addr>().map_err(|_| MalformedLine(l.clone())))
            .collect::<Result<Vec<_>, _>>()
            .map(Event::Addr),
        MultiKind::Neighbor => lines
            .iter()
            .map(|l| {
                map(
                    (ipv6addr, space1, token, space1, u16_hex),
                    |(ipaddr, _, hwaddr, _, addr16)| Neighbor {
                        ipaddr,
                        hwaddr: hwaddr.to_string(),
                        addr16,
                    },
                )
                .parse(l.as_str())
                .map(|(_, n)| n)
                .map_err(|_| MalformedLine(l.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Event::Neighbor),
        MultiKind::PanDesc => {
            let mut desc = PanDesc::default();
            for line in lines {
                let Some((name, value)) = line.split_once(':') else {
                    return Err(MalformedLine(line.clone()));
                };
                match name {
                    "  Channel" => desc.channel = hex16(value, line)? as u8,
                    "  Channel Page" => desc.page = hex16(value, line)? as u8,
                    "  Pan ID" => desc.pan_id = hex16(value, line)?,
                    "  Addr" => desc.addr = value.to_string(),
                    "  LQI" => desc.lqi = hex16(value, line)? as u8,
                    "  PairID" => desc.pair_id = value.to_string(),
                    _ => {} // unknown names are ignored
                }
            }
            Ok(Event::PanDesc(desc))
        }
        MultiKind::EdScan => {
            let mut levels = Vec::new();
            for line in lines {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                for pair in tokens.chunks(2) {
                    let [c, r] = pair else {
                        return Err(MalformedLine(line.clone()));
                    };
                    levels.push(EdLevel {
                        channel: hex16(c, line)? as u8,
                        rssi: hex16(r, line)? as u8,
                    });
                }
            }
            Ok(Event::EdScan(levels))
        }
        MultiKind::Port => {
            // One port per line; line 6 is a literal separator in the
            // module's output and is skipped.
            if lines.len() < 11 {
                return Err(MalformedLine(lines.join("/")));
            }
            let mut ports = Ports::default();
            for (slot, line) in ports.udp.iter_mut().zip(&lines[0..6]) {
                *slot = hex16(line.trim(), line)?;
            }
            for (slot, line) in ports.tcp.iter_mut().zip(&lines[7..11]) {
                *slot = hex16(line.trim(), line)?;
            }
            Ok(Event::Port(ports))
        }
        MultiKind::Handle => lines
            .iter()
            .map(|l| {
                map(
                    (u8_hex, space1, ipv6addr, space1, u16_hex, space1, u16_hex),
                    |(handle, _, ipaddr, _, rport, _, lport)| TcpHandle {
                        handle,
                        ipaddr,
                        rport,
                        lport,
                    },
                )
                .parse(l.as_str())
                .map(|(_, h)| h)
                .map_err(|_| MalformedLine(l.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Event::Handle),
    }
}

// The module prints everything in hex, channel and port numbers included.
fn hex16(value: &str, line: &str) -> Result<u16, MalformedLine> {
    u16::from_str_radix(value.trim(), 16).map_err(|_| MalformedLine(line.to_string()))
}
