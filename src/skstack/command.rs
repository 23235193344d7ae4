// SKSTACK command set and byte renderer
// SPDX-License-Identifier: MPL-2.0
//
use std::net::Ipv6Addr;

/// One SKSTACK command, one variant per mnemonic.
///
/// `to_bytes` renders the exact ASCII accepted by the module; the line
/// terminator is appended by the controller, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// SKSREG Sxx val
    Sreg { reg: u8, val: String },
    Info,
    Start,
    Join { ipaddr: Ipv6Addr },
    Rejoin,
    Term,
    /// SKSENDTO carries the payload verbatim, not hex-encoded.
    SendTo {
        handle: u8,
        ipaddr: Ipv6Addr,
        port: u16,
        sec: u8,
        data: Vec<u8>,
    },
    Connect { ipaddr: Ipv6Addr, rport: u16, lport: u16 },
    Send { handle: u8, data: Vec<u8> },
    Close { handle: u8 },
    Ping { ipaddr: Ipv6Addr },
    Scan { mode: u8, mask: u32, duration: u8 },
    RegDev { ipaddr: Ipv6Addr },
    RmDev { ipaddr: Ipv6Addr },
    SetKey { index: u8, key: Vec<u8> },
    RmKey { index: u8 },
    SecEnable { mode: u16, ipaddr: Ipv6Addr, hwaddr: String },
    SetPsk { key: Vec<u8> },
    SetPwd { pwd: String },
    SetRbId { rbid: String },
    AddNbr { ipaddr: Ipv6Addr, hwaddr: String },
    UdpPort { handle: u8, port: u16 },
    TcpPort { index: u8, port: u16 },
    Save,
    Load,
    Erase,
    Ver,
    AppVer,
    Reset,
    Table { mode: u8 },
    DSleep,
    RfLo { mode: u8 },
    Ll64 { hwaddr: String },
}

/// A single parameter token. Almost everything is text; SKSENDTO/SKSEND
/// carry their payload as raw bytes after the length prefix.
enum Param {
    Text(String),
    Raw(Vec<u8>),
}

impl Command {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Command::Sreg { .. } => "SKSREG",
            Command::Info => "SKINFO",
            Command::Start => "SKSTART",
            Command::Join { .. } => "SKJOIN",
            Command::Rejoin => "SKREJOIN",
            Command::Term => "SKTERM",
            Command::SendTo { .. } => "SKSENDTO",
            Command::Connect { .. } => "SKCONNECT",
            Command::Send { .. } => "SKSEND",
            Command::Close { .. } => "SKCLOSE",
            Command::Ping { .. } => "SKPING",
            Command::Scan { .. } => "SKSCAN",
            Command::RegDev { .. } => "SKREGDEV",
            Command::RmDev { .. } => "SKRMDEV",
            Command::SetKey { .. } => "SKSETKEY",
            Command::RmKey { .. } => "SKRMKEY",
            Command::SecEnable { .. } => "SKSECENABLE",
            Command::SetPsk { .. } => "SKSETPSK",
            Command::SetPwd { .. } => "SKSETPWD",
            Command::SetRbId { .. } => "SKSETRBID",
            Command::AddNbr { .. } => "SKADDNBR",
            Command::UdpPort { .. } => "SKUDPPORT",
            Command::TcpPort { .. } => "SKTCPPORT",
            Command::Save => "SKSAVE",
            Command::Load => "SKLOAD",
            Command::Erase => "SKERASE",
            Command::Ver => "SKVER",
            Command::AppVer => "SKAPPVER",
            Command::Reset => "SKRESET",
            Command::Table { .. } => "SKTABLE",
            Command::DSleep => "SKDSLEEP",
            Command::RfLo { .. } => "SKRFLO",
            Command::Ll64 { .. } => "SKLL64",
        }
    }

    fn params(&self) -> Vec<Param> {
        use Param::{Raw, Text};
        match self {
            Command::Sreg { reg, val } => {
                vec![Text(format!("S{:02X}", reg)), Text(val.clone())]
            }
            Command::Join { ipaddr }
            | Command::Ping { ipaddr }
            | Command::RegDev { ipaddr }
            | Command::RmDev { ipaddr } => vec![Text(iptoa(ipaddr))],
            Command::SendTo { handle, ipaddr, port, sec, data } => vec![
                Text(format!("{}", handle)),
                Text(iptoa(ipaddr)),
                Text(format!("{:04X}", port)),
                Text(format!("{}", sec)),
                Text(format!("{:04X}", data.len())),
                Raw(data.clone()),
            ],
            Command::Connect { ipaddr, rport, lport } => vec![
                Text(iptoa(ipaddr)),
                Text(format!("{:04X}", rport)),
                Text(format!("{:04X}", lport)),
            ],
            Command::Send { handle, data } => vec![
                Text(format!("{:02X}", handle)),
                Text(format!("{:04X}", data.len())),
                Raw(data.clone()),
            ],
            Command::Close { handle } => vec![Text(format!("{:02X}", handle))],
            Command::Scan { mode, mask, duration } => vec![
                Text(format!("{}", mode)),
                Text(format!("{:08X}", mask)),
                Text(format!("{}", duration)),
            ],
            Command::SetKey { index, key } => {
                vec![Text(format!("{:02X}", index)), Text(hex_upper(key))]
            }
            Command::RmKey { index } => vec![Text(format!("{:02X}", index))],
            Command::SecEnable { mode, ipaddr, hwaddr } => vec![
                Text(format!("{:04X}", mode)),
                Text(iptoa(ipaddr)),
                Text(hwaddr.clone()),
            ],
            Command::SetPsk { key } => {
                vec![Text(format!("{:02X}", key.len())), Text(hex_upper(key))]
            }
            Command::SetPwd { pwd } => {
                vec![Text(format!("{:02X}", pwd.len())), Text(pwd.clone())]
            }
            Command::SetRbId { rbid } => vec![Text(rbid.clone())],
            Command::AddNbr { ipaddr, hwaddr } => {
                vec![Text(iptoa(ipaddr)), Text(hwaddr.clone())]
            }
            Command::UdpPort { handle, port } => {
                vec![Text(format!("{:02X}", handle)), Text(format!("{:04X}", port))]
            }
            Command::TcpPort { index, port } => {
                vec![Text(format!("{:02X}", index)), Text(format!("{:04X}", port))]
            }
            Command::Table { mode } | Command::RfLo { mode } => {
                vec![Text(format!("{:02X}", mode))]
            }
            Command::Ll64 { hwaddr } => vec![Text(hwaddr.to_uppercase())],
            Command::Info
            | Command::Start
            | Command::Rejoin
            | Command::Term
            | Command::Save
            | Command::Load
            | Command::Erase
            | Command::Ver
            | Command::AppVer
            | Command::Reset
            | Command::DSleep => vec![],
        }
    }

    /// Render the command line without the trailing CR+LF: the mnemonic,
    /// then each parameter token preceded by a single 0x20.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.mnemonic().as_bytes().to_vec();
        for param in self.params() {
            buf.push(0x20);
            match param {
                Param::Text(s) => buf.extend_from_slice(s.as_bytes()),
                Param::Raw(b) => buf.extend_from_slice(&b),
            }
        }
        buf
    }
}

/// Eight colon-separated groups of four uppercase hex digits.
pub fn iptoa(ipaddr: &Ipv6Addr) -> String {
    ipaddr.segments().map(|n| format!("{:04X}", n)).join(":")
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_sendto() {
        let cmd = Command::SendTo {
            handle: 1,
            ipaddr: "FE80::1".parse().unwrap(),
            port: 0x0e1a,
            sec: 1,
            data: vec![0x68, 0x81, 0x00, 0x01],
        };
        assert_eq!(
            cmd.to_bytes(),
            b"SKSENDTO 1 FE80:0000:0000:0000:0000:0000:0000:0001 0E1A 1 0004 \x68\x81\x00\x01"
        );
    }

    #[test]
    fn render_sreg() {
        let cmd = Command::Sreg { reg: 2, val: "21".to_string() };
        assert_eq!(cmd.to_bytes(), b"SKSREG S02 21");
        let cmd = Command::Sreg { reg: 3, val: "8888".to_string() };
        assert_eq!(cmd.to_bytes(), b"SKSREG S03 8888");
    }

    #[test]
    fn render_scan() {
        let cmd = Command::Scan { mode: 2, mask: 0xffff_ffff, duration: 6 };
        assert_eq!(cmd.to_bytes(), b"SKSCAN 2 FFFFFFFF 6");
    }

    #[test]
    fn render_setpwd_prefixes_length() {
        let cmd = Command::SetPwd { pwd: "0123456789AB".to_string() };
        assert_eq!(cmd.to_bytes(), b"SKSETPWD 0C 0123456789AB");
    }

    #[test]
    fn render_setkey_hex_encodes() {
        let cmd = Command::SetKey { index: 1, key: vec![0xde, 0xad, 0xbe, 0xef] };
        assert_eq!(cmd.to_bytes(), b"SKSETKEY 01 DEADBEEF");
    }

    #[test]
    fn render_ll64_uppercases() {
        let cmd = Command::Ll64 { hwaddr: "001d129012345678".to_string() };
        assert_eq!(cmd.to_bytes(), b"SKLL64 001D129012345678");
    }

    #[test]
    fn render_no_parameters_no_trailing_space() {
        assert_eq!(Command::Reset.to_bytes(), b"SKRESET");
        assert_eq!(Command::Ver.to_bytes(), b"SKVER");
    }
}
