// Time-series sink (Influx line protocol over UDP)
// SPDX-License-Identifier: MPL-2.0
//
use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use std::io;
use std::net::UdpSocket;

/// Writes measurement points to the configured UDP endpoint, one line
/// protocol record per datagram. Timestamps are second precision.
pub struct TimeSeriesSink {
    socket: UdpSocket,
}

impl TimeSeriesSink {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, port))?;
        Ok(Self { socket })
    }

    /// Cumulative energy, stamped with the meter's own measurement time.
    pub fn watt_hour(&self, measured_at: DateTime<Local>, kwh: Decimal) -> io::Result<()> {
        self.send_line(&watt_hour_line(measured_at.timestamp(), kwh))
    }

    /// Instantaneous power; the server assigns the arrival time.
    pub fn watt(&self, watt: u32) -> io::Result<()> {
        self.send_line(&watt_line(watt))
    }

    fn send_line(&self, line: &str) -> io::Result<()> {
        tracing::debug!(target: "sink", "{line}");
        self.socket.send(line.as_bytes()).map(|_| ())
    }
}

fn watt_hour_line(timestamp: i64, kwh: Decimal) -> String {
    format!("WattHour watthour={kwh} {timestamp}")
}

fn watt_line(watt: u32) -> String {
    format!("Watt watt={watt}i")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watt_hour_line_is_second_precision() {
        let kwh = Decimal::new(1234, 2); // 12.34
        assert_eq!(watt_hour_line(1_700_000_000, kwh), "WattHour watthour=12.34 1700000000");
    }

    #[test]
    fn watt_line_is_an_integer_field() {
        assert_eq!(watt_line(512), "Watt watt=512i");
    }
}
