// Low-voltage smart electric energy meter vocabulary and property decoding
// SPDX-License-Identifier: MPL-2.0
//
use crate::echonetlite::frame::Frame;
use chrono::{DateTime, Local, TimeZone};
use rust_decimal::Decimal;

pub const CLASS_SMART_METER: u16 = 0x0288;
pub const CLASS_CONTROLLER: u16 = 0x05ff;

/// Echonet Lite UDP port on the meter side.
pub const UDP_PORT: u16 = 3610;

/// Property codes of the 0x0288 meter class, plus the node-profile
/// instance-list notification the meter announces itself with.
pub mod epc {
    pub const COEFFICIENT: u8 = 0xd3;
    pub const INSTANCE_LIST_NOTIFICATION: u8 = 0xd5;
    pub const EFFECTIVE_DIGITS: u8 = 0xd7;
    pub const CUMULATIVE_ENERGY: u8 = 0xe0;
    pub const CUMULATIVE_ENERGY_UNIT: u8 = 0xe1;
    pub const CUMULATIVE_ENERGY_HISTORY: u8 = 0xe2;
    pub const INSTANTANEOUS_POWER: u8 = 0xe7;
    pub const INSTANTANEOUS_CURRENT: u8 = 0xe8;
    pub const CUMULATIVE_ENERGY_AT_FIXED_TIME: u8 = 0xea;
}

/// 0xe1 積算電力量単位: kWh per count of the cumulative register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyUnit(pub Decimal);

impl EnergyUnit {
    pub fn from_edt(edt: &[u8]) -> Option<Self> {
        let multiplier = match edt {
            [0x00] => Decimal::new(1, 0),
            [0x01] => Decimal::new(1, 1),
            [0x02] => Decimal::new(1, 2),
            [0x03] => Decimal::new(1, 3),
            [0x04] => Decimal::new(1, 4),
            [0x0a] => Decimal::new(10, 0),
            [0x0b] => Decimal::new(100, 0),
            [0x0c] => Decimal::new(1000, 0),
            [0x0d] => Decimal::new(10000, 0),
            _ => return None,
        };
        Some(Self(multiplier))
    }
}

/// 0xea 定時積算電力量計測値: measurement timestamp plus the raw register
/// value, still unscaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeAtFixedTime {
    pub measured_at: DateTime<Local>,
    pub raw: u32,
}

pub fn cumulative_at_fixed_time(edt: &[u8]) -> Option<CumulativeAtFixedTime> {
    if edt.len() < 11 {
        return None;
    }
    let year = u16::from_be_bytes([edt[0], edt[1]]);
    let measured_at = Local
        .with_ymd_and_hms(
            year as i32,
            edt[2] as u32,
            edt[3] as u32,
            edt[4] as u32,
            edt[5] as u32,
            edt[6] as u32,
        )
        .single()?;
    let raw = u32::from_be_bytes([edt[7], edt[8], edt[9], edt[10]]);
    Some(CumulativeAtFixedTime { measured_at, raw })
}

/// 0xe7 瞬時電力計測値 in watts.
pub fn instantaneous_power(edt: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = edt.get(0..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Pick the smart meter instance out of a node-profile INF whose 0xd5
/// property lists the node's instances as `count | (class,instance)*`.
pub fn meter_instance(frame: &Frame) -> Option<u8> {
    frame
        .props
        .iter()
        .filter(|p| p.epc == epc::INSTANCE_LIST_NOTIFICATION)
        .find_map(|p| {
            let (&count, rest) = p.edt.split_first()?;
            rest.chunks_exact(3).take(count as usize).find_map(|triple| {
                let class = u16::from_be_bytes([triple[0], triple[1]]);
                (class == CLASS_SMART_METER).then_some(triple[2])
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echonetlite::frame::{EchonetObject, Property, esv};
    use chrono::Timelike;

    #[test]
    fn unit_lookup() {
        assert_eq!(EnergyUnit::from_edt(&[0x02]).unwrap().0, Decimal::new(1, 2));
        assert_eq!(EnergyUnit::from_edt(&[0x00]).unwrap().0, Decimal::new(1, 0));
        assert_eq!(EnergyUnit::from_edt(&[0x0d]).unwrap().0, Decimal::new(10000, 0));
        assert_eq!(EnergyUnit::from_edt(&[0x05]), None);
        assert_eq!(EnergyUnit::from_edt(&[]), None);
    }

    #[test]
    fn fixed_time_cumulative_decodes_timestamp_and_register() {
        // 2024-06-01 12:30:00, register 0x0001e240
        let edt = [0x07, 0xe8, 6, 1, 12, 30, 0, 0x00, 0x01, 0xe2, 0x40];
        let m = cumulative_at_fixed_time(&edt).unwrap();
        assert_eq!(m.raw, 123456);
        assert_eq!(m.measured_at.hour(), 12);
        assert_eq!(m.measured_at.minute(), 30);
    }

    #[test]
    fn fixed_time_cumulative_rejects_short_payload() {
        assert_eq!(cumulative_at_fixed_time(&[0x07, 0xe8, 6, 1]), None);
    }

    #[test]
    fn instantaneous_power_is_big_endian() {
        assert_eq!(instantaneous_power(&[0x00, 0x00, 0x01, 0xf4]), Some(500));
        assert_eq!(instantaneous_power(&[0x01]), None);
    }

    #[test]
    fn meter_instance_from_notification() {
        let frame = Frame {
            tid: 1,
            seoj: EchonetObject::new(0x0ef0, 1),
            deoj: EchonetObject::new(CLASS_CONTROLLER, 1),
            esv: esv::INF,
            opc: 1,
            props: vec![Property::new(
                epc::INSTANCE_LIST_NOTIFICATION,
                vec![0x02, 0x0e, 0xf0, 0x01, 0x02, 0x88, 0x03],
            )],
        };
        assert_eq!(meter_instance(&frame), Some(3));
    }

    #[test]
    fn meter_instance_absent_when_not_advertised() {
        let frame = Frame {
            tid: 1,
            seoj: EchonetObject::new(0x0ef0, 1),
            deoj: EchonetObject::new(CLASS_CONTROLLER, 1),
            esv: esv::INF,
            opc: 1,
            props: vec![Property::new(
                epc::INSTANCE_LIST_NOTIFICATION,
                vec![0x01, 0x0e, 0xf0, 0x01],
            )],
        };
        assert_eq!(meter_instance(&frame), None);
    }
}
