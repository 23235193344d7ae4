// Echonet Lite frame codec
// SPDX-License-Identifier: MPL-2.0
//
use bincode::de::read::Reader;
use bincode::error::{DecodeError, EncodeError};
use std::sync::Mutex;
use thiserror::Error;

/// Frame header: the two bytes 0x10 0x81.
pub const EHD: u16 = 0x1081;

/// Service codes.
pub mod esv {
    pub const SETI: u8 = 0x60;
    pub const SETC: u8 = 0x61;
    pub const GET: u8 = 0x62;
    pub const INF_REQ: u8 = 0x63;
    pub const SET_RES: u8 = 0x71;
    pub const GET_RES: u8 = 0x72;
    pub const INF: u8 = 0x73;
    pub const INFC: u8 = 0x74;
    pub const INFC_RES: u8 = 0x7a;
    pub const SETI_SNA: u8 = 0x50;
    pub const SETC_SNA: u8 = 0x51;
    pub const GET_SNA: u8 = 0x52;
    pub const INF_SNA: u8 = 0x53;
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed echonet lite frame: {0}")]
    Malformed(String),
}

/// Echonet object code: 16-bit class plus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchonetObject {
    pub class: u16,
    pub instance: u8,
}

impl EchonetObject {
    pub const fn new(class: u16, instance: u8) -> Self {
        Self { class, instance }
    }
}

/// One property: code, declared length, opaque value. `pdc` always equals
/// `edt.len()` on frames built through [`Property::new`] / [`Property::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub epc: u8,
    pub pdc: u8,
    pub edt: Vec<u8>,
}

impl Property {
    pub fn new(epc: u8, edt: Vec<u8>) -> Self {
        Self { epc, pdc: edt.len() as u8, edt }
    }

    /// A value-less property, as carried by GET requests.
    pub fn request(epc: u8) -> Self {
        Self { epc, pdc: 0, edt: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tid: u16,
    pub seoj: EchonetObject,
    pub deoj: EchonetObject,
    pub esv: u8,
    pub opc: u8,
    pub props: Vec<Property>,
}

impl Frame {
    /// A GET request for `epcs`, one value-less property per code.
    pub fn get(tid: u16, seoj: EchonetObject, deoj: EchonetObject, epcs: &[u8]) -> Self {
        let props: Vec<Property> = epcs.iter().map(|&epc| Property::request(epc)).collect();
        Self { tid, seoj, deoj, esv: esv::GET, opc: props.len() as u8, props }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        bincode::encode_to_vec(self, codec_config())
            .map_err(|e| FrameError::Malformed(e.to_string()))
    }

    /// Decode a frame from a UDP payload. Trailing bytes beyond the last
    /// declared property are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        bincode::decode_from_slice(buf, codec_config())
            .map(|(frame, _len)| frame)
            .map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// Monotonic 16-bit transaction-id counter, first value 1, wrapping.
#[derive(Debug, Default)]
pub struct TidSource(Mutex<u16>);

impl TidSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u16 {
        let mut tid = self.0.lock().unwrap();
        *tid = tid.wrapping_add(1);
        *tid
    }
}

fn codec_config()
-> bincode::config::Configuration<bincode::config::BigEndian, bincode::config::Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

impl bincode::Encode for EchonetObject {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        bincode::Encode::encode(&self.class, encoder)?;
        bincode::Encode::encode(&self.instance, encoder)
    }
}

impl<Context> bincode::Decode<Context> for EchonetObject {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let class: u16 = bincode::Decode::decode(decoder)?;
        let instance: u8 = bincode::Decode::decode(decoder)?;
        Ok(Self { class, instance })
    }
}

impl bincode::Encode for Property {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        bincode::Encode::encode(&self.epc, encoder)?;
        bincode::Encode::encode(&self.pdc, encoder)?;
        for b in &self.edt {
            bincode::Encode::encode(b, encoder)?;
        }
        Ok(())
    }
}

impl<Context> bincode::Decode<Context> for Property {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let epc: u8 = bincode::Decode::decode(decoder)?;
        let pdc: u8 = bincode::Decode::decode(decoder)?;
        decoder.claim_bytes_read(pdc as usize)?;
        let mut edt = vec![0u8; pdc as usize];
        decoder.reader().read(&mut edt)?;
        Ok(Self { epc, pdc, edt })
    }
}

impl bincode::Encode for Frame {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        bincode::Encode::encode(&EHD, encoder)?;
        bincode::Encode::encode(&self.tid, encoder)?;
        bincode::Encode::encode(&self.seoj, encoder)?;
        bincode::Encode::encode(&self.deoj, encoder)?;
        bincode::Encode::encode(&self.esv, encoder)?;
        bincode::Encode::encode(&self.opc, encoder)?;
        for prop in &self.props {
            bincode::Encode::encode(prop, encoder)?;
        }
        Ok(())
    }
}

impl<Context> bincode::Decode<Context> for Frame {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let ehd: u16 = bincode::Decode::decode(decoder)?;
        if ehd != EHD {
            return Err(DecodeError::Other("not an echonet lite frame"));
        }
        let tid: u16 = bincode::Decode::decode(decoder)?;
        let seoj: EchonetObject = bincode::Decode::decode(decoder)?;
        let deoj: EchonetObject = bincode::Decode::decode(decoder)?;
        let esv: u8 = bincode::Decode::decode(decoder)?;
        let opc: u8 = bincode::Decode::decode(decoder)?;
        let mut props = Vec::with_capacity(opc as usize);
        for _ in 0..opc {
            props.push(bincode::Decode::decode(decoder)?);
        }
        Ok(Self { tid, seoj, deoj, esv, opc, props })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_get_request() {
        let frame = Frame::get(
            0x0001,
            EchonetObject::new(0x05ff, 1),
            EchonetObject::new(0x0288, 1),
            &[0xe1],
        );
        assert_eq!(
            frame.to_bytes().unwrap(),
            vec![
                0x10, 0x81, 0x00, 0x01, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x01, 0xe1, 0x00
            ]
        );
    }

    #[test]
    fn roundtrip_recovers_tid_and_properties() {
        let frame = Frame {
            tid: 0x1234,
            seoj: EchonetObject::new(0x0288, 1),
            deoj: EchonetObject::new(0x05ff, 1),
            esv: esv::GET_RES,
            opc: 2,
            props: vec![
                Property::new(0xe7, vec![0x00, 0x00, 0x01, 0xf4]),
                Property::new(0xe1, vec![0x02]),
            ],
        };
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_truncated_property() {
        // Declares pdc=4 but carries only two bytes of edt.
        let bytes = [
            0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x01, 0xe7, 0x04,
            0x01, 0x02,
        ];
        assert!(Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_wrong_header() {
        let bytes = [0x10, 0x82, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x00];
        assert!(Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn tid_source_is_monotonic_from_one() {
        let tids = TidSource::new();
        assert_eq!(tids.next(), 1);
        assert_eq!(tids.next(), 2);
        let mut previous = 2u16;
        for _ in 0..1000 {
            let next = tids.next();
            assert_eq!(next, previous.wrapping_add(1));
            previous = next;
        }
    }
}
