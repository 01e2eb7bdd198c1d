//! BLE advertisement payload parsing.
//!
//! An advertisement (or scan response) payload is a sequence of AD
//! structures, each `[length, type, data...]` where `length` counts the type
//! byte and the data. Android eRouska peers put their BUID into a service
//! data structure right after the service UUID:
//!
//! | AD type | Meaning | UUID bytes skipped |
//! |---------|---------|--------------------|
//! | `0x21` | Service data, 128-bit UUID (most devices) | 16 |
//! | `0x16` | Service data, 16-bit UUID (rare) | 2 |
//! | `0x20` | Service data, 32-bit UUID | 4 |
//!
//! The 10 bytes following the UUID are the BUID.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use erouska_types::uuid::short_uuid;
use erouska_types::{BUID_LEN, Buid};

/// AD type: complete list of 128-bit service UUIDs.
pub const AD_COMPLETE_SERVICE_UUIDS_128: u8 = 0x07;
/// AD type: service data with a 16-bit UUID.
pub const AD_SERVICE_DATA_16: u8 = 0x16;
/// AD type: service data with a 32-bit UUID.
pub const AD_SERVICE_DATA_32: u8 = 0x20;
/// AD type: service data with a 128-bit UUID.
pub const AD_SERVICE_DATA_128: u8 = 0x21;
/// AD type: manufacturer specific data.
pub const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// A single AD structure borrowed from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    /// AD type byte.
    pub ad_type: u8,
    /// Data following the type byte.
    pub data: &'a [u8],
}

impl AdStructure<'_> {
    /// Number of UUID bytes preceding the payload for service data types.
    pub fn service_uuid_len(&self) -> Option<usize> {
        match self.ad_type {
            AD_SERVICE_DATA_128 => Some(16),
            AD_SERVICE_DATA_16 => Some(2),
            AD_SERVICE_DATA_32 => Some(4),
            _ => None,
        }
    }
}

/// Iterator over the AD structures of a raw payload.
///
/// Iteration stops at a zero length byte (the padding that terminates
/// legacy payloads) or at the first truncated structure.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.bytes.get(self.index)? as usize;
        if len == 0 {
            return None;
        }
        let end = self.index + 1 + len;
        let structure = self.bytes.get(self.index + 1..end)?;
        self.index = end;
        Some(AdStructure {
            ad_type: structure[0],
            data: &structure[1..],
        })
    }
}

/// Iterate over the AD structures in `bytes`.
pub fn ad_structures(bytes: &[u8]) -> AdStructures<'_> {
    AdStructures { bytes, index: 0 }
}

/// Extract an Android peer's BUID from a raw advertisement payload.
///
/// The first service data structure decides the outcome. Returns `None`
/// when no service data structure exists, when it is too short to hold a
/// BUID, or when the BUID is all zeros.
///
/// # Example
///
/// ```
/// use erouska_core::advertisement::{encode_service_data, extract_buid};
/// use erouska_core::uuids::SERVICE_UUID;
/// use erouska_types::Buid;
///
/// let buid = Buid::new([1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
/// let payload = encode_service_data(&SERVICE_UUID, buid.as_bytes()).unwrap();
/// assert_eq!(extract_buid(&payload), Some(buid));
/// ```
pub fn extract_buid(bytes: &[u8]) -> Option<Buid> {
    let structure = ad_structures(bytes).find(|s| s.service_uuid_len().is_some())?;
    let uuid_len = structure.service_uuid_len()?;
    let raw = structure.data.get(uuid_len..uuid_len + BUID_LEN)?;
    Buid::from_slice(raw).ok()?.non_zero()
}

/// Encode a service data AD structure.
///
/// UUIDs derived from the Bluetooth base UUID use the 16-bit form, all
/// others the 128-bit form. UUIDs go on the wire little-endian. Returns
/// `None` when the structure would not fit a one byte length.
pub fn encode_service_data(uuid: &Uuid, data: &[u8]) -> Option<Bytes> {
    let short = short_uuid(uuid);
    let uuid_len = if short.is_some() { 2 } else { 16 };
    let len = structure_len(uuid_len + data.len())?;

    let mut buf = BytesMut::with_capacity(1 + len as usize);
    buf.put_u8(len);
    match short {
        Some(short) => {
            buf.put_u8(AD_SERVICE_DATA_16);
            buf.put_u16_le(short);
        }
        None => {
            buf.put_u8(AD_SERVICE_DATA_128);
            buf.put_u128_le(uuid.as_u128());
        }
    }
    buf.put_slice(data);
    Some(buf.freeze())
}

/// Encode a complete list of 128-bit service UUIDs.
pub fn encode_service_uuids(uuids: &[Uuid]) -> Option<Bytes> {
    let len = structure_len(16 * uuids.len())?;
    let mut buf = BytesMut::with_capacity(1 + len as usize);
    buf.put_u8(len);
    buf.put_u8(AD_COMPLETE_SERVICE_UUIDS_128);
    for uuid in uuids {
        buf.put_u128_le(uuid.as_u128());
    }
    Some(buf.freeze())
}

/// Encode a manufacturer specific data AD structure.
pub fn encode_manufacturer_data(company_id: u16, data: &[u8]) -> Option<Bytes> {
    let len = structure_len(2 + data.len())?;
    let mut buf = BytesMut::with_capacity(1 + len as usize);
    buf.put_u8(len);
    buf.put_u8(AD_MANUFACTURER_DATA);
    buf.put_u16_le(company_id);
    buf.put_slice(data);
    Some(buf.freeze())
}

/// Length byte for a structure with `data_len` bytes after the type byte.
fn structure_len(data_len: usize) -> Option<u8> {
    u8::try_from(1 + data_len).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use erouska_types::uuids::{APPLE_COMPANY_ID, SERVICE_UUID};
    use uuid::uuid;

    const BUID: Buid = Buid::new([0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab]);

    fn payload(parts: &[Bytes]) -> Vec<u8> {
        parts.iter().flat_map(|p| p.iter().copied()).collect()
    }

    #[test]
    fn test_extract_from_128_bit_service_data() {
        let bytes = payload(&[
            encode_service_uuids(&[SERVICE_UUID]).unwrap(),
            encode_service_data(&SERVICE_UUID, BUID.as_bytes()).unwrap(),
        ]);
        assert_eq!(bytes[0], 17);
        assert_eq!(bytes[18], 27);
        assert_eq!(bytes[19], AD_SERVICE_DATA_128);

        assert_eq!(extract_buid(&bytes), Some(BUID));
        assert_eq!(
            extract_buid(&bytes).unwrap().to_hex(),
            "deadbeef0123456789ab"
        );
    }

    #[test]
    fn test_extract_from_16_bit_service_data() {
        let short = uuid!("0000fd6f-0000-1000-8000-00805f9b34fb");
        let bytes = encode_service_data(&short, BUID.as_bytes()).unwrap();
        assert_eq!(&bytes[..4], &[13, AD_SERVICE_DATA_16, 0x6f, 0xfd]);
        assert_eq!(extract_buid(&bytes), Some(BUID));
    }

    #[test]
    fn test_extract_from_32_bit_service_data() {
        let mut bytes = vec![1 + 4 + 10, AD_SERVICE_DATA_32, 0x01, 0x02, 0x03, 0x04];
        bytes.extend_from_slice(BUID.as_bytes());
        assert_eq!(extract_buid(&bytes), Some(BUID));
    }

    #[test]
    fn test_skips_unrelated_structures() {
        let bytes = payload(&[
            Bytes::from_static(&[0x02, 0x01, 0x06]), // flags
            encode_manufacturer_data(APPLE_COMPANY_ID, &[0x10, 0x05]).unwrap(),
            encode_service_data(&SERVICE_UUID, BUID.as_bytes()).unwrap(),
        ]);
        assert_eq!(extract_buid(&bytes), Some(BUID));
    }

    #[test]
    fn test_trailing_zero_padding() {
        let mut bytes = encode_service_data(&SERVICE_UUID, BUID.as_bytes())
            .unwrap()
            .to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        assert_eq!(extract_buid(&bytes), Some(BUID));
    }

    #[test]
    fn test_zero_buid_is_not_found() {
        let bytes = encode_service_data(&SERVICE_UUID, &[0u8; 10]).unwrap();
        assert_eq!(extract_buid(&bytes), None);
    }

    #[test]
    fn test_no_service_data() {
        let bytes = payload(&[
            Bytes::from_static(&[0x02, 0x01, 0x06]),
            encode_manufacturer_data(APPLE_COMPANY_ID, &[0x01; 8]).unwrap(),
        ]);
        assert_eq!(extract_buid(&bytes), None);
        assert_eq!(extract_buid(&[]), None);
    }

    #[test]
    fn test_terminator_stops_scan() {
        let mut bytes = vec![0x00];
        bytes.extend_from_slice(&encode_service_data(&SERVICE_UUID, BUID.as_bytes()).unwrap());
        assert_eq!(extract_buid(&bytes), None);
    }

    #[test]
    fn test_short_service_data_is_not_found() {
        let bytes = encode_service_data(&SERVICE_UUID, &[1, 2, 3]).unwrap();
        assert_eq!(extract_buid(&bytes), None);
    }

    #[test]
    fn test_truncated_structure_is_not_found() {
        let bytes = encode_service_data(&SERVICE_UUID, BUID.as_bytes()).unwrap();
        assert_eq!(extract_buid(&bytes[..bytes.len() - 1]), None);
    }

    #[test]
    fn test_first_service_data_decides() {
        let bytes = payload(&[
            encode_service_data(&SERVICE_UUID, &[0u8; 10]).unwrap(),
            encode_service_data(&SERVICE_UUID, BUID.as_bytes()).unwrap(),
        ]);
        assert_eq!(extract_buid(&bytes), None);
    }

    #[test]
    fn test_ad_structures_iteration() {
        let bytes = payload(&[
            Bytes::from_static(&[0x02, 0x01, 0x06]),
            encode_service_uuids(&[SERVICE_UUID]).unwrap(),
        ]);
        let structures: Vec<_> = ad_structures(&bytes).collect();
        assert_eq!(structures.len(), 2);
        assert_eq!(structures[0].ad_type, 0x01);
        assert_eq!(structures[0].data, &[0x06]);
        assert_eq!(structures[1].ad_type, AD_COMPLETE_SERVICE_UUIDS_128);
        assert_eq!(structures[1].data.len(), 16);
        assert_eq!(structures[1].service_uuid_len(), None);
    }

    #[test]
    fn test_uuid_is_little_endian_on_wire() {
        let bytes = encode_service_data(&SERVICE_UUID, BUID.as_bytes()).unwrap();
        let mut uuid_bytes: Vec<u8> = bytes[2..18].to_vec();
        uuid_bytes.reverse();
        assert_eq!(Uuid::from_slice(&uuid_bytes).unwrap(), SERVICE_UUID);
    }

    #[test]
    fn test_oversized_structures_are_not_encoded() {
        // 1 type byte + 16 UUID bytes + 238 = 255
        let largest = encode_service_data(&SERVICE_UUID, &[0x42; 238]).unwrap();
        assert_eq!(largest[0], 255);
        assert_eq!(largest.len(), 256);

        assert!(encode_service_data(&SERVICE_UUID, &[0x42; 239]).is_none());
        assert!(encode_manufacturer_data(APPLE_COMPANY_ID, &[0; 253]).is_none());
        assert!(encode_manufacturer_data(APPLE_COMPANY_ID, &[0; 252]).is_some());
        assert!(encode_service_uuids(&[SERVICE_UUID; 16]).is_none());
        assert!(encode_service_uuids(&[SERVICE_UUID; 15]).is_some());
    }
}
