use bytes::{Buf, BufMut, BytesMut};
use more_asserts::debug_assert_le;

use super::{FromWireError, FromWireResult, take_bool, take_u16};

/// Transport metadata of a Struct PDU.
///
/// Describes a serialized structure so a receiving node can interpret
/// the payload. Strings are length-prefixed (u16) UTF-8.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StructMetadata {
    /// Name of the structure type
    pub type_name: String,
    /// Name of the variable carrying the structure
    pub var_name: String,
    /// Payload encoding (e.g. a packing scheme identifier)
    pub encoding: String,
    /// Alignment attribute of the serialized layout
    pub attribute_aligned: u16,
    /// Whether the serialized layout is packed
    pub attribute_packed: bool,
    /// Architecture the structure was serialized on
    pub platform_arch: String,
    /// Operating system the structure was serialized on
    pub platform_os: String,
    /// ABI the structure was serialized with
    pub platform_abi: String,
}

fn take_string(buf: &mut impl Buf) -> FromWireResult<String> {
    let len = usize::from(take_u16(buf)?);
    if buf.remaining() < len {
        return Err(FromWireError::InsufficientData);
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FromWireError::InvalidString)
}

fn put_string(buf: &mut BytesMut, value: &str) {
    debug_assert_le!(value.len(), usize::from(u16::MAX));
    buf.put_u16(value.len() as u16);
    buf.put(value.as_bytes());
}

impl StructMetadata {
    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        Ok(Self {
            type_name: take_string(buf)?,
            var_name: take_string(buf)?,
            encoding: take_string(buf)?,
            attribute_aligned: take_u16(buf)?,
            attribute_packed: take_bool(buf)?,
            platform_arch: take_string(buf)?,
            platform_os: take_string(buf)?,
            platform_abi: take_string(buf)?,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        put_string(buf, &self.type_name);
        put_string(buf, &self.var_name);
        put_string(buf, &self.encoding);
        buf.put_u16(self.attribute_aligned);
        buf.put_u8(u8::from(self.attribute_packed));
        put_string(buf, &self.platform_arch);
        put_string(buf, &self.platform_os);
        put_string(buf, &self.platform_abi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let meta = StructMetadata {
            type_name: "VehicleState".to_string(),
            var_name: "vehicle_state".to_string(),
            encoding: "packed-le".to_string(),
            attribute_aligned: 8,
            attribute_packed: true,
            platform_arch: "amd64".to_string(),
            platform_os: "linux".to_string(),
            platform_abi: "systemv".to_string(),
        };
        let mut buf = BytesMut::new();
        meta.append_to_wire(&mut buf);
        let mut wire = &buf[..];
        assert_eq!(StructMetadata::try_from_wire(&mut wire).unwrap(), meta);
        assert!(wire.is_empty());
    }

    #[test]
    fn empty_strings() {
        let meta = StructMetadata::default();
        let mut buf = BytesMut::new();
        meta.append_to_wire(&mut buf);
        let mut wire = &buf[..];
        assert_eq!(StructMetadata::try_from_wire(&mut wire).unwrap(), meta);
    }

    #[test]
    fn string_length_past_end() {
        let mut buf = BytesMut::new();
        buf.put_u16(20);
        buf.put(&b"short"[..]);
        let mut wire = &buf[..];
        assert_eq!(
            StructMetadata::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InsufficientData
        );
    }

    #[test]
    fn invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        buf.put(&b"\xff\xfe"[..]);
        let mut wire = &buf[..];
        assert_eq!(
            StructMetadata::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InvalidString
        );
    }
}
