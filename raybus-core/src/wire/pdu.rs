use bytes::{Buf, BufMut, Bytes, BytesMut};
use more_asserts::debug_assert_le;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{
    CanMetadata, FlexrayTransport, FromWireError, FromWireResult, IpMetadata, StructMetadata,
    take_enum, take_u16, take_u32,
};

/// Transport carried by a PDU.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Plain payload, no transport metadata
    #[default]
    None,
    /// CAN message
    Can(CanMetadata),
    /// IP message
    Ip(IpMetadata),
    /// Serialized structure
    Struct(StructMetadata),
    /// FlexRay frame or controller metadata
    Flexray(FlexrayTransport),
}

/// Wire discriminant of a [`Transport`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TransportType {
    /// No transport metadata
    #[default]
    None = 0,
    /// CAN message
    Can = 1,
    /// IP message
    Ip = 2,
    /// Serialized structure
    Struct = 3,
    /// FlexRay frame or controller metadata
    Flexray = 4,
}

impl Transport {
    /// The wire discriminant of this transport.
    pub fn transport_type(&self) -> TransportType {
        match self {
            Transport::None => TransportType::None,
            Transport::Can(_) => TransportType::Can,
            Transport::Ip(_) => TransportType::Ip,
            Transport::Struct(_) => TransportType::Struct,
            Transport::Flexray(_) => TransportType::Flexray,
        }
    }
}

/// A protocol data unit exchanged over the codec stream.
///
/// `ecu_id` and `swc_id` identify the sender; when left at 0 they are
/// filled in from the codec's MIME-type parameters at write time.
///
/// Wire format (variable length):
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         frame length                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                              id                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            ecu id             |           swc id ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///           ... swc id            | transport type| metadata ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        payload length         |  payload length bytes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The frame length counts every byte after the length field itself, so
/// frames are self-delimiting and a stream of frames can be walked
/// without decoding the metadata.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// Message identifier; for FlexRay LPDU transfers this is the slot id
    pub id: u32,
    /// Payload bytes
    pub payload: Bytes,
    /// Sending ECU, defaulted from the MIME type when 0
    pub ecu_id: u16,
    /// Sending software component, defaulted from the MIME type when 0
    pub swc_id: u32,
    /// Transport metadata
    pub transport: Transport,
}

impl Pdu {
    /// Fixed header bytes inside a frame, excluding the length prefix,
    /// metadata and payload.
    pub(crate) const HEADER_SIZE: usize = 11;

    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        let frame_len = take_u32(buf)? as usize;
        if buf.remaining() < frame_len {
            return Err(FromWireError::InsufficientData);
        }
        let mut frame = buf.copy_to_bytes(frame_len);

        let id = take_u32(&mut frame)?;
        let ecu_id = take_u16(&mut frame)?;
        let swc_id = take_u32(&mut frame)?;
        let transport = match take_enum(&mut frame, "TransportType")? {
            TransportType::None => Transport::None,
            TransportType::Can => Transport::Can(CanMetadata::try_from_wire(&mut frame)?),
            TransportType::Ip => Transport::Ip(IpMetadata::try_from_wire(&mut frame)?),
            TransportType::Struct => {
                Transport::Struct(StructMetadata::try_from_wire(&mut frame)?)
            }
            TransportType::Flexray => {
                Transport::Flexray(FlexrayTransport::try_from_wire(&mut frame)?)
            }
        };

        let payload_len = usize::from(take_u16(&mut frame)?);
        if frame.remaining() < payload_len {
            return Err(FromWireError::InsufficientData);
        }
        let payload = frame.copy_to_bytes(payload_len);

        Ok(Self {
            id,
            payload,
            ecu_id,
            swc_id,
            transport,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        debug_assert_le!(self.payload.len(), usize::from(u16::MAX));

        let mut body = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());
        body.put_u32(self.id);
        body.put_u16(self.ecu_id);
        body.put_u32(self.swc_id);
        body.put_u8(self.transport.transport_type().into());
        match &self.transport {
            Transport::None => {}
            Transport::Can(can) => can.append_to_wire(&mut body),
            Transport::Ip(ip) => ip.append_to_wire(&mut body),
            Transport::Struct(meta) => meta.append_to_wire(&mut body),
            Transport::Flexray(flexray) => flexray.append_to_wire(&mut body),
        }
        body.put_u16(self.payload.len() as u16);
        body.put(&self.payload[..]);

        buf.reserve(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.put(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{
        CanFrameFormat, CanFrameType, FlexrayMetadata, FlexrayStatus, IpProtocol, LpduFrame,
        LpduStatus, NodeIdent,
    };
    use test_case::test_case;

    #[test]
    fn append_to_wire_plain() {
        let pdu = Pdu {
            id: 42,
            payload: Bytes::from_static(b"Hello World"),
            ecu_id: 5,
            swc_id: 4,
            transport: Transport::None,
        };
        let mut buf = BytesMut::new();
        pdu.append_to_wire(&mut buf);
        assert_eq!(
            &buf[..],
            b"\x00\x00\x00\x18\
              \x00\x00\x00\x2a\
              \x00\x05\
              \x00\x00\x00\x04\
              \x00\
              \x00\x0bHello World"
        );
    }

    fn can_pdu() -> Pdu {
        Pdu {
            id: 0x18db33f1,
            payload: Bytes::from_static(b"\x02\x01\x0d"),
            transport: Transport::Can(CanMetadata {
                frame_format: CanFrameFormat::Extended,
                frame_type: CanFrameType::Data,
                interface_id: 1,
                network_id: 2,
            }),
            ..Default::default()
        }
    }

    fn ip_pdu() -> Pdu {
        Pdu {
            id: 1,
            payload: Bytes::from_static(b"datagram"),
            transport: Transport::Ip(IpMetadata {
                protocol: IpProtocol::Udp,
                src_port: 5555,
                dst_port: 5556,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn struct_pdu() -> Pdu {
        Pdu {
            id: 9,
            payload: Bytes::from_static(&[0u8; 16]),
            transport: Transport::Struct(StructMetadata {
                type_name: "Wheel".to_string(),
                var_name: "wheel_fl".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn flexray_pdu() -> Pdu {
        Pdu {
            id: 7,
            payload: Bytes::from_static(b"hello world"),
            ecu_id: 1,
            swc_id: 1,
            transport: Transport::Flexray(FlexrayTransport {
                node_ident: NodeIdent {
                    ecu_id: 1,
                    cc_id: 0,
                    swc_id: 1,
                },
                metadata: FlexrayMetadata::Lpdu(LpduFrame {
                    cycle: 3,
                    status: LpduStatus::NotTransmitted,
                    ..Default::default()
                }),
            }),
        }
    }

    fn flexray_status_pdu() -> Pdu {
        Pdu {
            transport: Transport::Flexray(FlexrayTransport {
                node_ident: NodeIdent::default(),
                metadata: FlexrayMetadata::Status(FlexrayStatus::default()),
            }),
            ..Default::default()
        }
    }

    #[test_case(Pdu::default(); "empty")]
    #[test_case(can_pdu(); "can")]
    #[test_case(ip_pdu(); "ip")]
    #[test_case(struct_pdu(); "struct transport")]
    #[test_case(flexray_pdu(); "flexray lpdu")]
    #[test_case(flexray_status_pdu(); "flexray status")]
    fn round_trip(pdu: Pdu) {
        let mut buf = BytesMut::new();
        pdu.append_to_wire(&mut buf);
        let mut wire = &buf[..];
        assert_eq!(Pdu::try_from_wire(&mut wire).unwrap(), pdu);
        assert!(wire.is_empty(), "frame should be fully consumed");
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        can_pdu().append_to_wire(&mut buf);
        flexray_pdu().append_to_wire(&mut buf);

        let mut wire = &buf[..];
        assert_eq!(Pdu::try_from_wire(&mut wire).unwrap(), can_pdu());
        assert_eq!(Pdu::try_from_wire(&mut wire).unwrap(), flexray_pdu());
        assert!(wire.is_empty());
    }

    #[test]
    fn try_from_wire_short_prefix() {
        let mut wire = &b"\x00\x00"[..];
        assert_eq!(
            Pdu::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InsufficientData
        );
    }

    #[test]
    fn try_from_wire_truncated_frame() {
        let mut buf = BytesMut::new();
        can_pdu().append_to_wire(&mut buf);
        let mut wire = &buf[..buf.len() - 2];
        assert_eq!(
            Pdu::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InsufficientData
        );
    }

    #[test]
    fn try_from_wire_bad_transport() {
        let mut buf = BytesMut::new();
        Pdu::default().append_to_wire(&mut buf);
        buf[14] = 9; // transport type byte
        let mut wire = &buf[..];
        assert_eq!(
            Pdu::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InvalidEnum("TransportType", 9)
        );
    }
}
