use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{FromWireResult, take_enum, take_u32};

/// CAN frame format.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CanFrameFormat {
    /// Base frame (11-bit identifier)
    #[default]
    Base = 0,
    /// Extended frame (29-bit identifier)
    Extended = 1,
    /// CAN FD base frame
    FdBase = 2,
    /// CAN FD extended frame
    FdExtended = 3,
}

/// CAN frame type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CanFrameType {
    /// Data frame
    #[default]
    Data = 0,
    /// Remote request frame
    Remote = 1,
    /// Error frame
    Error = 2,
    /// Overload frame
    Overload = 3,
}

/// Transport metadata of a CAN message PDU.
///
/// Wire format (fixed length):
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  frame format |  frame type   |        interface id ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      ... id     |                network id ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CanMetadata {
    /// Frame format
    pub frame_format: CanFrameFormat,
    /// Frame type
    pub frame_type: CanFrameType,
    /// Interface the message was observed on
    pub interface_id: u32,
    /// Network the message was observed on
    pub network_id: u32,
}

impl CanMetadata {
    /// Wire size in bytes.
    pub(crate) const WIRE_SIZE: usize = 10;

    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        Ok(Self {
            frame_format: take_enum(buf, "CanFrameFormat")?,
            frame_type: take_enum(buf, "CanFrameType")?,
            interface_id: take_u32(buf)?,
            network_id: take_u32(buf)?,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.reserve(Self::WIRE_SIZE);
        buf.put_u8(self.frame_format.into());
        buf.put_u8(self.frame_type.into());
        buf.put_u32(self.interface_id);
        buf.put_u32(self.network_id);
    }
}
