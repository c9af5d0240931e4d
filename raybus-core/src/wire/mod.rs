//! PDU wire format.
//!
//! PDUs travel over the codec stream as self-delimited, length-prefixed
//! frames. The root type is [`Pdu`]; its transport metadata is the
//! tagged [`Transport`] sum. All integers are big-endian.

mod can;
mod flexray;
mod ip;
mod pdu;
mod struct_meta;

pub use can::{CanFrameFormat, CanFrameType, CanMetadata};
pub use flexray::{
    BitRate, Channel, ChannelStatus, ConfigOp, Direction, FlexrayConfig, FlexrayMetadata,
    FlexrayStatus, FlexrayTransport, FrameIndicators, LpduConfig, LpduFrame, LpduStatus,
    MetadataType, NodeIdent, PocCommand, PocState, TransceiverState, TransmitMode,
};
pub use ip::{DoIpAdapter, IpAddrPair, IpMetadata, IpProtocol, SocketAdapter, SomeIpAdapter};
pub use pdu::{Pdu, Transport, TransportType};
pub use struct_meta::StructMetadata;

use bytes::Buf;
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Errors which can occur while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FromWireError {
    /// The buffer ended before a complete frame
    #[error("insufficient data")]
    InsufficientData,

    /// An enum field carried an unknown discriminant
    #[error("unknown {0} discriminant {1}")]
    InvalidEnum(&'static str, u8),

    /// A boolean field was neither 0 nor 1
    #[error("invalid boolean encoding")]
    InvalidBool,

    /// A string field was not valid UTF-8
    #[error("invalid string encoding")]
    InvalidString,
}

/// Result of attempting to parse a structure from the wire.
pub type FromWireResult<T> = Result<T, FromWireError>;

pub(crate) fn take_u8(buf: &mut impl Buf) -> FromWireResult<u8> {
    if buf.remaining() < 1 {
        return Err(FromWireError::InsufficientData);
    }
    Ok(buf.get_u8())
}

pub(crate) fn take_u16(buf: &mut impl Buf) -> FromWireResult<u16> {
    if buf.remaining() < 2 {
        return Err(FromWireError::InsufficientData);
    }
    Ok(buf.get_u16())
}

pub(crate) fn take_u32(buf: &mut impl Buf) -> FromWireResult<u32> {
    if buf.remaining() < 4 {
        return Err(FromWireError::InsufficientData);
    }
    Ok(buf.get_u32())
}

pub(crate) fn take_u64(buf: &mut impl Buf) -> FromWireResult<u64> {
    if buf.remaining() < 8 {
        return Err(FromWireError::InsufficientData);
    }
    Ok(buf.get_u64())
}

pub(crate) fn take_bool(buf: &mut impl Buf) -> FromWireResult<bool> {
    match take_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(FromWireError::InvalidBool),
    }
}

pub(crate) fn take_enum<T>(buf: &mut impl Buf, what: &'static str) -> FromWireResult<T>
where
    T: TryFromPrimitive<Primitive = u8>,
{
    let value = take_u8(buf)?;
    T::try_from_primitive(value).map_err(|_| FromWireError::InvalidEnum(what, value))
}
