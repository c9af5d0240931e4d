//! The core raybus protocol: a bus-simulation codec for
//! software-in-the-loop automotive nodes.
//!
//! SIL nodes exchange PDUs over an in-memory byte stream while a local
//! bus model reproduces the FlexRay communication cycle: static and
//! dynamic TDMA slots, per-node controller (POC) state machines, and
//! Tx↔Rx frame delivery.

#![warn(missing_docs)]

mod codec;
mod error;
mod flexray;
mod metrics;
mod mime;
mod stream;
mod wire;

// Reexport our own types
pub use codec::Codec;
pub use error::{CodecError, CodecResult};
pub use flexray::{BusState, Engine, FlexrayBusModel, Lpdu, NodeState, ShiftRejected, SlotOutcome};
pub use mime::{MIME_CONTENT_TYPE, MimeProfile, ModelKind};
pub use stream::{BufferStream, Whence};
pub use wire::{
    BitRate, CanFrameFormat, CanFrameType, CanMetadata, Channel, ChannelStatus, ConfigOp,
    Direction, DoIpAdapter, FlexrayConfig, FlexrayMetadata, FlexrayStatus, FlexrayTransport,
    FrameIndicators, FromWireError, FromWireResult, IpAddrPair, IpMetadata, IpProtocol,
    LpduConfig, LpduFrame, LpduStatus, MetadataType, NodeIdent, Pdu, PocCommand, PocState,
    SocketAdapter, SomeIpAdapter, StructMetadata, TransceiverState, Transport, TransportType,
    TransmitMode,
};

/// Largest payload an LPDU may carry, in bytes.
pub const MAX_LPDU_PAYLOAD: usize = 254;

/// Communication cycles count modulo this value.
pub const MAX_CYCLE: u8 = 64;

/// Upper bound on virtual-coldstart nodes carried by one Config PDU.
pub const MAX_VCN: usize = 8;
