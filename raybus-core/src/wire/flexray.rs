use bitfield_struct::bitfield;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{FromWireResult, take_enum, take_u8, take_u16, take_u32};
use crate::MAX_VCN;

/// Identifies a node taking part in the bus simulation.
///
/// All software components sharing an ECU and communication controller
/// represent the same physical node; [`NodeIdent::zeroed_swc`] collapses
/// them for node-level bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdent {
    /// ECU identifier
    pub ecu_id: u16,
    /// Communication-controller identifier
    pub cc_id: u16,
    /// Software-component identifier
    pub swc_id: u32,
}

impl NodeIdent {
    /// Pack the identifier into a single comparison key.
    pub fn as_u64(&self) -> u64 {
        u64::from(self.ecu_id) | u64::from(self.cc_id) << 16 | u64::from(self.swc_id) << 32
    }

    /// Unpack an identifier from its key form.
    pub fn from_u64(key: u64) -> Self {
        Self {
            ecu_id: key as u16,
            cc_id: (key >> 16) as u16,
            swc_id: (key >> 32) as u32,
        }
    }

    /// The identifier with the software-component field cleared.
    pub fn zeroed_swc(&self) -> Self {
        Self { swc_id: 0, ..*self }
    }

    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        Ok(Self {
            ecu_id: take_u16(buf)?,
            cc_id: take_u16(buf)?,
            swc_id: take_u32(buf)?,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.put_u16(self.ecu_id);
        buf.put_u16(self.cc_id);
        buf.put_u32(self.swc_id);
    }
}

/// FlexRay bus bit rate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BitRate {
    /// No configuration (null config)
    #[default]
    None = 0,
    /// 10 Mbit/s
    Rate10 = 1,
    /// 5 Mbit/s
    Rate5 = 2,
    /// 2.5 Mbit/s
    Rate2_5 = 3,
}

impl BitRate {
    /// Microtick duration in nanoseconds at this bit rate.
    pub fn microtick_ns(&self) -> u32 {
        match self {
            BitRate::None => 0,
            BitRate::Rate10 | BitRate::Rate5 => 25,
            BitRate::Rate2_5 => 50,
        }
    }

    /// Duration of one bus bit in nanoseconds at this bit rate.
    pub fn bittime_ns(&self) -> u32 {
        match self {
            BitRate::None => 1, // not used, safe value
            BitRate::Rate10 => 100,
            BitRate::Rate5 => 200,
            BitRate::Rate2_5 => 400,
        }
    }
}

/// Transfer direction of an LPDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Direction {
    /// No direction configured
    #[default]
    None = 0,
    /// Receive endpoint
    Rx = 1,
    /// Transmit endpoint
    Tx = 2,
}

/// FlexRay channel selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Channel {
    /// No channel
    #[default]
    None = 0,
    /// Channel A
    A = 1,
    /// Channel B
    B = 2,
    /// Both channels
    AB = 3,
}

/// Transmit mode of an LPDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TransmitMode {
    /// Unspecified; behaves as single shot
    #[default]
    None = 0,
    /// Transmit on every matching slot
    Continuous = 1,
    /// Transmit once, then require re-arming
    SingleShot = 2,
}

/// Transfer status of an LPDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum LpduStatus {
    /// No status
    #[default]
    None = 0,
    /// Transmission completed
    Transmitted = 1,
    /// Transmission pending
    NotTransmitted = 2,
    /// Reception completed
    Received = 3,
    /// Reception pending
    NotReceived = 4,
}

/// Protocol Operation Control state of a node's controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PocState {
    /// Initial state, WUP detection only
    #[default]
    DefaultConfig = 0,
    /// Configuration in progress
    Config = 1,
    /// Configured, awaiting startup
    Ready = 2,
    /// Sending wakeup pattern
    Wakeup = 3,
    /// Startup in progress
    Startup = 4,
    /// Synchronized and active
    NormalActive = 5,
    /// Synchronization degraded
    NormalPassive = 6,
    /// Halted by command
    Halt = 7,
    /// Frozen on error
    Freeze = 8,
    /// State unknown
    Undefined = 9,
}

/// Observable bus-driver state of a node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TransceiverState {
    /// No state
    #[default]
    None = 0,
    /// Transceiver unpowered
    NoPower = 1,
    /// Powered but not attached to the bus
    NoConnection = 2,
    /// Attached, no signal observed
    NoSignal = 3,
    /// Collision-avoidance symbol observed
    Cas = 4,
    /// Wakeup pattern observed
    Wup = 5,
    /// Frame synchronization achieved
    FrameSync = 6,
    /// Frame decoding errors observed
    FrameError = 7,
}

/// Command applied to a node's Protocol Operation Control.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PocCommand {
    /// No command
    #[default]
    None = 0,
    /// Enter configuration
    Config = 1,
    /// Leave configuration
    Ready = 2,
    /// Send wakeup pattern
    Wakeup = 3,
    /// Start communication
    Run = 4,
    /// Leave single-slot mode
    AllSlots = 5,
    /// Halt at cycle end
    Halt = 6,
    /// Halt immediately
    Freeze = 7,
    /// Permit coldstart
    AllowColdstart = 8,
    /// No operation
    Nop = 9,
}

/// Operation requested by a Config PDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ConfigOp {
    /// Apply the communication-cycle configuration
    #[default]
    Set = 0,
    /// Replace the frame table
    FrameTableSet = 1,
    /// Merge into the frame table
    FrameTableMerge = 2,
    /// Delete from the frame table
    FrameTableDelete = 3,
}

/// Kind of FlexRay metadata carried by a PDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MetadataType {
    /// No metadata
    #[default]
    None = 0,
    /// Controller configuration
    Config = 1,
    /// Controller/cycle status
    Status = 2,
    /// LPDU transfer
    Lpdu = 3,
}

/// Frame-header indicator bits of an LPDU frame.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct FrameIndicators {
    /// Null frame indicator
    pub null_frame: bool,
    /// Sync frame indicator
    pub sync_frame: bool,
    /// Startup frame indicator
    pub startup_frame: bool,
    /// Payload preamble indicator
    pub payload_preamble: bool,
    #[bits(4)]
    __: u8,
}

/// Per-LPDU configuration, one row of a node's frame table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LpduConfig {
    /// Slot the LPDU is bound to, 1..=2047
    pub slot_id: u16,
    /// Configured payload length in bytes, 0..=254
    pub payload_length: u8,
    /// Cycle filter modulus, 0..=63; 0 means never
    pub cycle_repetition: u8,
    /// Cycle filter base, 0..=63
    pub base_cycle: u8,
    /// Index into the sender's frame table (opaque to the bus model)
    pub frame_table_index: u16,
    /// Index into the controller's LPDU table (opaque to the bus model)
    pub lpdu_table_index: u16,
    /// Transfer direction
    pub direction: Direction,
    /// Channel assignment; channel A is authoritative
    pub channel: Channel,
    /// Transmit mode
    pub transmit_mode: TransmitMode,
    /// Transfer status; doubles as the runtime status in the engine
    pub status: LpduStatus,
}

impl LpduConfig {
    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        Ok(Self {
            slot_id: take_u16(buf)?,
            payload_length: take_u8(buf)?,
            cycle_repetition: take_u8(buf)?,
            base_cycle: take_u8(buf)?,
            frame_table_index: take_u16(buf)?,
            lpdu_table_index: take_u16(buf)?,
            direction: take_enum(buf, "Direction")?,
            channel: take_enum(buf, "Channel")?,
            transmit_mode: take_enum(buf, "TransmitMode")?,
            status: take_enum(buf, "LpduStatus")?,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.put_u16(self.slot_id);
        buf.put_u8(self.payload_length);
        buf.put_u8(self.cycle_repetition);
        buf.put_u8(self.base_cycle);
        buf.put_u16(self.frame_table_index);
        buf.put_u16(self.lpdu_table_index);
        buf.put_u8(self.direction.into());
        buf.put_u8(self.channel.into());
        buf.put_u8(self.transmit_mode.into());
        buf.put_u8(self.status.into());
    }
}

/// Communication-cycle and frame-table configuration of one node.
///
/// `node_ident` is not carried inside the Config block on the wire; the
/// enclosing transport's node identifier is forced into it when the
/// bus model consumes the PDU.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlexrayConfig {
    /// Identity of the configuring node (from the transport)
    pub node_ident: NodeIdent,
    /// Requested operation
    pub operation: ConfigOp,
    /// Macroticks per communication cycle, 10..16000
    pub macrotick_per_cycle: u16,
    /// Microticks per communication cycle, 640..640000
    pub microtick_per_cycle: u32,
    /// Macrotick offset at which network idle starts, 7..15997
    pub network_idle_start: u16,
    /// Static slot length in macroticks, 4..659
    pub static_slot_length: u16,
    /// Number of static slots, 2..1023
    pub static_slot_count: u16,
    /// Minislot length in macroticks, 2..63
    pub minislot_length: u8,
    /// Number of minislots, 0..7986
    pub minislot_count: u16,
    /// Payload length of static slots in bytes, 0..254
    pub static_slot_payload_length: u32,
    /// Bus bit rate
    pub bit_rate: BitRate,
    /// Channels enabled for this node
    pub channel_enable: Channel,
    /// Whether the node may coldstart the cluster
    pub coldstart_node: bool,
    /// Whether the node sends sync frames
    pub sync_node: bool,
    /// Permitted coldstart attempts, 2..31
    pub coldstart_attempts: u8,
    /// Wakeup channel, 0 = A, 1 = B
    pub wakeup_channel_select: u8,
    /// Whether single-slot mode is active until an AllSlots command
    pub single_slot_enabled: bool,
    /// Key slot for coldstart/sync frames
    pub key_slot_id: u16,
    /// Virtual-coldstart node identities, at most [`MAX_VCN`]
    pub vcn: Vec<NodeIdent>,
    /// Frame table rows
    pub frame_config: Vec<LpduConfig>,
}

impl FlexrayConfig {
    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        let operation = take_enum(buf, "ConfigOp")?;
        let macrotick_per_cycle = take_u16(buf)?;
        let microtick_per_cycle = take_u32(buf)?;
        let network_idle_start = take_u16(buf)?;
        let static_slot_length = take_u16(buf)?;
        let static_slot_count = take_u16(buf)?;
        let minislot_length = take_u8(buf)?;
        let minislot_count = take_u16(buf)?;
        let static_slot_payload_length = take_u32(buf)?;
        let bit_rate = take_enum(buf, "BitRate")?;
        let channel_enable = take_enum(buf, "Channel")?;
        let coldstart_node = super::take_bool(buf)?;
        let sync_node = super::take_bool(buf)?;
        let coldstart_attempts = take_u8(buf)?;
        let wakeup_channel_select = take_u8(buf)?;
        let single_slot_enabled = super::take_bool(buf)?;
        let key_slot_id = take_u16(buf)?;

        let vcn_count = usize::from(take_u8(buf)?);
        let mut vcn = Vec::with_capacity(vcn_count.min(MAX_VCN));
        for _ in 0..vcn_count {
            vcn.push(NodeIdent::try_from_wire(buf)?);
        }

        let frame_count = usize::from(take_u16(buf)?);
        let mut frame_config = Vec::new();
        for _ in 0..frame_count {
            frame_config.push(LpduConfig::try_from_wire(buf)?);
        }

        Ok(Self {
            node_ident: NodeIdent::default(),
            operation,
            macrotick_per_cycle,
            microtick_per_cycle,
            network_idle_start,
            static_slot_length,
            static_slot_count,
            minislot_length,
            minislot_count,
            static_slot_payload_length,
            bit_rate,
            channel_enable,
            coldstart_node,
            sync_node,
            coldstart_attempts,
            wakeup_channel_select,
            single_slot_enabled,
            key_slot_id,
            vcn,
            frame_config,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.put_u8(self.operation.into());
        buf.put_u16(self.macrotick_per_cycle);
        buf.put_u32(self.microtick_per_cycle);
        buf.put_u16(self.network_idle_start);
        buf.put_u16(self.static_slot_length);
        buf.put_u16(self.static_slot_count);
        buf.put_u8(self.minislot_length);
        buf.put_u16(self.minislot_count);
        buf.put_u32(self.static_slot_payload_length);
        buf.put_u8(self.bit_rate.into());
        buf.put_u8(self.channel_enable.into());
        buf.put_u8(u8::from(self.coldstart_node));
        buf.put_u8(u8::from(self.sync_node));
        buf.put_u8(self.coldstart_attempts);
        buf.put_u8(self.wakeup_channel_select);
        buf.put_u8(u8::from(self.single_slot_enabled));
        buf.put_u16(self.key_slot_id);

        let vcn = &self.vcn[..self.vcn.len().min(MAX_VCN)];
        buf.put_u8(vcn.len() as u8);
        for ident in vcn {
            ident.append_to_wire(buf);
        }

        buf.put_u16(self.frame_config.len() as u16);
        for lpdu_config in &self.frame_config {
            lpdu_config.append_to_wire(buf);
        }
    }
}

/// Per-channel status of a node's controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Observable transceiver state
    pub tcvr_state: TransceiverState,
    /// Protocol Operation Control state
    pub poc_state: PocState,
    /// Command issued by the controller
    pub poc_command: PocCommand,
}

/// Communication-cycle status of one node.
///
/// Channel 0 is channel A (authoritative); channel 1 is channel B,
/// carried but not evaluated by the bus model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlexrayStatus {
    /// Cycle position in macroticks
    pub macrotick: u16,
    /// Cycle counter, 0..=63
    pub cycle: u8,
    /// Channel status, A then B
    pub channel: [ChannelStatus; 2],
}

impl FlexrayStatus {
    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        let macrotick = take_u16(buf)?;
        let cycle = take_u8(buf)?;
        let mut channel = [ChannelStatus::default(); 2];
        for status in &mut channel {
            *status = ChannelStatus {
                tcvr_state: take_enum(buf, "TransceiverState")?,
                poc_state: take_enum(buf, "PocState")?,
                poc_command: take_enum(buf, "PocCommand")?,
            };
        }
        Ok(Self {
            macrotick,
            cycle,
            channel,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.put_u16(self.macrotick);
        buf.put_u8(self.cycle);
        for status in &self.channel {
            buf.put_u8(status.tcvr_state.into());
            buf.put_u8(status.poc_state.into());
            buf.put_u8(status.poc_command.into());
        }
    }
}

/// LPDU transfer metadata: one frame delivered to or from a slot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LpduFrame {
    /// Cycle in which the transfer happened
    pub cycle: u8,
    /// Frame-header indicator bits
    pub indicators: FrameIndicators,
    /// Transfer status
    pub status: LpduStatus,
    /// Index into the sender's frame table
    pub frame_config_index: u16,
}

impl LpduFrame {
    /// Wire size in bytes.
    pub(crate) const WIRE_SIZE: usize = 5;

    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        Ok(Self {
            cycle: take_u8(buf)?,
            indicators: FrameIndicators::from_bits(take_u8(buf)?),
            status: take_enum(buf, "LpduStatus")?,
            frame_config_index: take_u16(buf)?,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.reserve(Self::WIRE_SIZE);
        buf.put_u8(self.cycle);
        buf.put_u8(self.indicators.into_bits());
        buf.put_u8(self.status.into());
        buf.put_u16(self.frame_config_index);
    }
}

/// FlexRay metadata carried by a PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlexrayMetadata {
    /// No metadata content
    None,
    /// Controller configuration
    Config(Box<FlexrayConfig>),
    /// Controller/cycle status
    Status(FlexrayStatus),
    /// LPDU transfer
    Lpdu(LpduFrame),
}

impl FlexrayMetadata {
    /// The wire discriminant of this metadata.
    pub fn metadata_type(&self) -> MetadataType {
        match self {
            FlexrayMetadata::None => MetadataType::None,
            FlexrayMetadata::Config(_) => MetadataType::Config,
            FlexrayMetadata::Status(_) => MetadataType::Status,
            FlexrayMetadata::Lpdu(_) => MetadataType::Lpdu,
        }
    }
}

/// FlexRay transport block of a PDU.
///
/// Wire format (variable length):
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            ecu id             |            cc id              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            swc id                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | metadata type |  metadata (per type) ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexrayTransport {
    /// Identity of the sending node
    pub node_ident: NodeIdent,
    /// Metadata content
    pub metadata: FlexrayMetadata,
}

impl FlexrayTransport {
    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        let node_ident = NodeIdent::try_from_wire(buf)?;
        let metadata = match take_enum(buf, "MetadataType")? {
            MetadataType::None => FlexrayMetadata::None,
            MetadataType::Config => {
                FlexrayMetadata::Config(Box::new(FlexrayConfig::try_from_wire(buf)?))
            }
            MetadataType::Status => FlexrayMetadata::Status(FlexrayStatus::try_from_wire(buf)?),
            MetadataType::Lpdu => FlexrayMetadata::Lpdu(LpduFrame::try_from_wire(buf)?),
        };
        Ok(Self {
            node_ident,
            metadata,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        self.node_ident.append_to_wire(buf);
        buf.put_u8(self.metadata.metadata_type().into());
        match &self.metadata {
            FlexrayMetadata::None => {}
            FlexrayMetadata::Config(config) => config.append_to_wire(buf),
            FlexrayMetadata::Status(status) => status.append_to_wire(buf),
            FlexrayMetadata::Lpdu(lpdu) => lpdu.append_to_wire(buf),
        }
    }
}
