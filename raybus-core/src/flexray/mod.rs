//! The FlexRay bus model.
//!
//! Consumes Config / Status / Lpdu PDUs from the codec stream, drives
//! the communication-cycle [`Engine`] and the node [`BusState`], and
//! publishes a Status PDU plus the step's delivered LPDUs back through
//! a companion codec.

mod engine;
mod state;

pub use engine::{Engine, Lpdu, ShiftRejected, SlotOutcome};
pub use state::{BusState, NodeState};

use bytes::Bytes;
use delegate::delegate;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::mime::MimeProfile;
use crate::wire::{
    ChannelStatus, FlexrayMetadata, FlexrayStatus, FlexrayTransport, FrameIndicators, LpduFrame,
    LpduStatus, NodeIdent, Pdu, PocCommand, Transport, TransceiverState,
};
use crate::{CodecResult, MAX_VCN, metrics};

/// Wall-clock simulation step driven per `progress` call, in seconds.
pub(crate) const SIM_STEP_SIZE: f64 = 0.0005;

/// A bus model bound to a codec instance.
///
/// The reader drives every decoded PDU through `consume`; once the
/// stream is exhausted it calls `progress` exactly once per step, with
/// the companion codec to emit produced PDUs into.
pub(crate) trait BusModel: std::fmt::Debug {
    /// Consume one inbound PDU. Returns false when the PDU is not for
    /// this model.
    fn consume(&mut self, pdu: Pdu) -> bool;

    /// Advance the bus by one simulation step and emit produced PDUs.
    fn progress(&mut self, out: &mut Codec) -> CodecResult<()>;

    /// Release all model state.
    fn close(&mut self);
}

/// The FlexRay bus model: engine, node states and PDU glue.
#[derive(Debug)]
pub struct FlexrayBusModel {
    node_ident: NodeIdent,
    power_on: bool,
    state: BusState,
    engine: Engine,
}

impl FlexrayBusModel {
    /// Build the model for a codec profile.
    ///
    /// The local node identity is taken from the profile's `ecu_id`,
    /// `cc_id` and `swc_id` parameters. Virtual-coldstart nodes
    /// requested with the `vcn` key are registered immediately, capped
    /// at [`MAX_VCN`]; their identities share the local ECU/CC with
    /// software-component ids counting up from `vcn_fid + 1`.
    pub fn new(profile: &MimeProfile) -> Self {
        let node_ident = NodeIdent {
            ecu_id: u16::from(profile.ecu_id),
            cc_id: u16::from(profile.cc_id),
            swc_id: u32::from(profile.swc_id),
        };
        let mut state = BusState::new();
        for index in 0..u32::from(profile.vcn_count).min(MAX_VCN as u32) {
            state.register_vcs_node(NodeIdent {
                swc_id: u32::from(profile.vcn_key_slot_id) + index + 1,
                ..node_ident
            });
        }
        Self {
            node_ident,
            power_on: profile.power_on,
            state,
            engine: Engine::new(node_ident, SIM_STEP_SIZE),
        }
    }

    delegate! {
        to self.state {
            /// The most recently calculated bus condition.
            pub fn bus_condition(&self) -> TransceiverState;
            /// The consolidated state of a node, if registered.
            pub fn node_state(&self, node_ident: NodeIdent) -> Option<NodeState>;
            /// Number of registered virtual-coldstart nodes.
            pub fn vcs_node_count(&self) -> usize;
        }
        to self.engine {
            /// Cycle position in macroticks.
            pub fn pos_mt(&self) -> u32;
            /// Cycle counter, 0..=63.
            pub fn pos_cycle(&self) -> u8;
        }
    }

    fn status_pdu(&self) -> Pdu {
        let node_state = self
            .state
            .node_state(self.node_ident)
            .unwrap_or(NodeState::new(self.node_ident));
        Pdu {
            ecu_id: self.node_ident.ecu_id,
            swc_id: self.node_ident.swc_id,
            transport: Transport::Flexray(FlexrayTransport {
                node_ident: self.node_ident,
                metadata: FlexrayMetadata::Status(FlexrayStatus {
                    macrotick: self.engine.pos_mt() as u16,
                    cycle: self.engine.pos_cycle(),
                    channel: [
                        ChannelStatus {
                            poc_state: node_state.poc_state,
                            tcvr_state: node_state.tcvr_state,
                            poc_command: PocCommand::None,
                        },
                        ChannelStatus::default(),
                    ],
                }),
            }),
            ..Default::default()
        }
    }

    fn lpdu_pdu(&self, lpdu: &Lpdu) -> Pdu {
        Pdu {
            id: u32::from(lpdu.config.slot_id),
            payload: lpdu
                .payload
                .as_deref()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            ecu_id: self.node_ident.ecu_id,
            swc_id: self.node_ident.swc_id,
            transport: Transport::Flexray(FlexrayTransport {
                node_ident: self.node_ident,
                metadata: FlexrayMetadata::Lpdu(LpduFrame {
                    cycle: lpdu.cycle,
                    indicators: FrameIndicators::new(),
                    status: lpdu.config.status,
                    frame_config_index: lpdu.config.frame_table_index,
                }),
            }),
        }
    }
}

impl BusModel for FlexrayBusModel {
    fn consume(&mut self, pdu: Pdu) -> bool {
        let Transport::Flexray(flexray) = &pdu.transport else {
            return false;
        };
        let node_ident = flexray.node_ident;

        match &flexray.metadata {
            FlexrayMetadata::None => {
                // No metadata content to decode.
            }
            FlexrayMetadata::Config(config) => {
                debug!(
                    ecu_id = node_ident.ecu_id,
                    cc_id = node_ident.cc_id,
                    swc_id = node_ident.swc_id,
                    "flexray consume: config"
                );
                // The config speaks for the node that sent it.
                let mut config = (**config).clone();
                config.node_ident = node_ident;
                if let Err(err) = self.engine.process_config(&config) {
                    warn!(%err, "flexray config rejected");
                }
                for vcs_ident in config.vcn.iter().take(MAX_VCN) {
                    self.state.register_vcs_node(*vcs_ident);
                }
                self.state
                    .register_node(node_ident, self.power_on, !self.power_on);
            }
            FlexrayMetadata::Status(status) => {
                debug!(
                    ecu_id = node_ident.ecu_id,
                    cc_id = node_ident.cc_id,
                    swc_id = node_ident.swc_id,
                    "flexray consume: status"
                );
                // Channel A carries the controller's command.
                self.state
                    .push_command(node_ident, status.channel[0].poc_command);
            }
            FlexrayMetadata::Lpdu(lpdu) => {
                debug!(
                    ecu_id = node_ident.ecu_id,
                    slot_id = pdu.id,
                    payload_len = pdu.payload.len(),
                    "flexray consume: lpdu"
                );
                match lpdu.status {
                    LpduStatus::Received | LpduStatus::NotReceived => {
                        // Receive endpoints have nothing to arm; the
                        // engine delivers into them regardless.
                    }
                    status => {
                        if let Err(err) = self.engine.set_payload(
                            node_ident.as_u64(),
                            pdu.id as u16,
                            status,
                            &pdu.payload,
                        ) {
                            warn!(%err, slot_id = pdu.id, "lpdu payload not applied");
                        }
                    }
                }
            }
        }

        true
    }

    fn progress(&mut self, out: &mut Codec) -> CodecResult<()> {
        debug!("flexray progress: bus condition");
        self.state.calculate_bus_condition();

        if self.state.bus_condition() == TransceiverState::FrameSync {
            debug!("flexray progress: consume slots");
            self.engine.calculate_budget(SIM_STEP_SIZE)?;
            while self.engine.consume_slot() == SlotOutcome::Consumed {}
        }

        out.write(&self.status_pdu())?;
        for pdu in self
            .engine
            .inform_list()
            .map(|lpdu| self.lpdu_pdu(lpdu))
            .collect::<Vec<_>>()
        {
            debug!(
                slot_id = pdu.id,
                payload_len = pdu.payload.len(),
                "flexray progress: lpdu"
            );
            metrics::lpdu_published();
            out.write(&pdu)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.release();
        self.engine.release_config();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BufferStream, Whence};
    use crate::wire::{BitRate, Channel, Direction, FlexrayConfig, LpduConfig, PocState};
    use crate::{Codec, CodecError};

    const MIMETYPE: &str = "application/x-automotive-bus; \
        interface=stream;type=pdu;schema=fbs;\
        ecu_id=1;vcn=2;model=flexray";

    const BUFFER_LEN: usize = 1024;

    fn cc_config() -> FlexrayConfig {
        FlexrayConfig {
            bit_rate: BitRate::Rate10,
            channel_enable: Channel::A,
            macrotick_per_cycle: 3361,
            microtick_per_cycle: 200_000,
            network_idle_start: 3361 - 5 - 1,
            static_slot_length: 55,
            static_slot_count: 38,
            minislot_length: 6,
            minislot_count: 211,
            static_slot_payload_length: 32 * 2, // word to byte
            coldstart_attempts: 8,
            ..Default::default()
        }
    }

    fn config_pdu(config: FlexrayConfig) -> Pdu {
        Pdu {
            transport: Transport::Flexray(FlexrayTransport {
                node_ident: NodeIdent::default(),
                metadata: FlexrayMetadata::Config(Box::new(config)),
            }),
            ..Default::default()
        }
    }

    fn command_pdu(poc_command: PocCommand) -> Pdu {
        Pdu {
            transport: Transport::Flexray(FlexrayTransport {
                node_ident: NodeIdent::default(),
                metadata: FlexrayMetadata::Status(FlexrayStatus {
                    channel: [
                        ChannelStatus {
                            poc_command,
                            ..Default::default()
                        },
                        ChannelStatus::default(),
                    ],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }
    }

    fn push_startup(codec: &mut Codec, config: FlexrayConfig) {
        codec.truncate().unwrap();
        codec.write(&config_pdu(config)).unwrap();
        codec.write(&command_pdu(PocCommand::Config)).unwrap();
        codec.write(&command_pdu(PocCommand::Ready)).unwrap();
        codec.write(&command_pdu(PocCommand::Run)).unwrap();
        codec.flush().unwrap();
    }

    fn expect_status(pdu: &Pdu) -> FlexrayStatus {
        let Transport::Flexray(flexray) = &pdu.transport else {
            panic!("expected flexray transport, got {pdu:?}");
        };
        let FlexrayMetadata::Status(status) = &flexray.metadata else {
            panic!("expected status metadata, got {flexray:?}");
        };
        *status
    }

    fn expect_lpdu(pdu: &Pdu) -> LpduFrame {
        let Transport::Flexray(flexray) = &pdu.transport else {
            panic!("expected flexray transport, got {pdu:?}");
        };
        let FlexrayMetadata::Lpdu(lpdu) = &flexray.metadata else {
            panic!("expected lpdu metadata, got {flexray:?}");
        };
        *lpdu
    }

    /// Single node with two virtual-coldstart peers reaches
    /// NormalActive within the first simulation step.
    #[test]
    fn single_node_two_vcn_reaches_normal_active() {
        let stream = BufferStream::with_capacity(BUFFER_LEN);
        let mut codec = Codec::open(MIMETYPE, stream).unwrap();

        push_startup(&mut codec, cc_config());
        codec.seek(0, Whence::Set).unwrap();

        let pdu = codec.read().unwrap();
        let status = expect_status(&pdu);
        assert_eq!(status.cycle, 0);
        assert_eq!(status.macrotick, 330);
        assert_eq!(status.channel[0].poc_state, PocState::NormalActive);
        assert_eq!(status.channel[0].tcvr_state, TransceiverState::FrameSync);

        assert_eq!(codec.read().unwrap_err(), CodecError::NoMessage);
    }

    /// Static-slot Tx→Rx delivery across two simulation steps.
    #[test]
    fn static_slot_txrx_delivery() {
        let stream = BufferStream::with_capacity(BUFFER_LEN);
        let mut codec = Codec::open(MIMETYPE, stream).unwrap();

        let mut config = cc_config();
        config.frame_config = vec![
            LpduConfig {
                slot_id: 7,
                payload_length: 64,
                base_cycle: 0,
                cycle_repetition: 1,
                direction: Direction::Tx,
                ..Default::default()
            },
            LpduConfig {
                slot_id: 7,
                payload_length: 64,
                base_cycle: 0,
                cycle_repetition: 1,
                frame_table_index: 1,
                direction: Direction::Rx,
                ..Default::default()
            },
        ];
        push_startup(&mut codec, config);

        codec
            .write(&Pdu {
                id: 7,
                payload: Bytes::from_static(b"hello world"),
                transport: Transport::Flexray(FlexrayTransport {
                    node_ident: NodeIdent::default(),
                    metadata: FlexrayMetadata::Lpdu(LpduFrame {
                        frame_config_index: 0,
                        status: LpduStatus::NotTransmitted,
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            })
            .unwrap();
        codec
            .write(&Pdu {
                id: 7,
                transport: Transport::Flexray(FlexrayTransport {
                    node_ident: NodeIdent::default(),
                    metadata: FlexrayMetadata::Lpdu(LpduFrame {
                        frame_config_index: 1,
                        status: LpduStatus::NotReceived,
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            })
            .unwrap();
        codec.flush().unwrap();
        codec.seek(0, Whence::Set).unwrap();

        // Step 1: slot 7 is not reached (six slots fit the budget).
        let status = expect_status(&codec.read().unwrap());
        assert_eq!(status.cycle, 0);
        assert_eq!(status.macrotick, 330);
        assert_eq!(codec.read().unwrap_err(), CodecError::NoMessage);

        // Step 2: slot 7 transfers; Tx and Rx are published.
        codec.truncate().unwrap();
        codec.seek(0, Whence::Set).unwrap();
        let status = expect_status(&codec.read().unwrap());
        assert_eq!(status.cycle, 0);
        assert_eq!(status.macrotick, 660);
        assert_eq!(status.channel[0].poc_state, PocState::NormalActive);
        assert_eq!(status.channel[0].tcvr_state, TransceiverState::FrameSync);

        let tx_pdu = codec.read().unwrap();
        let tx = expect_lpdu(&tx_pdu);
        assert_eq!(tx_pdu.id, 7);
        assert_eq!(tx.frame_config_index, 0);
        assert_eq!(tx.status, LpduStatus::Transmitted);

        let rx_pdu = codec.read().unwrap();
        let rx = expect_lpdu(&rx_pdu);
        assert_eq!(rx_pdu.id, 7);
        assert_eq!(rx.frame_config_index, 1);
        assert_eq!(rx.status, LpduStatus::Received);
        assert_eq!(rx_pdu.payload.len(), 64);
        assert_eq!(&rx_pdu.payload[..11], b"hello world");
        assert!(rx_pdu.payload[11..].iter().all(|&byte| byte == 0));

        assert_eq!(codec.read().unwrap_err(), CodecError::NoMessage);
    }

    /// Without frame synchronization the engine does not advance, but a
    /// status PDU is still produced.
    #[test]
    fn no_frame_sync_no_progress() {
        let stream = BufferStream::with_capacity(BUFFER_LEN);
        let mut codec = Codec::open(
            "application/x-automotive-bus; interface=stream;type=pdu;schema=fbs;\
             ecu_id=1;model=flexray",
            stream,
        )
        .unwrap();

        codec.truncate().unwrap();
        codec.write(&config_pdu(cc_config())).unwrap();
        codec.flush().unwrap();
        codec.seek(0, Whence::Set).unwrap();

        let status = expect_status(&codec.read().unwrap());
        assert_eq!(status.cycle, 0);
        assert_eq!(status.macrotick, 0);
        // Registered and powered, but never commanded out of config.
        assert_eq!(status.channel[0].poc_state, PocState::DefaultConfig);
    }

    /// The `vcn` MIME key is capped at the same bound as the
    /// Config-PDU VCN list.
    #[test]
    fn mime_vcn_count_is_bounded() {
        let profile = MimeProfile::parse(
            "application/x-automotive-bus; interface=stream;type=pdu;schema=fbs;\
             ecu_id=1;vcn=20;model=flexray",
        )
        .unwrap();
        let model = FlexrayBusModel::new(&profile);
        assert_eq!(model.vcs_node_count(), MAX_VCN);
    }

    /// Non-FlexRay PDUs are dropped by a model-bound codec.
    #[test]
    fn non_flexray_pdus_are_dropped() {
        let stream = BufferStream::with_capacity(BUFFER_LEN);
        let mut codec = Codec::open(MIMETYPE, stream).unwrap();

        codec.truncate().unwrap();
        codec
            .write(&Pdu {
                id: 1,
                payload: Bytes::from_static(b"not flexray"),
                ..Default::default()
            })
            .unwrap();
        codec.flush().unwrap();
        codec.seek(0, Whence::Set).unwrap();

        // The model still produces its status.
        let pdu = codec.read().unwrap();
        expect_status(&pdu);
        assert_eq!(codec.read().unwrap_err(), CodecError::NoMessage);
    }

    /// `pwr=off` keeps the node unpowered: commands advance the
    /// controller but never surface on the transceiver.
    #[test]
    fn power_off_node_stays_dark() {
        let stream = BufferStream::with_capacity(BUFFER_LEN);
        let mut codec = Codec::open(
            "application/x-automotive-bus; interface=stream;type=pdu;schema=fbs;\
             ecu_id=1;vcn=2;model=flexray;pwr=off",
            stream,
        )
        .unwrap();

        push_startup(&mut codec, cc_config());
        codec.seek(0, Whence::Set).unwrap();

        let status = expect_status(&codec.read().unwrap());
        assert_eq!(status.channel[0].tcvr_state, TransceiverState::NoPower);
        // The controller advanced, gated at the transceiver only.
        assert_eq!(status.channel[0].poc_state, PocState::NormalActive);
        // Budget still ran: the two VCS peers hold the bus in frame sync.
        assert_eq!(status.macrotick, 330);
    }
}
