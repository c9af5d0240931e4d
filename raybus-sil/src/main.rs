//! A virtual ECU node: drives a FlexRay controller through startup and
//! exchanges a static-slot frame with itself across simulation steps.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::info;

use raybus_core::{
    BitRate, BufferStream, Channel, ChannelStatus, Codec, CodecError, Direction, FlexrayConfig,
    FlexrayMetadata, FlexrayStatus, FlexrayTransport, LpduConfig, LpduFrame, LpduStatus, Pdu,
    PocCommand, Transport, Whence,
};

#[derive(Parser, Debug)]
#[command(
    about = "raybus virtual ECU - drive a simulated FlexRay node through startup and a frame exchange",
    version
)]
struct Args {
    /// ECU identifier of the simulated node
    #[clap(long, default_value_t = 1)]
    ecu_id: u8,

    /// Number of virtual-coldstart peers holding the bus in frame sync
    #[clap(long, default_value_t = 2)]
    vcn: u8,

    /// Static slot carrying the Tx/Rx frame pair
    #[clap(long, default_value_t = 7)]
    slot: u16,

    /// Number of simulation steps to run
    #[clap(long, default_value_t = 8)]
    steps: u32,

    /// Payload transmitted in the slot
    #[clap(long, default_value = "hello world")]
    payload: String,

    /// Log level
    #[clap(long, default_value = "info")]
    log_level: tracing::Level,
}

fn config_pdu(slot_id: u16) -> Pdu {
    let config = FlexrayConfig {
        bit_rate: BitRate::Rate10,
        channel_enable: Channel::A,
        macrotick_per_cycle: 3361,
        microtick_per_cycle: 200_000,
        network_idle_start: 3355,
        static_slot_length: 55,
        static_slot_count: 38,
        minislot_length: 6,
        minislot_count: 211,
        static_slot_payload_length: 64,
        coldstart_attempts: 8,
        frame_config: vec![
            LpduConfig {
                slot_id,
                payload_length: 64,
                cycle_repetition: 1,
                direction: Direction::Tx,
                ..Default::default()
            },
            LpduConfig {
                slot_id,
                payload_length: 64,
                cycle_repetition: 1,
                frame_table_index: 1,
                direction: Direction::Rx,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    Pdu {
        transport: Transport::Flexray(FlexrayTransport {
            node_ident: Default::default(),
            metadata: FlexrayMetadata::Config(Box::new(config)),
        }),
        ..Default::default()
    }
}

fn command_pdu(poc_command: PocCommand) -> Pdu {
    Pdu {
        transport: Transport::Flexray(FlexrayTransport {
            node_ident: Default::default(),
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

fn lpdu_pdu(slot_id: u16, frame_config_index: u16, status: LpduStatus, payload: Bytes) -> Pdu {
    Pdu {
        id: u32::from(slot_id),
        payload,
        transport: Transport::Flexray(FlexrayTransport {
            node_ident: Default::default(),
            metadata: FlexrayMetadata::Lpdu(LpduFrame {
                frame_config_index,
                status,
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

fn report(step: u32, pdu: &Pdu) {
    let Transport::Flexray(flexray) = &pdu.transport else {
        return;
    };
    match &flexray.metadata {
        FlexrayMetadata::Status(status) => info!(
            step,
            cycle = status.cycle,
            macrotick = status.macrotick,
            poc = ?status.channel[0].poc_state,
            tcvr = ?status.channel[0].tcvr_state,
            "status"
        ),
        FlexrayMetadata::Lpdu(lpdu) => info!(
            step,
            slot = pdu.id,
            index = lpdu.frame_config_index,
            status = ?lpdu.status,
            payload = %String::from_utf8_lossy(&pdu.payload[..pdu.payload.len().min(16)]),
            "lpdu"
        ),
        _ => {}
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mime_type = format!(
        "application/x-automotive-bus; interface=stream; type=pdu; schema=fbs; \
         ecu_id={}; vcn={}; model=flexray",
        args.ecu_id, args.vcn
    );
    let mut codec = Codec::open(&mime_type, BufferStream::new()).context("open codec")?;

    // Controller startup: the cluster config, then drive the POC to
    // NormalActive.
    codec.truncate()?;
    codec.write(&config_pdu(args.slot))?;
    for poc_command in [PocCommand::Config, PocCommand::Ready, PocCommand::Run] {
        codec.write(&command_pdu(poc_command))?;
    }
    codec.flush()?;

    let mut armed = false;
    for step in 0..args.steps {
        codec.seek(0, Whence::Set)?;
        loop {
            match codec.read() {
                Ok(pdu) => report(step, &pdu),
                Err(CodecError::NoMessage) => break,
                Err(err) => return Err(err).context("read"),
            }
        }

        codec.truncate()?;
        if !armed {
            codec.write(&lpdu_pdu(
                args.slot,
                0,
                LpduStatus::NotTransmitted,
                Bytes::from(args.payload.clone().into_bytes()),
            ))?;
            armed = true;
        }
        codec.flush()?;
    }

    Ok(())
}
