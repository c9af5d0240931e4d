use tracing::trace;

use crate::{CodecError, CodecResult};

/// The MIME content type accepted by [`crate::Codec::open`].
pub const MIME_CONTENT_TYPE: &str = "application/x-automotive-bus";

/// Bus models which can be bound to a codec instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// The FlexRay communication-cycle bus model
    Flexray,
}

/// Codec configuration parsed from a MIME-type open string.
///
/// An open string has the form:
///
/// ```text
/// application/x-automotive-bus; interface=stream; type=pdu; schema=fbs; ecu_id=1; vcn=2; model=flexray
/// ```
///
/// `interface=stream`, `type=pdu` and `schema=fbs` are mandatory.
/// Unknown keys are ignored (and traced) so open strings can carry
/// parameters for other consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeProfile {
    /// Logical bus name (passthrough)
    pub bus: Option<String>,
    /// Bus identifier recorded on outgoing PDUs
    pub bus_id: u8,
    /// Node identifier
    pub node_id: u8,
    /// Interface identifier
    pub interface_id: u8,
    /// Software-component identifier
    pub swc_id: u8,
    /// ECU identifier
    pub ecu_id: u8,
    /// Communication-controller identifier
    pub cc_id: u8,
    /// Bus model to instantiate, when present
    pub model: Option<ModelKind>,
    /// Initial power state of the node (`pwr` key, default on)
    pub power_on: bool,
    /// Number of virtual-coldstart nodes to synthesize (`vcn` key)
    pub vcn_count: u8,
    /// Key slot id used when synthesizing virtual-coldstart idents
    pub vcn_key_slot_id: u16,
}

impl MimeProfile {
    /// Parse and validate an open string.
    pub fn parse(mime_type: &str) -> CodecResult<Self> {
        let mut parts = mime_type.split(';').map(str::trim);

        let content_type = parts.next().unwrap_or_default();
        if content_type != MIME_CONTENT_TYPE {
            return Err(CodecError::InvalidArg);
        }

        let mut profile = MimeProfile {
            power_on: true,
            ..Default::default()
        };
        let mut interface = None;
        let mut codec_type = None;
        let mut schema = None;

        for part in parts {
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(CodecError::InvalidArg);
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "interface" => interface = Some(value),
                "type" => codec_type = Some(value),
                "schema" => schema = Some(value),
                "bus" => profile.bus = Some(value.to_string()),
                "bus_id" => profile.bus_id = parse_u8(value)?,
                "node_id" => profile.node_id = parse_u8(value)?,
                "interface_id" => profile.interface_id = parse_u8(value)?,
                "swc_id" => profile.swc_id = parse_u8(value)?,
                "ecu_id" => profile.ecu_id = parse_u8(value)?,
                "cc_id" => profile.cc_id = parse_u8(value)?,
                "model" => match value {
                    "flexray" => profile.model = Some(ModelKind::Flexray),
                    _ => return Err(CodecError::InvalidArg),
                },
                "pwr" => match value {
                    "on" => profile.power_on = true,
                    "off" => profile.power_on = false,
                    _ => return Err(CodecError::InvalidArg),
                },
                "vcn" => profile.vcn_count = parse_u8(value)?,
                "vcn_fid" => {
                    profile.vcn_key_slot_id =
                        value.parse().map_err(|_| CodecError::InvalidArg)?
                }
                _ => trace!(key, value, "ignoring unknown MIME parameter"),
            }
        }

        if interface != Some("stream") || codec_type != Some("pdu") || schema != Some("fbs") {
            return Err(CodecError::InvalidArg);
        }

        Ok(profile)
    }
}

fn parse_u8(value: &str) -> CodecResult<u8> {
    value.parse().map_err(|_| CodecError::InvalidArg)
}
