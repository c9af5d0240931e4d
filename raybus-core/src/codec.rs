use bytes::BytesMut;
use tracing::{debug, trace};

use crate::flexray::{BusModel, FlexrayBusModel};
use crate::mime::{MimeProfile, ModelKind};
use crate::stream::{BufferStream, Whence};
use crate::wire::{Pdu, Transport};
use crate::{CodecError, CodecResult, metrics};

/// Progress of one step's read phase on a model-bound codec.
#[derive(Debug, Default, Clone, Copy)]
struct ReaderStages {
    /// The bus model has progressed and produced this step's PDUs
    model_produced: bool,
    /// The produced PDUs have been fully read back
    model_consumed: bool,
}

/// A PDU codec instance bound to a byte stream.
///
/// Writes stage frames in an internal builder until [`Codec::flush`]
/// appends them to the stream; reads decode frames at the stream
/// cursor.
///
/// When the MIME type names a bus model (`model=flexray`), reading
/// changes meaning: every decoded PDU is consumed by the model, and
/// once the stream is exhausted the model progresses one simulation
/// step, emitting its produced PDUs through a companion codec — an
/// independent instance sharing the MIME parameters but owning its own
/// stream — from which subsequent reads are served.
///
/// The expected step sequence for a model-bound codec is:
/// write inbound PDUs, `flush`, `seek(0)`, `read` until
/// [`CodecError::NoMessage`], then `truncate` before the next step's
/// writes.
#[derive(Debug)]
pub struct Codec {
    profile: MimeProfile,
    stream: Option<BufferStream>,
    staged: BytesMut,
    stages: ReaderStages,
    model: Option<Box<dyn BusModel>>,
    companion: Option<Box<Codec>>,
}

impl Codec {
    /// Create a codec with `stream` bound.
    pub fn open(mime_type: &str, stream: BufferStream) -> CodecResult<Self> {
        let mut codec = Self::create(mime_type)?;
        codec.stream = Some(stream);
        Ok(codec)
    }

    /// Create a codec with no stream bound.
    ///
    /// All stream operations report [`CodecError::NoStream`] until a
    /// stream is bound with [`Codec::bind_stream`].
    pub fn create(mime_type: &str) -> CodecResult<Self> {
        let profile = MimeProfile::parse(mime_type)?;

        let (model, companion) = match profile.model {
            Some(ModelKind::Flexray) => {
                let model: Box<dyn BusModel> = Box::new(FlexrayBusModel::new(&profile));
                let companion = Box::new(Codec {
                    profile: profile.clone(),
                    stream: Some(BufferStream::new()),
                    staged: BytesMut::new(),
                    stages: ReaderStages::default(),
                    model: None,
                    companion: None,
                });
                (Some(model), Some(companion))
            }
            None => (None, None),
        };

        Ok(Self {
            profile,
            stream: None,
            staged: BytesMut::new(),
            stages: ReaderStages::default(),
            model,
            companion,
        })
    }

    /// Bind a stream, replacing any existing one.
    pub fn bind_stream(&mut self, stream: BufferStream) {
        self.stream = Some(stream);
    }

    /// The parsed MIME profile of this codec.
    pub fn profile(&self) -> &MimeProfile {
        &self.profile
    }

    fn stream_ref(&self) -> CodecResult<&BufferStream> {
        self.stream.as_ref().ok_or(CodecError::NoStream)
    }

    fn stream_mut(&mut self) -> CodecResult<&mut BufferStream> {
        self.stream.as_mut().ok_or(CodecError::NoStream)
    }

    /// Stage one PDU for the next flush.
    ///
    /// `ecu_id`, `swc_id` and — for FlexRay transports — the node
    /// identifier default from the MIME parameters when left at zero.
    /// Returns the payload length in bytes.
    pub fn write(&mut self, pdu: &Pdu) -> CodecResult<usize> {
        self.stream_ref()?;

        let mut pdu = pdu.clone();
        if pdu.ecu_id == 0 {
            pdu.ecu_id = u16::from(self.profile.ecu_id);
        }
        if pdu.swc_id == 0 {
            pdu.swc_id = u32::from(self.profile.swc_id);
        }
        if let Transport::Flexray(flexray) = &mut pdu.transport
            && flexray.node_ident.as_u64() == 0
        {
            flexray.node_ident.ecu_id = u16::from(self.profile.ecu_id);
            flexray.node_ident.cc_id = u16::from(self.profile.cc_id);
            flexray.node_ident.swc_id = u32::from(self.profile.swc_id);
        }

        pdu.append_to_wire(&mut self.staged);
        trace!(id = pdu.id, payload_len = pdu.payload.len(), "pdu staged");
        metrics::pdu_written();
        Ok(pdu.payload.len())
    }

    /// Append all staged frames to the stream.
    ///
    /// Safe to call repeatedly; returns the total stream length.
    pub fn flush(&mut self) -> CodecResult<usize> {
        self.stream_ref()?;
        let staged = self.staged.split();
        let stream = self.stream_mut()?;
        if !staged.is_empty() {
            stream.write(&staged)?;
        }
        Ok(stream.len())
    }

    /// Discard stream content and staged frames, and rewind.
    ///
    /// Must be called between the read phase and the write phase of a
    /// simulation step: it also resets the reader so the next
    /// exhaustion progresses the bus model again.
    pub fn truncate(&mut self) -> CodecResult<()> {
        self.staged.clear();
        self.stages = ReaderStages::default();
        self.stream_mut()?.truncate();
        Ok(())
    }

    /// Move the stream cursor. Returns the new position.
    pub fn seek(&mut self, pos: usize, whence: Whence) -> CodecResult<usize> {
        if whence == Whence::Reset {
            self.stages = ReaderStages::default();
        }
        Ok(self.stream_mut()?.seek(pos, whence))
    }

    /// The current stream cursor position.
    pub fn tell(&self) -> CodecResult<usize> {
        Ok(self.stream_ref()?.tell())
    }

    /// Whether the stream cursor is at the end of content.
    pub fn is_eof(&self) -> CodecResult<bool> {
        Ok(self.stream_ref()?.is_eof())
    }

    /// Decode the next PDU.
    ///
    /// Without a bus model: returns the next PDU at the stream cursor,
    /// or [`CodecError::NoMessage`] at the end of content.
    ///
    /// With a bus model: consumes every remaining PDU into the model,
    /// progresses it once per step, and then returns the model's
    /// produced PDUs one by one.
    pub fn read(&mut self) -> CodecResult<Pdu> {
        self.stream_ref()?;

        loop {
            match self.decode_next() {
                Ok(pdu) => {
                    metrics::pdu_read();
                    let Some(model) = &mut self.model else {
                        return Ok(pdu);
                    };
                    if model.consume(pdu) {
                        metrics::model_pdu_consumed();
                    } else {
                        debug!("pdu not handled by bus model, dropped");
                    }
                }
                Err(CodecError::NoMessage) => {
                    let (Some(model), Some(companion)) =
                        (self.model.as_mut(), self.companion.as_mut())
                    else {
                        return Err(CodecError::NoMessage);
                    };
                    if self.stages.model_consumed {
                        return Err(CodecError::NoMessage);
                    }
                    if !self.stages.model_produced {
                        companion.truncate()?;
                        model.progress(companion)?;
                        companion.flush()?;
                        companion.seek(0, Whence::Set)?;
                        self.stages.model_produced = true;
                    }
                    return match companion.decode_next() {
                        Err(CodecError::NoMessage) => {
                            self.stages.model_consumed = true;
                            Err(CodecError::NoMessage)
                        }
                        produced => produced,
                    };
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Release the stream, staged frames and bus model.
    pub fn close(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.close();
        }
        self.companion = None;
        self.stream = None;
        self.staged.clear();
        self.stages = ReaderStages::default();
    }

    fn decode_next(&mut self) -> CodecResult<Pdu> {
        let stream = self.stream_mut()?;
        let mut buf = stream.remaining();
        if buf.is_empty() {
            return Err(CodecError::NoMessage);
        }
        let before = buf.len();
        let pdu = Pdu::try_from_wire(&mut buf)?;
        let consumed = before - buf.len();
        stream.consume(consumed);
        Ok(pdu)
    }
}

impl Drop for Codec {
    fn drop(&mut self) {
        self.close();
    }
}
