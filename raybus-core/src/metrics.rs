use metrics::{Counter, counter};
use std::sync::LazyLock;

static METRIC_PDUS_WRITTEN: LazyLock<Counter> = LazyLock::new(|| counter!("pdus_written"));
static METRIC_PDUS_READ: LazyLock<Counter> = LazyLock::new(|| counter!("pdus_read"));
static METRIC_MODEL_PDUS_CONSUMED: LazyLock<Counter> =
    LazyLock::new(|| counter!("model_pdus_consumed"));
static METRIC_SLOTS_PROCESSED: LazyLock<Counter> = LazyLock::new(|| counter!("slots_processed"));
static METRIC_CYCLES_COMPLETED: LazyLock<Counter> = LazyLock::new(|| counter!("cycles_completed"));
static METRIC_LPDUS_PUBLISHED: LazyLock<Counter> = LazyLock::new(|| counter!("lpdus_published"));

/// A PDU was staged by [`crate::Codec::write`]
pub(crate) fn pdu_written() {
    METRIC_PDUS_WRITTEN.increment(1);
}

/// A PDU was decoded from a stream
pub(crate) fn pdu_read() {
    METRIC_PDUS_READ.increment(1);
}

/// A PDU was consumed by the bus model
pub(crate) fn model_pdu_consumed() {
    METRIC_MODEL_PDUS_CONSUMED.increment(1);
}

/// The engine consumed one slot or minislot group
pub(crate) fn slot_processed() {
    METRIC_SLOTS_PROCESSED.increment(1);
}

/// A communication cycle completed (cycle counter rolled)
pub(crate) fn cycle_completed() {
    METRIC_CYCLES_COMPLETED.increment(1);
}

/// The bus model published one LPDU PDU
pub(crate) fn lpdu_published() {
    METRIC_LPDUS_PUBLISHED.increment(1);
}
