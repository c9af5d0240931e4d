use std::collections::BTreeMap;

use more_asserts::debug_assert_le;
use thiserror::Error;
use tracing::trace;

use crate::wire::{Direction, FlexrayConfig, LpduConfig, LpduStatus, NodeIdent, TransmitMode};
use crate::{CodecError, CodecResult, MAX_CYCLE, metrics};

/// An LPDU registered in the slot map.
///
/// Owns its payload buffer, which is allocated lazily to exactly the
/// configured payload length. The runtime transfer status lives in
/// `config.status`.
#[derive(Debug, Clone)]
pub struct Lpdu {
    /// Identity of the node the LPDU belongs to
    pub node_ident: NodeIdent,
    /// Configuration, including the runtime status
    pub config: LpduConfig,
    /// Payload buffer, `config.payload_length` bytes once allocated
    pub payload: Option<Vec<u8>>,
    /// Cycle of the most recent transfer
    pub cycle: u8,
}

/// Result of one [`Engine::consume_slot`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SlotOutcome {
    /// One slot (or the network-idle remainder) was consumed
    Consumed,
    /// The step budget does not cover the next slot; retry next step
    BudgetExhausted,
}

/// A cycle shift was requested while the engine is in the dynamic part.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cycle shift rejected in the dynamic part")]
pub struct ShiftRejected;

/// The FlexRay communication-cycle scheduler.
///
/// Walks the cycle slot by slot under a per-step wall-clock budget:
/// static slots, then minislots in the dynamic part, then the
/// network-idle remainder, rolling the cycle counter modulo 64.
/// Tx LPDUs are matched with the local node's Rx LPDUs in the same slot
/// and both are queued on the inform list for publication.
#[derive(Debug, Default)]
pub struct Engine {
    node_ident: NodeIdent,
    sim_step_size: f64,

    microtick_per_cycle: u32,
    macrotick_per_cycle: u32,

    static_slot_length_mt: u32,
    static_slot_count: u32,
    minislot_length_mt: u32,
    minislot_count: u32,
    static_slot_payload_length: u32,

    macro2micro: u32,
    microtick_ns: u32,
    macrotick_ns: u32,
    offset_static_mt: u32,
    offset_dynamic_mt: u32,
    offset_network_mt: u32,
    bits_per_minislot: u32,

    pos_mt: u32,
    pos_slot: u32,
    pos_cycle: u8,

    step_budget_ut: u32,
    step_budget_mt: u32,

    slot_map: BTreeMap<u16, Vec<Lpdu>>,
    inform: Vec<(u16, usize)>,
}

/// Merge an incoming value into a 0-sentinelled parameter.
///
/// Returns true when the parameter already holds a different non-zero
/// value.
fn merge(param: &mut u32, value: u32) -> bool {
    if *param != 0 && *param != value {
        return true;
    }
    *param = value;
    false
}

impl Engine {
    /// Create an engine for the given local node.
    ///
    /// `sim_step_size` (seconds) is the fallback step used when
    /// [`Engine::calculate_budget`] is called without one.
    pub fn new(node_ident: NodeIdent, sim_step_size: f64) -> Self {
        Self {
            node_ident,
            sim_step_size,
            ..Default::default()
        }
    }

    /// Merge a Config PDU into the engine and extend the slot map.
    ///
    /// Numeric communication-cycle parameters are 0-sentinelled: an
    /// unset engine field takes the incoming value, an equal value is a
    /// no-op, and a differing non-zero value fails with
    /// [`CodecError::Conflict`] (leaving that field unchanged). This is
    /// how Config PDUs from several software components compose.
    pub fn process_config(&mut self, config: &FlexrayConfig) -> CodecResult<()> {
        if config.bit_rate == crate::wire::BitRate::None {
            // Null config, nothing to merge.
            return Ok(());
        }

        let mut conflict = false;
        conflict |= merge(&mut self.microtick_per_cycle, config.microtick_per_cycle);
        conflict |= merge(
            &mut self.macrotick_per_cycle,
            u32::from(config.macrotick_per_cycle),
        );
        conflict |= merge(
            &mut self.static_slot_length_mt,
            u32::from(config.static_slot_length),
        );
        conflict |= merge(
            &mut self.static_slot_count,
            u32::from(config.static_slot_count),
        );
        conflict |= merge(
            &mut self.minislot_length_mt,
            u32::from(config.minislot_length),
        );
        conflict |= merge(&mut self.minislot_count, u32::from(config.minislot_count));
        conflict |= merge(
            &mut self.static_slot_payload_length,
            config.static_slot_payload_length,
        );
        if self.microtick_per_cycle == 0 || self.macrotick_per_cycle == 0 {
            return Err(CodecError::InvalidArg);
        }
        conflict |= merge(&mut self.microtick_ns, config.bit_rate.microtick_ns());
        conflict |= merge(
            &mut self.macro2micro,
            self.microtick_per_cycle / self.macrotick_per_cycle,
        );
        conflict |= merge(
            &mut self.macrotick_ns,
            self.macro2micro * config.bit_rate.microtick_ns(),
        );
        self.offset_static_mt = 0;
        conflict |= merge(
            &mut self.offset_dynamic_mt,
            self.static_slot_length_mt * self.static_slot_count,
        );
        conflict |= merge(
            &mut self.offset_network_mt,
            u32::from(config.network_idle_start),
        );
        if conflict {
            return Err(CodecError::Conflict);
        }

        if self.pos_slot == 0 {
            // Slots count from 1.
            self.pos_slot = 1;
        }
        self.bits_per_minislot =
            self.minislot_length_mt * self.macrotick_ns / config.bit_rate.bittime_ns();

        for lpdu_config in &config.frame_config {
            self.slot_map
                .entry(lpdu_config.slot_id)
                .or_default()
                .push(Lpdu {
                    node_ident: config.node_ident,
                    config: lpdu_config.clone(),
                    payload: None,
                    cycle: 0,
                });
        }

        Ok(())
    }

    /// Add one step's wall-clock budget and clear the inform list.
    ///
    /// `step_size` is in seconds; a value ≤ 0 falls back to the engine's
    /// stored step size. Unspent microtick budget accumulates across
    /// steps to absorb scheduling granularity.
    pub fn calculate_budget(&mut self, step_size: f64) -> CodecResult<()> {
        let mut step = step_size;
        if step <= 0.0 {
            if self.sim_step_size <= 0.0 {
                return Err(CodecError::InvalidArg);
            }
            step = self.sim_step_size;
        }
        if self.microtick_ns == 0 || self.macro2micro == 0 {
            return Err(CodecError::InvalidArg);
        }
        self.step_budget_ut += (step * 1e9 / f64::from(self.microtick_ns)) as u32;
        self.step_budget_mt = self.step_budget_ut / self.macro2micro;

        self.inform.clear();
        Ok(())
    }

    /// Consume exactly one slot, minislot group or the network-idle
    /// remainder, whichever the cycle position selects.
    pub fn consume_slot(&mut self) -> SlotOutcome {
        if self.pos_mt < self.offset_dynamic_mt {
            // Static part.
            let need_mt = self.static_slot_length_mt;
            let need_ut = need_mt * self.macro2micro;
            if need_ut > self.step_budget_ut {
                return SlotOutcome::BudgetExhausted;
            }
            self.process_slot();
            self.spend(need_ut, need_mt);
            self.pos_slot += 1;
            self.pos_mt += need_mt;
            metrics::slot_processed();
            SlotOutcome::Consumed
        } else if self.pos_mt < self.offset_network_mt {
            // Dynamic part. A pending Tx expands the slot to the
            // minislot count its transmission spans; otherwise one
            // quiet minislot passes.
            let mut need_mt = self.minislot_length_mt;
            let mut pending_tx = false;
            if let Some(lpdus) = self.slot_map.get(&(self.pos_slot as u16)) {
                for lpdu in lpdus {
                    if lpdu.config.direction == Direction::Tx
                        && lpdu.config.status == LpduStatus::NotTransmitted
                    {
                        pending_tx = true;
                        let frame_bits = 40 + u32::from(lpdu.config.payload_length) * 8;
                        let minislots = frame_bits.div_ceil(self.bits_per_minislot);
                        need_mt = minislots * self.minislot_length_mt;
                    }
                }
            }
            let need_ut = need_mt * self.macro2micro;
            if need_ut > self.step_budget_ut {
                return SlotOutcome::BudgetExhausted;
            }
            if pending_tx {
                self.process_slot();
            }
            self.spend(need_ut, need_mt);
            self.pos_slot += 1;
            self.pos_mt += need_mt;
            metrics::slot_processed();
            SlotOutcome::Consumed
        } else {
            // Network idle: consume the remainder of the cycle. A
            // dynamic-slot transmission may overrun the network-idle
            // start; the overrun is absorbed here.
            let need_ut = self
                .microtick_per_cycle
                .saturating_sub(self.pos_mt * self.macro2micro);
            if need_ut > self.step_budget_ut {
                return SlotOutcome::BudgetExhausted;
            }
            self.step_budget_ut -= need_ut;
            self.pos_slot = 1;
            self.pos_mt = 0;
            self.pos_cycle = (self.pos_cycle + 1) % MAX_CYCLE;
            metrics::cycle_completed();
            SlotOutcome::Consumed
        }
    }

    fn spend(&mut self, need_ut: u32, need_mt: u32) {
        debug_assert_le!(need_ut, self.step_budget_ut);
        debug_assert_le!(need_mt, self.step_budget_mt);
        self.step_budget_ut -= need_ut;
        self.step_budget_mt -= need_mt;
    }

    /// Transfer the current slot's Tx LPDU and deliver it to the local
    /// node's Rx LPDU, if both are identified.
    fn process_slot(&mut self) {
        let slot_id = self.pos_slot as u16;
        let Some(lpdus) = self.slot_map.get(&slot_id) else {
            // No configured slot.
            return;
        };

        trace!(
            slot = self.pos_slot,
            cycle = self.pos_cycle,
            mt = self.pos_mt,
            "process slot"
        );

        let in_static = self.pos_mt < self.offset_dynamic_mt;
        let in_dynamic = !in_static && self.pos_mt < self.offset_network_mt;
        let cycle_match = |config: &LpduConfig| {
            if in_static {
                config.cycle_repetition != 0
                    && self.pos_cycle % config.cycle_repetition == config.base_cycle
            } else {
                in_dynamic
            }
        };

        let mut tx_idx = None;
        let mut rx_idx = None;
        for (idx, lpdu) in lpdus.iter().enumerate() {
            match lpdu.config.direction {
                Direction::Tx => {
                    if cycle_match(&lpdu.config) {
                        tx_idx = Some(idx);
                    }
                }
                Direction::Rx => {
                    // An Rx is only reported for the local node.
                    if lpdu.node_ident == self.node_ident && cycle_match(&lpdu.config) {
                        rx_idx = Some(idx);
                    }
                }
                Direction::None => {}
            }
        }
        let Some(tx_idx) = tx_idx else {
            // Idle slot.
            return;
        };

        let pos_cycle = self.pos_cycle;
        let local = self.node_ident;
        let Some(lpdus) = self.slot_map.get_mut(&slot_id) else {
            return;
        };
        if lpdus[tx_idx].config.status != LpduStatus::NotTransmitted {
            return;
        }
        if lpdus[tx_idx].config.transmit_mode != TransmitMode::Continuous {
            // SingleShot and None are one-shot.
            lpdus[tx_idx].config.status = LpduStatus::Transmitted;
        }
        lpdus[tx_idx].cycle = pos_cycle;
        if lpdus[tx_idx].node_ident == local {
            self.inform.push((slot_id, tx_idx));
        }

        if let Some(rx_idx) = rx_idx {
            let tx_payload = lpdus[tx_idx].payload.clone();
            let rx = &mut lpdus[rx_idx];
            rx.config.status = LpduStatus::Received;
            rx.cycle = pos_cycle;
            let rx_len = usize::from(rx.config.payload_length);
            let buffer = rx.payload.get_or_insert_with(|| vec![0; rx_len]);
            buffer.fill(0);
            if let Some(tx_payload) = tx_payload {
                let len = rx_len.min(tx_payload.len());
                trace!(payload_length = len, "rx <- tx");
                buffer[..len].copy_from_slice(&tx_payload[..len]);
            }
            self.inform.push((slot_id, rx_idx));
        }
    }

    /// Re-synchronize the cycle position from an external source.
    ///
    /// Accepted in the static part; rejected in the dynamic part (a
    /// transmission may be in flight) unless `force` is set. Step
    /// budgets are not carried over a shift.
    pub fn shift_cycle(&mut self, mt: u32, cycle: u8, force: bool) -> Result<(), ShiftRejected> {
        if mt < self.offset_dynamic_mt {
            self.pos_mt = mt;
            self.pos_cycle = cycle % MAX_CYCLE;
            self.pos_slot = self.pos_mt / self.static_slot_length_mt + 1;
        } else if force {
            self.pos_mt = mt;
            self.pos_cycle = cycle % MAX_CYCLE;
            self.pos_slot = (self.pos_mt - self.offset_dynamic_mt) / self.minislot_length_mt
                + self.static_slot_count
                + 1;
        } else {
            return Err(ShiftRejected);
        }
        self.step_budget_ut = 0;
        self.step_budget_mt = 0;
        Ok(())
    }

    /// Arm a Tx LPDU with a payload and status.
    ///
    /// The payload is truncated or zero-padded to the LPDU's configured
    /// length. Fails with [`CodecError::InvalidArg`] when no Tx LPDU of
    /// `node_id` is registered at `slot_id`.
    pub fn set_payload(
        &mut self,
        node_id: u64,
        slot_id: u16,
        status: LpduStatus,
        payload: &[u8],
    ) -> CodecResult<()> {
        let Some(lpdus) = self.slot_map.get_mut(&slot_id) else {
            return Err(CodecError::InvalidArg);
        };
        let Some(lpdu) = lpdus.iter_mut().find(|lpdu| {
            lpdu.node_ident.as_u64() == node_id && lpdu.config.direction == Direction::Tx
        }) else {
            return Err(CodecError::InvalidArg);
        };

        lpdu.config.status = status;
        let config_len = usize::from(lpdu.config.payload_length);
        let buffer = lpdu.payload.get_or_insert_with(|| vec![0; config_len]);
        buffer.fill(0);
        let len = config_len.min(payload.len());
        buffer[..len].copy_from_slice(&payload[..len]);
        Ok(())
    }

    /// Drop all LPDUs, payloads and pending inform entries.
    pub fn release_config(&mut self) {
        self.slot_map.clear();
        self.inform.clear();
    }

    /// LPDUs queued for publication this step, in slot-processing order.
    ///
    /// Entries are valid until the next [`Engine::calculate_budget`],
    /// which clears the list.
    pub fn inform_list(&self) -> impl Iterator<Item = &Lpdu> {
        self.inform
            .iter()
            .filter_map(|(slot_id, idx)| self.slot_map.get(slot_id).and_then(|v| v.get(*idx)))
    }

    /// Cycle position in macroticks.
    pub fn pos_mt(&self) -> u32 {
        self.pos_mt
    }

    /// Current slot, counting from 1.
    pub fn pos_slot(&self) -> u32 {
        self.pos_slot
    }

    /// Cycle counter, 0..=63.
    pub fn pos_cycle(&self) -> u8 {
        self.pos_cycle
    }
}
