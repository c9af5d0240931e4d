//! Node and bus state.
//!
//! A POC command moves a node's controller state; the controller state
//! produces a transceiver state on the bus; the transceiver states of
//! all nodes produce the bus condition; and the bus condition reflects
//! back on the controller states (a condition may not be sustainable
//! for a state, demoting it).

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::wire::{NodeIdent, PocCommand, PocState, TransceiverState};

/// Controller and transceiver state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    /// Identity of the node (software-component field zeroed)
    pub node_ident: NodeIdent,
    /// Protocol Operation Control state
    pub poc_state: PocState,
    /// Observable transceiver state
    pub tcvr_state: TransceiverState,
}

impl NodeState {
    /// A node in its power-up default state.
    pub fn new(node_ident: NodeIdent) -> Self {
        Self {
            node_ident,
            poc_state: PocState::DefaultConfig,
            tcvr_state: TransceiverState::None,
        }
    }

    /// Apply a POC command and re-derive the transceiver state.
    ///
    /// Unlisted (state, command) pairs are no-ops. `None` commands leave
    /// the node untouched, including the transceiver state.
    pub fn apply_command(&mut self, command: PocCommand) {
        debug!(?command, poc = ?self.poc_state, tcvr = ?self.tcvr_state, "poc command");
        if command == PocCommand::None {
            return;
        }

        match self.poc_state {
            PocState::DefaultConfig => {
                if command == PocCommand::Config {
                    self.transition(PocState::Config);
                }
            }
            PocState::Config => {
                if command == PocCommand::Ready {
                    self.transition(PocState::Ready);
                }
            }
            PocState::Ready => match command {
                PocCommand::Config => self.transition(PocState::Config),
                PocCommand::Run => self.transition(PocState::NormalActive),
                _ => {}
            },
            PocState::Wakeup | PocState::Startup | PocState::NormalPassive => {
                self.transition(PocState::NormalActive);
            }
            PocState::NormalActive => match command {
                PocCommand::Halt => self.transition(PocState::Halt),
                PocCommand::Freeze => self.transition(PocState::Freeze),
                _ => {}
            },
            PocState::Halt => {
                if command == PocCommand::Config {
                    self.transition(PocState::DefaultConfig);
                }
            }
            // Absorbing states.
            PocState::Freeze | PocState::Undefined => {}
        }

        self.derive_transceiver();
    }

    fn transition(&mut self, target: PocState) {
        debug!(from = ?self.poc_state, to = ?target, "poc state transition");
        self.poc_state = target;
    }

    /// Recompute the transceiver state from the POC state.
    ///
    /// `NoPower` gates everything: an unpowered transceiver does not
    /// follow the controller.
    pub(crate) fn derive_transceiver(&mut self) {
        if self.tcvr_state == TransceiverState::NoPower {
            debug!(tcvr = ?self.tcvr_state, "transceiver unpowered");
            return;
        }

        self.tcvr_state = match self.poc_state {
            PocState::DefaultConfig | PocState::Config => TransceiverState::NoSignal,
            PocState::Ready | PocState::Startup | PocState::NormalPassive => {
                TransceiverState::FrameError
            }
            PocState::Wakeup => TransceiverState::Wup,
            PocState::NormalActive => TransceiverState::FrameSync,
            PocState::Halt | PocState::Freeze | PocState::Undefined => {
                TransceiverState::NoConnection
            }
        };
        debug!(tcvr = ?self.tcvr_state, "transceiver state");
    }
}

/// The set of nodes attached to the simulated bus, and the bus
/// condition they produce together.
#[derive(Debug, Default)]
pub struct BusState {
    nodes: BTreeMap<u64, NodeState>,
    vcs_nodes: BTreeMap<u64, NodeState>,
    bus_condition: TransceiverState,
}

impl BusState {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, applying its initial power state.
    ///
    /// Node states are consolidated per ECU/controller by zeroing the
    /// software-component field of the identifier. Registering an
    /// already-known node only applies the power flags.
    pub fn register_node(&mut self, node_ident: NodeIdent, pwr_on: bool, pwr_off: bool) {
        let node_ident = node_ident.zeroed_swc();
        self.nodes
            .entry(node_ident.as_u64())
            .or_insert_with(|| NodeState::new(node_ident));
        if pwr_off {
            self.set_node_power(node_ident, false);
        } else if pwr_on {
            self.set_node_power(node_ident, true);
        }
    }

    /// Register a virtual-coldstart node.
    ///
    /// Virtual-coldstart nodes are held at `FrameSync` permanently;
    /// declaring two of them is how a single-node setup reaches frame
    /// synchronization.
    pub fn register_vcs_node(&mut self, node_ident: NodeIdent) {
        self.vcs_nodes
            .entry(node_ident.as_u64())
            .or_insert_with(|| NodeState {
                tcvr_state: TransceiverState::FrameSync,
                ..NodeState::new(node_ident)
            });
    }

    /// Switch a node's transceiver power.
    pub fn set_node_power(&mut self, node_ident: NodeIdent, power_on: bool) {
        let key = node_ident.zeroed_swc().as_u64();
        let Some(node) = self.nodes.get_mut(&key) else {
            warn!(node = key, "power change for unknown node");
            return;
        };
        if power_on && node.tcvr_state == TransceiverState::NoPower {
            node.tcvr_state = TransceiverState::NoConnection;
            node.poc_state = PocState::DefaultConfig;
            debug!(node = key, "power on");
        } else if !power_on {
            node.tcvr_state = TransceiverState::NoPower;
            node.poc_state = PocState::DefaultConfig;
            debug!(node = key, "power off");
        }
    }

    /// Apply a POC command to a node's controller.
    ///
    /// Commands for unregistered nodes are logged and dropped.
    pub fn push_command(&mut self, node_ident: NodeIdent, command: PocCommand) {
        let key = node_ident.zeroed_swc().as_u64();
        match self.nodes.get_mut(&key) {
            Some(node) => node.apply_command(command),
            None => warn!(node = key, ?command, "poc command for unknown node"),
        }
    }

    /// The consolidated state of a node, if registered.
    pub fn node_state(&self, node_ident: NodeIdent) -> Option<NodeState> {
        self.nodes.get(&node_ident.zeroed_swc().as_u64()).copied()
    }

    /// The most recently calculated bus condition.
    pub fn bus_condition(&self) -> TransceiverState {
        self.bus_condition
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of registered virtual-coldstart nodes.
    pub fn vcs_node_count(&self) -> usize {
        self.vcs_nodes.len()
    }

    /// Recompute the bus condition from all transceiver states.
    ///
    /// A single frame-synchronized node cannot hold synchronization
    /// alone: the bus condition degrades to `FrameError` and every
    /// `NormalActive` node is demoted to `NormalPassive`.
    pub fn calculate_bus_condition(&mut self) {
        let frame_sync_count = self
            .vcs_nodes
            .values()
            .chain(self.nodes.values())
            .filter(|node| node.tcvr_state == TransceiverState::FrameSync)
            .count();

        self.bus_condition = match frame_sync_count {
            0 => TransceiverState::NoSignal,
            1 => {
                for node in self.nodes.values_mut() {
                    if node.poc_state == PocState::NormalActive {
                        node.poc_state = PocState::NormalPassive;
                        node.derive_transceiver();
                    }
                }
                TransceiverState::FrameError
            }
            _ => TransceiverState::FrameSync,
        };
        debug!(condition = ?self.bus_condition, frame_sync_count, "bus condition");
    }

    /// Drop all node state.
    pub fn release(&mut self) {
        self.nodes.clear();
        self.vcs_nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const P_DC: PocState = PocState::DefaultConfig;
    const P_CFG: PocState = PocState::Config;
    const P_RDY: PocState = PocState::Ready;
    const P_NA: PocState = PocState::NormalActive;
    const T_NOSIG: TransceiverState = TransceiverState::NoSignal;
    const T_FERR: TransceiverState = TransceiverState::FrameError;
    const T_FSYNC: TransceiverState = TransceiverState::FrameSync;
    const T_NOCONN: TransceiverState = TransceiverState::NoConnection;

    fn node_at(poc_state: PocState, tcvr_state: TransceiverState) -> NodeState {
        NodeState {
            poc_state,
            tcvr_state,
            ..NodeState::new(NodeIdent::default())
        }
    }

    #[test_case(
        node_at(P_DC, T_NOSIG),
        &[
            (PocCommand::Config, P_CFG, T_NOSIG),
            (PocCommand::Ready, P_RDY, T_FERR),
            (PocCommand::Run, P_NA, T_FSYNC),
        ];
        "default config to normal active")]
    #[test_case(
        node_at(P_DC, T_NOSIG),
        &[
            (PocCommand::Config, P_CFG, T_NOSIG),
            (PocCommand::Ready, P_RDY, T_FERR),
            (PocCommand::Config, P_CFG, T_NOSIG),
        ];
        "ready back to config")]
    #[test_case(
        node_at(PocState::Wakeup, TransceiverState::Wup),
        &[(PocCommand::Nop, P_NA, T_FSYNC)];
        "wakeup to normal active")]
    #[test_case(
        node_at(PocState::Startup, T_FERR),
        &[(PocCommand::Nop, P_NA, T_FSYNC)];
        "startup to normal active")]
    #[test_case(
        node_at(PocState::NormalPassive, T_FERR),
        &[(PocCommand::Nop, P_NA, T_FSYNC)];
        "normal passive to normal active")]
    #[test_case(
        node_at(P_NA, T_FSYNC),
        &[
            (PocCommand::Halt, PocState::Halt, T_NOCONN),
            (PocCommand::Config, P_DC, T_NOSIG),
        ];
        "halt recovers to default config")]
    #[test_case(
        node_at(P_NA, T_FSYNC),
        &[
            (PocCommand::Freeze, PocState::Freeze, T_NOCONN),
            (PocCommand::Config, PocState::Freeze, T_NOCONN),
            (PocCommand::Run, PocState::Freeze, T_NOCONN),
        ];
        "freeze is absorbing")]
    #[test_case(
        node_at(P_RDY, T_FERR),
        &[
            (PocCommand::Halt, P_RDY, T_FERR),
            (PocCommand::Freeze, P_RDY, T_FERR),
        ];
        "unlisted pairs are no-ops")]
    fn poc_transitions(
        mut node: NodeState,
        transitions: &[(PocCommand, PocState, TransceiverState)],
    ) {
        for (command, poc_state, tcvr_state) in transitions {
            node.apply_command(*command);
            assert_eq!(node.poc_state, *poc_state, "after {command:?}");
            assert_eq!(node.tcvr_state, *tcvr_state, "after {command:?}");
        }
    }

    #[test]
    fn reachability_from_every_state() {
        // {Config, Ready, Run} lands in NormalActive from every state
        // except the absorbing ones; Halt needs a Config prefix.
        let run_sequence = [PocCommand::Config, PocCommand::Ready, PocCommand::Run];
        for start in [
            P_DC,
            P_CFG,
            P_RDY,
            PocState::Wakeup,
            PocState::Startup,
            PocState::NormalPassive,
            P_NA,
        ] {
            let mut node = node_at(start, TransceiverState::None);
            for command in run_sequence {
                node.apply_command(command);
            }
            assert_eq!(node.poc_state, P_NA, "from {start:?}");
        }

        let mut node = node_at(PocState::Halt, T_NOCONN);
        for command in [
            PocCommand::Config,
            PocCommand::Config,
            PocCommand::Ready,
            PocCommand::Run,
        ] {
            node.apply_command(command);
        }
        assert_eq!(node.poc_state, P_NA);
    }

    #[test]
    fn no_power_gates_commands() {
        let mut node = node_at(P_DC, TransceiverState::NoPower);
        for command in [PocCommand::Config, PocCommand::Ready, PocCommand::Run] {
            node.apply_command(command);
            assert_eq!(node.tcvr_state, TransceiverState::NoPower);
        }
        // The controller still advanced; only the transceiver is gated.
        assert_eq!(node.poc_state, P_NA);
    }

    #[test]
    fn vcs_nodes_consolidation() {
        let mut bus = BusState::new();
        let node = NodeIdent {
            ecu_id: 1,
            ..Default::default()
        };
        bus.register_vcs_node(NodeIdent {
            ecu_id: 1,
            cc_id: 0,
            swc_id: 1,
        });
        bus.register_vcs_node(NodeIdent {
            ecu_id: 1,
            cc_id: 0,
            swc_id: 2,
        });
        // Nodes sharing an ECU/CC collapse; VCS nodes do not.
        bus.register_node(node, false, true);
        bus.register_node(
            NodeIdent {
                ecu_id: 1,
                cc_id: 0,
                swc_id: 9,
            },
            false,
            true,
        );
        assert_eq!(bus.vcs_node_count(), 2);
        assert_eq!(bus.node_count(), 1);
    }

    struct BusConditionCheck {
        vcs_count: u32,
        initial_bus_condition: TransceiverState,
        post_normal_active: TransceiverState,
        post_normal_active_bus_condition: TransceiverState,
        post_normal_active_poc_state: PocState,
    }

    #[test_case(BusConditionCheck {
        vcs_count: 0,
        initial_bus_condition: T_NOSIG,
        post_normal_active: T_FERR,
        post_normal_active_bus_condition: T_FERR,
        post_normal_active_poc_state: PocState::NormalPassive,
    }; "zero vcs nodes")]
    #[test_case(BusConditionCheck {
        vcs_count: 1,
        initial_bus_condition: T_FERR,
        post_normal_active: T_FSYNC,
        post_normal_active_bus_condition: T_FSYNC,
        post_normal_active_poc_state: P_NA,
    }; "one vcs node")]
    #[test_case(BusConditionCheck {
        vcs_count: 2,
        initial_bus_condition: T_FSYNC,
        post_normal_active: T_FSYNC,
        post_normal_active_bus_condition: T_FSYNC,
        post_normal_active_poc_state: P_NA,
    }; "two vcs nodes")]
    fn bus_condition(check: BusConditionCheck) {
        let mut bus = BusState::new();
        let node = NodeIdent {
            ecu_id: 1,
            ..Default::default()
        };
        for swc_id in 0..check.vcs_count {
            bus.register_vcs_node(NodeIdent {
                ecu_id: 1,
                cc_id: 0,
                swc_id: swc_id + 1,
            });
        }
        bus.register_node(node, false, true);
        assert_eq!(bus.vcs_node_count(), check.vcs_count as usize);
        assert_eq!(bus.node_count(), 1);

        bus.calculate_bus_condition();
        assert_eq!(bus.bus_condition(), check.initial_bus_condition);

        // Power on the transceiver.
        assert_eq!(
            bus.node_state(node).unwrap().tcvr_state,
            TransceiverState::NoPower
        );
        bus.set_node_power(node, true);
        assert_eq!(
            bus.node_state(node).unwrap().tcvr_state,
            TransceiverState::NoConnection
        );

        // Drive the node to NormalActive.
        bus.push_command(node, PocCommand::Config);
        bus.push_command(node, PocCommand::Ready);
        bus.push_command(node, PocCommand::Run);
        assert_eq!(bus.node_state(node).unwrap().tcvr_state, T_FSYNC);

        bus.calculate_bus_condition();
        assert_eq!(
            bus.node_state(node).unwrap().tcvr_state,
            check.post_normal_active
        );
        assert_eq!(
            bus.bus_condition(),
            check.post_normal_active_bus_condition
        );
        assert_eq!(
            bus.node_state(node).unwrap().poc_state,
            check.post_normal_active_poc_state
        );
    }

    #[test]
    fn release_clears_nodes() {
        let mut bus = BusState::new();
        bus.register_node(NodeIdent::default(), true, false);
        bus.register_vcs_node(NodeIdent::default());
        bus.release();
        assert_eq!(bus.node_count(), 0);
        assert_eq!(bus.vcs_node_count(), 0);
    }
}
