//! Sweep driver for one branch.
//!
//! Evaluation is demand driven: the requested root nodes are activated first
//! and every node activates the upstream nodes it asks for. Each sweep polls
//! every unfinished node once. The run ends when every activated node has
//! published, or fails with [`EvalError::Deadlock`] when a whole sweep makes
//! no progress.

use hashbrown::HashMap;

use crate::branch::BranchData;
use crate::error::EvalError;
use crate::graph::NodeId;
use crate::node::{NodeInputs, NodeInstance, NodeOutputs, OutputCache};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Gathering,
    Processing,
    Done,
}

struct Slot<'g> {
    id: NodeId,
    type_name: &'static str,
    instance: Box<dyn NodeInstance + 'g>,
    phase: Phase,
}

/// Evaluate `roots` and everything they depend on in `branch`.
pub(crate) fn run(branch: &BranchData<'_>, roots: &[NodeId]) -> Result<OutputCache, EvalError> {
    let graph = branch.graph();
    let stats = branch.stats();

    let mut slots: Vec<Slot<'_>> = Vec::new();
    let mut index: HashMap<NodeId, usize> = HashMap::new();
    let mut outputs = OutputCache::default();
    let mut demanded: Vec<NodeId> = roots.to_vec();
    let mut sweep = 0_usize;

    loop {
        sweep += 1;
        stats.record_sweep();
        let mut progress = false;

        for id in demanded.drain(..) {
            if index.contains_key(&id) {
                continue;
            }
            let Some(node) = graph.node(id) else {
                tracing::warn!(node = %id, "demanded node is not in the graph");
                continue;
            };
            index.insert(id, slots.len());
            slots.push(Slot {
                id,
                type_name: node.type_name(),
                instance: node.instantiate(id),
                phase: Phase::Gathering,
            });
            progress = true;
        }

        // Upstream nodes are activated later, so polling newest first lets a
        // chain finish in fewer sweeps.
        for slot in slots.iter_mut().rev() {
            if slot.phase == Phase::Gathering {
                let mut inputs = NodeInputs::new(slot.id, graph, &outputs, &mut demanded);
                if slot.instance.set_input_values(&mut inputs)? {
                    slot.phase = Phase::Processing;
                    progress = true;
                    tracing::trace!(node = %slot.id, kind = slot.type_name, "inputs ready");
                }
            }

            if slot.phase == Phase::Processing && slot.instance.process(branch)? {
                let mut published = NodeOutputs::new(slot.id, &mut outputs);
                slot.instance.cache_output_values(&mut published);
                outputs.mark_published(slot.id);
                slot.phase = Phase::Done;
                progress = true;
                stats.record_processed();
                tracing::trace!(node = %slot.id, kind = slot.type_name, "outputs published");
            }
        }

        let active = slots.iter().filter(|s| s.phase != Phase::Done).count();
        let fresh = demanded.iter().any(|id| !index.contains_key(id));
        tracing::debug!(sweep, active, depth = branch.depth(), "sweep finished");

        if active == 0 && !fresh {
            return Ok(outputs);
        }
        if !progress && !fresh {
            let stalled: Vec<(NodeId, &'static str)> = slots
                .iter()
                .filter(|s| s.phase != Phase::Done)
                .map(|s| (s.id, s.type_name))
                .collect();
            for slot in slots.iter().filter(|s| s.phase != Phase::Done) {
                tracing::warn!(
                    node = %slot.id,
                    kind = slot.type_name,
                    state = slot.instance.state_name(),
                    "node stalled"
                );
            }
            return Err(EvalError::Deadlock { stalled });
        }
    }
}
