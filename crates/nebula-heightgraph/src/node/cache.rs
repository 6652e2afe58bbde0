//! Published node outputs of one branch evaluation.

use hashbrown::{HashMap, HashSet};

use super::PortValue;
use crate::error::EvalError;
use crate::graph::{Endpoint, NodeId};
use crate::height_data::HeightData;

/// Output values of every processed node in a branch, keyed by node and port.
#[derive(Debug, Default)]
pub struct OutputCache {
    values: HashMap<NodeId, Vec<(&'static str, PortValue)>>,
    published: HashSet<NodeId>,
}

impl OutputCache {
    pub(crate) fn publish(&mut self, node: NodeId, port: &'static str, value: PortValue) {
        let ports = self.values.entry(node).or_default();
        match ports.iter_mut().find(|(name, _)| *name == port) {
            Some((_, slot)) => *slot = value,
            None => ports.push((port, value)),
        }
    }

    pub(crate) fn mark_published(&mut self, node: NodeId) {
        self.published.insert(node);
    }

    /// Returns `true` once `node` has published its outputs.
    pub fn is_published(&self, node: NodeId) -> bool {
        self.published.contains(&node)
    }

    /// Raw value of `node.port`.
    pub fn get(&self, node: NodeId, port: &str) -> Option<&PortValue> {
        self.values
            .get(&node)?
            .iter()
            .find(|(name, _)| *name == port)
            .map(|(_, value)| value)
    }

    /// Value an edge starting at `source` carries: the whole port, or one
    /// element of a list port.
    ///
    /// # Errors
    ///
    /// Fails when the port was never published, a list element is out of
    /// range, or an element is taken from a single-valued port.
    pub fn resolve(&self, source: &Endpoint) -> Result<PortValue, EvalError> {
        let unexpected = || EvalError::UnexpectedValue {
            node: source.node,
            port: source.port.clone(),
        };
        let value = self.get(source.node, &source.port).ok_or_else(unexpected)?;
        match (source.index, value) {
            (None, value) => Ok(value.clone()),
            (Some(index), PortValue::List(list)) => list
                .get(index)
                .cloned()
                .map(PortValue::Height)
                .ok_or_else(|| EvalError::ListIndexOutOfRange {
                    node: source.node,
                    port: source.port.clone(),
                    index,
                }),
            (Some(_), PortValue::Height(_)) => Err(unexpected()),
        }
    }

    /// Single buffer published on `node.port`.
    pub fn height(&self, node: NodeId, port: &str) -> Option<&HeightData> {
        self.get(node, port).and_then(PortValue::as_height)
    }

    /// Buffer list published on `node.port`.
    pub fn list(&self, node: NodeId, port: &str) -> Option<&[HeightData]> {
        self.get(node, port).and_then(PortValue::as_list)
    }

    /// Number of nodes that published.
    pub fn published_count(&self) -> usize {
        self.published.len()
    }
}
