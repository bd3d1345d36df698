use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::{ConnectionTarget, GraphError, Node, NodeConnections, NodeKind, WorkflowDocument};

/// In-memory connection graph of one workflow.
///
/// Wraps the fetched document so that every field survives a write-back, and
/// keeps a name index for lookups. Node names are the identity key; the
/// subsystem never deletes nodes or edges.
#[derive(Debug, Clone)]
pub struct Graph {
    document: WorkflowDocument,
    index: HashMap<String, usize>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            document: WorkflowDocument::new(name),
            index: HashMap::new(),
        }
    }

    /// Build a graph from a document, rejecting duplicate names and
    /// connections that point at nodes which do not exist.
    pub fn from_document(document: WorkflowDocument) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(document.nodes.len());
        for (i, node) in document.nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
        }

        for (source, conns) in &document.connections {
            if !index.contains_key(source) {
                return Err(GraphError::OrphanConnections(source.clone()));
            }
            for target in conns.main.iter().flatten() {
                if !index.contains_key(&target.node) {
                    return Err(GraphError::DanglingConnection {
                        from: source.clone(),
                        to: target.node.clone(),
                    });
                }
            }
        }

        debug!(
            "Parsed workflow '{}': {} nodes, {} edges",
            document.name,
            document.nodes.len(),
            document
                .connections
                .values()
                .map(|c| c.main.iter().map(Vec::len).sum::<usize>())
                .sum::<usize>()
        );

        Ok(Self { document, index })
    }

    pub fn document(&self) -> &WorkflowDocument {
        &self.document
    }

    pub fn to_document(&self) -> WorkflowDocument {
        self.document.clone()
    }

    pub fn into_document(self) -> WorkflowDocument {
        self.document
    }

    pub fn name(&self) -> &str {
        &self.document.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.document.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.document.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut Node, GraphError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        Ok(&mut self.document.nodes[i])
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.index.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }
        self.index
            .insert(node.name.clone(), self.document.nodes.len());
        self.document.nodes.push(node);
        Ok(())
    }

    /// Add an edge from `source`'s output slot to `target`'s input.
    ///
    /// Set semantics: returns `Ok(false)` when the edge already exists.
    /// Missing intermediate slots are created empty.
    pub fn connect(
        &mut self,
        source: &str,
        output_index: usize,
        target: &str,
        target_input_index: usize,
    ) -> Result<bool, GraphError> {
        for name in [source, target] {
            if !self.contains(name) {
                return Err(GraphError::UnknownNode(name.to_string()));
            }
        }

        let conns = self
            .document
            .connections
            .entry(source.to_string())
            .or_insert_with(NodeConnections::default);
        if conns.main.len() <= output_index {
            conns.main.resize_with(output_index + 1, Vec::new);
        }

        let slot = &mut conns.main[output_index];
        let edge = ConnectionTarget::main(target, target_input_index);
        if slot
            .iter()
            .any(|t| t.node == edge.node && t.index == edge.index)
        {
            return Ok(false);
        }
        slot.push(edge);
        debug!(
            "Connected {}[{}] -> {}[{}]",
            source, output_index, target, target_input_index
        );
        Ok(true)
    }

    /// Ordered output slots of a node; empty when it has no outgoing edges.
    pub fn outputs_of(&self, source: &str) -> &[Vec<ConnectionTarget>] {
        self.document
            .connections
            .get(source)
            .map(|c| c.main.as_slice())
            .unwrap_or(&[])
    }

    /// Targets of a single output slot.
    pub fn slot(&self, source: &str, output_index: usize) -> &[ConnectionTarget] {
        self.outputs_of(source)
            .get(output_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Direct successors across every output slot, in slot order.
    pub fn successors(&self, source: &str) -> impl Iterator<Item = &str> {
        self.outputs_of(source)
            .iter()
            .flatten()
            .map(|t| t.node.as_str())
    }

    /// Every `(source, output_index)` pair that feeds `target`.
    pub fn incoming_to(&self, target: &str) -> Vec<(String, usize)> {
        let mut incoming = Vec::new();
        for (source, conns) in &self.document.connections {
            for (output, slot) in conns.main.iter().enumerate() {
                if slot.iter().any(|t| t.node == target) {
                    incoming.push((source.clone(), output));
                }
            }
        }
        incoming
    }

    pub fn edge_count(&self) -> usize {
        self.document
            .connections
            .values()
            .map(|c| c.main.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Names of all loop-controller nodes, in document order.
    pub fn loop_controllers(&self) -> Vec<&str> {
        self.document
            .nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::LoopController)
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Set a configuration value, returning the previous one.
    pub fn set_parameter(
        &mut self,
        node: &str,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, GraphError> {
        let node = self.node_mut(node)?;
        Ok(node.parameters.insert(key.to_string(), value))
    }

    /// Returns whether the flag actually changed.
    pub fn set_disabled(&mut self, node: &str, disabled: bool) -> Result<bool, GraphError> {
        let node = self.node_mut(node)?;
        if node.is_disabled() == disabled {
            return Ok(false);
        }
        node.disabled = disabled.then_some(true);
        Ok(true)
    }
}
