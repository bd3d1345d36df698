use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Node type the automation platform uses for its "Split in Batches" loop.
pub const LOOP_CONTROLLER_TYPE: &str = "n8n-nodes-base.splitInBatches";

/// Output slot of a loop-controller that feeds the next item into the loop body.
///
/// Slot numbering is a convention of the integrated platform, not a general
/// property of directed graphs.
pub const LOOP_OUTPUT: usize = 0;

/// Output slot of a loop-controller that fires once every item was processed.
pub const DONE_OUTPUT: usize = 1;

/// Connection type used for ordinary data flow between nodes.
pub const MAIN_CONNECTION: &str = "main";

/// Opaque per-node configuration bag. Different node types use different keys.
pub type Parameters = Map<String, Value>;

/// A workflow as exchanged with the automation platform.
///
/// Only the fields the checker reads are typed. Everything else (`id`,
/// `settings`, `staticData`, timestamps, ...) is kept in `extra` so that a
/// fetched document can be written back without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: BTreeMap<String, NodeConnections>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            connections: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Remote identifier, when the document came from the platform's API.
    pub fn id(&self) -> Option<&str> {
        self.extra.get("id").and_then(Value::as_str)
    }

    pub fn settings(&self) -> Option<&Value> {
        self.extra.get("settings").filter(|v| !v.is_null())
    }

    pub fn static_data(&self) -> Option<&Value> {
        self.extra.get("staticData").filter(|v| !v.is_null())
    }

    /// Body for a full-replacement update.
    ///
    /// The update endpoint only accepts the writable fields; read-only
    /// metadata (`id`, `active`, timestamps) stays with the server.
    pub fn update_body(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "nodes": self.nodes,
            "connections": self.connections,
            "settings": self.settings().cloned().unwrap_or_else(|| Value::Object(Map::new())),
            "staticData": self.static_data().cloned().unwrap_or_else(|| Value::Object(Map::new())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Ordinary,
    LoopController,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            node_type: node_type.into(),
            parameters: Parameters::new(),
            disabled: None,
            extra: Map::new(),
        }
    }

    pub fn loop_controller(name: impl Into<String>) -> Self {
        Self::new(name, LOOP_CONTROLLER_TYPE)
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    pub fn kind(&self) -> NodeKind {
        if self.node_type == LOOP_CONTROLLER_TYPE {
            NodeKind::LoopController
        } else {
            NodeKind::Ordinary
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled == Some(true)
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Boolean node setting. The platform stores some settings at node level
    /// and older versions keep them in `parameters` or `parameters.options`.
    pub fn flag(&self, key: &str) -> bool {
        let options = self.parameters.get("options").and_then(Value::as_object);
        [
            self.extra.get(key),
            self.parameters.get(key),
            options.and_then(|o| o.get(key)),
        ]
        .into_iter()
        .flatten()
        .any(|v| v.as_bool() == Some(true))
    }
}

/// Outgoing connections of one source node, grouped by connection type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConnections {
    /// One entry per output slot; each slot fans out to zero or more targets.
    /// Left out on write when empty, so groups holding only AI connection
    /// types stay without a `main` key.
    #[serde(
        default,
        deserialize_with = "deserialize_slots",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub main: Vec<Vec<ConnectionTarget>>,
    /// Non-`main` connection types (AI tools, memories, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(rename = "type", default = "main_connection")]
    pub connection_type: String,
    #[serde(default)]
    pub index: usize,
}

impl ConnectionTarget {
    pub fn main(node: impl Into<String>, index: usize) -> Self {
        Self {
            node: node.into(),
            connection_type: MAIN_CONNECTION.to_string(),
            index,
        }
    }
}

fn main_connection() -> String {
    MAIN_CONNECTION.to_string()
}

/// The platform emits `null` for output slots that were never wired.
fn deserialize_slots<'de, D>(deserializer: D) -> Result<Vec<Vec<ConnectionTarget>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<Vec<ConnectionTarget>>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_kind_from_type() {
        assert_eq!(
            Node::loop_controller("Loop Sections").kind(),
            NodeKind::LoopController
        );
        assert_eq!(
            Node::new("Extract Section", "n8n-nodes-base.code").kind(),
            NodeKind::Ordinary
        );
    }

    #[test]
    fn test_null_slots_become_empty() {
        let conns: NodeConnections = serde_json::from_value(json!({
            "main": [null, [{"node": "Done", "type": "main", "index": 0}]]
        }))
        .unwrap();
        assert_eq!(conns.main.len(), 2);
        assert!(conns.main[0].is_empty());
        assert_eq!(conns.main[1][0].node, "Done");
    }

    #[test]
    fn test_flag_reads_node_level_and_options() {
        let mut node = Node::new("Body", "n8n-nodes-base.code");
        assert!(!node.flag("alwaysOutputData"));

        node.extra.insert("alwaysOutputData".into(), json!(true));
        assert!(node.flag("alwaysOutputData"));

        let looped = Node::loop_controller("Loop").with_parameter("options", json!({"reset": true}));
        assert!(looped.flag("reset"));
    }

    #[test]
    fn test_update_body_defaults_settings_and_static_data() {
        let mut doc = WorkflowDocument::new("Content Generation");
        doc.extra.insert("id".into(), json!("FimIaNZ66cEz96GM"));
        doc.extra.insert("active".into(), json!(true));
        doc.extra.insert("staticData".into(), Value::Null);

        let body = doc.update_body();
        assert_eq!(body["name"], "Content Generation");
        assert_eq!(body["settings"], json!({}));
        assert_eq!(body["staticData"], json!({}));
        assert!(body.get("id").is_none());
        assert!(body.get("active").is_none());
        assert_eq!(doc.id(), Some("FimIaNZ66cEz96GM"));
    }
}
