use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    UnknownNode(String),

    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("connection references unknown node: from={from}, to={to}")]
    DanglingConnection { from: String, to: String },

    #[error("connections declared for unknown node: {0}")]
    OrphanConnections(String),
}
