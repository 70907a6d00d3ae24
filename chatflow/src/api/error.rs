use thiserror::Error;

/// Errors raised while loading a flow definition or walking it
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Failed to read flow file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse flow: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Flow has no nodes")]
    Empty,

    #[error("Duplicate node id `{0}`")]
    DuplicateNode(String),

    #[error("Start node `{0}` is not defined")]
    MissingStart(String),

    #[error("`{from}` refers to unknown node `{to}`")]
    UnknownNode { from: String, to: String },

    #[error("Invalid node `{node}`: {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("Auto-advance cycle: {}", .0.join(" -> "))]
    AutoAdvanceCycle(Vec<String>),

    #[error("Auto-advance from `{0}` exceeded {1} steps")]
    AutoAdvanceLimit(String, usize),
}

/// Errors reported by profile storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}
