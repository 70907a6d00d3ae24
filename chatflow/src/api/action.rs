use std::{fmt::Display, str::FromStr};

use crate::api::flow::NodeId;

/// Payload carried by an inline button
///
/// Example formats: "b:{node}:{index}", "t:{node}:{index}", "d:{node}"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Press of the button at `index` in the node's keyboard
    Button { node: NodeId, index: usize },
    /// Toggle of a multi-select option
    Toggle { node: NodeId, index: usize },
    /// Confirmation of a multi-select
    Done { node: NodeId },
}

impl Action {
    pub fn node(&self) -> &str {
        match self {
            Action::Button { node, .. } | Action::Toggle { node, .. } | Action::Done { node } => {
                node
            }
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Button { node, index } => write!(f, "b:{}:{}", node, index),
            Action::Toggle { node, index } => write!(f, "t:{}:{}", node, index),
            Action::Done { node } => write!(f, "d:{}", node),
        }
    }
}

/// Node ids may contain ':' so the index is always taken from the last segment
impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s.split_once(':').ok_or(())?;
        if rest.is_empty() {
            return Err(());
        }
        let indexed = || -> Result<(NodeId, usize), ()> {
            let (node, index) = rest.rsplit_once(':').ok_or(())?;
            if node.is_empty() {
                return Err(());
            }
            let index = index.parse::<usize>().map_err(|_| ())?;
            Ok((node.to_string(), index))
        };
        match kind {
            "b" => indexed().map(|(node, index)| Action::Button { node, index }),
            "t" => indexed().map(|(node, index)| Action::Toggle { node, index }),
            "d" => Ok(Action::Done {
                node: rest.to_string(),
            }),
            _ => Err(()),
        }
    }
}
