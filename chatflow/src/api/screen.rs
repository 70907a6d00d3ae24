use crate::api::{
    action::Action,
    flow::{NodeId, TextFormat},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenButtonKind {
    Callback(Action),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenButton {
    pub text: String,
    pub kind: ScreenButtonKind,
}

impl ScreenButton {
    pub fn callback(text: impl Into<String>, action: Action) -> Self {
        Self {
            text: text.into(),
            kind: ScreenButtonKind::Callback(action),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ScreenButtonKind::Url(url.into()),
        }
    }
}

pub type InlineRows = Vec<Vec<ScreenButton>>;

/// Keyboard attached to a rendered node, independent of the bot API types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScreenKeyboard {
    #[default]
    None,
    Inline(InlineRows),
    Reply {
        rows: Vec<Vec<String>>,
        one_time: bool,
        resize: bool,
    },
    Remove,
}

/// A node rendered for one user: placeholders already substituted
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub node: NodeId,
    pub text: String,
    pub format: TextFormat,
    pub photo: Option<String>,
    pub keyboard: ScreenKeyboard,
}

/// One outgoing effect of handling an event, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Show a node
    Screen(Screen),
    /// Plain informational text (retry prompts, fallbacks)
    Notice(String),
    /// Replace the inline keyboard of the message showing `node`
    Keyboard { node: NodeId, rows: InlineRows },
}

/// Split items into rows of `columns` items
pub(crate) fn into_rows<T>(items: Vec<T>, columns: usize) -> Vec<Vec<T>> {
    let columns = columns.max(1);
    let mut rows = Vec::new();
    let mut row = Vec::with_capacity(columns);
    for item in items {
        row.push(item);
        if row.len() == columns {
            rows.push(std::mem::replace(&mut row, Vec::with_capacity(columns)));
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows
}
