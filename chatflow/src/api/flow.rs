//
// A flow is the whole conversation of one bot: a list of nodes (screens) linked by
// `next` pointers and button targets. It is loaded from YAML and validated once at
// startup, so the interpreter can assume every reference resolves.
//

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::api::error::FlowError;

pub type NodeId = String;

const DEFAULT_START_NODE: &str = "start";
const DEFAULT_USER_NAME: &str = "Пользователь";
const DEFAULT_DONE_TEXT: &str = "✅ Готово";

fn default_start() -> NodeId {
    DEFAULT_START_NODE.to_string()
}

fn default_user_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

fn default_done_text() -> String {
    DEFAULT_DONE_TEXT.to_string()
}

fn default_columns() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// How the prompt text should be interpreted by Telegram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
    MarkdownV2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardKind {
    #[default]
    Inline,
    Reply,
    /// Hide a reply keyboard left over from a previous node
    Remove,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    #[default]
    Text,
    Email,
    Number,
    Phone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    /// Node entered when the button is pressed, defaults to the node's `next`
    #[serde(default)]
    pub goto: Option<NodeId>,
    /// Value written into the node's `variable`, defaults to the button text
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Button {
    pub fn answer(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyboard {
    #[serde(default)]
    pub kind: KeyboardKind,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default = "default_columns")]
    pub columns: usize,
    #[serde(default)]
    pub one_time: bool,
    #[serde(default = "default_true")]
    pub resize: bool,
}

impl Keyboard {
    /// Whether any button leads somewhere inside the flow
    pub fn has_navigation(&self) -> bool {
        self.kind != KeyboardKind::Remove && self.buttons.iter().any(|b| b.url.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub variable: String,
    #[serde(default, rename = "type")]
    pub kind: InputKind,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub retry_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub text: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl SelectOption {
    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSelect {
    pub variable: String,
    pub options: Vec<SelectOption>,
    #[serde(default = "default_done_text")]
    pub done_text: String,
    #[serde(default)]
    pub min_selected: usize,
    #[serde(default = "default_columns")]
    pub columns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub text: String,
    #[serde(default)]
    pub format: TextFormat,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub keyboard: Option<Keyboard>,
    #[serde(default)]
    pub input: Option<InputSpec>,
    #[serde(default)]
    pub multi_select: Option<MultiSelect>,
    /// Profile variable that receives the pressed button's answer
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default)]
    pub next: Option<NodeId>,
}

impl Node {
    /// A node waits when it collects text, offers a multi-select, or shows navigation buttons
    pub fn waits_for_user(&self) -> bool {
        self.input.is_some()
            || self.multi_select.is_some()
            || self.keyboard.as_ref().is_some_and(Keyboard::has_navigation)
    }

    /// The node to cascade into right after this one is shown
    pub fn auto_next(&self) -> Option<&str> {
        if self.waits_for_user() {
            None
        } else {
            self.next.as_deref()
        }
    }

    pub fn buttons(&self) -> &[Button] {
        self.keyboard
            .as_ref()
            .map(|k| k.buttons.as_slice())
            .unwrap_or_default()
    }

    fn targets(&self) -> impl Iterator<Item = &str> {
        self.next
            .as_deref()
            .into_iter()
            .chain(self.buttons().iter().filter_map(|b| b.goto.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCommand {
    pub command: String,
    pub description: String,
    #[serde(default)]
    pub node: Option<NodeId>,
}

/// Free text that jumps straight to a node, e.g. "меню" -> `main_menu`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synonym {
    pub text: String,
    pub node: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default = "default_start")]
    pub start: NodeId,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub commands: Vec<FlowCommand>,
    #[serde(default)]
    pub synonyms: Vec<Synonym>,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub settings_node: Option<NodeId>,
    #[serde(default)]
    pub fallback_text: Option<String>,
    #[serde(default = "default_user_name")]
    pub default_user_name: String,
    #[serde(skip)]
    index: HashMap<NodeId, usize>,
}

impl Flow {
    /// Parse and validate a flow from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, FlowError> {
        let mut flow: Flow = serde_yaml::from_str(yaml)?;
        flow.build_index()?;
        flow.validate()?;
        Ok(flow)
    }

    /// Read, parse and validate a flow file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| FlowError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml(&content)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    /// Node bound to a flow-defined command (name without the leading slash)
    pub fn command_node(&self, name: &str) -> Option<&str> {
        self.commands
            .iter()
            .find(|c| c.command.eq_ignore_ascii_case(name.trim_start_matches('/')))
            .and_then(|c| c.node.as_deref())
    }

    pub fn synonym_node(&self, text: &str) -> Option<&str> {
        let text = text.trim().to_lowercase();
        self.synonyms
            .iter()
            .find(|s| s.text.trim().to_lowercase() == text)
            .map(|s| s.node.as_str())
    }

    fn build_index(&mut self) -> Result<(), FlowError> {
        if self.nodes.is_empty() {
            return Err(FlowError::Empty);
        }
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (pos, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), pos).is_some() {
                return Err(FlowError::DuplicateNode(node.id.clone()));
            }
        }
        self.index = index;
        Ok(())
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.node(&self.start).is_none() {
            return Err(FlowError::MissingStart(self.start.clone()));
        }

        for node in &self.nodes {
            self.validate_node(node)?;
            for target in node.targets() {
                self.require_node(&node.id, target)?;
            }
        }

        for command in &self.commands {
            if let Some(target) = &command.node {
                self.require_node(&format!("/{}", command.command), target)?;
            }
        }
        for synonym in &self.synonyms {
            self.require_node(&synonym.text, &synonym.node)?;
        }
        if let Some(settings) = &self.settings_node {
            self.require_node("settings_node", settings)?;
        }

        self.check_auto_advance_cycles()
    }

    fn require_node(&self, from: &str, to: &str) -> Result<(), FlowError> {
        if self.node(to).is_none() {
            return Err(FlowError::UnknownNode {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn validate_node(&self, node: &Node) -> Result<(), FlowError> {
        let invalid = |reason: &str| FlowError::InvalidNode {
            node: node.id.clone(),
            reason: reason.to_string(),
        };

        if let Some(input) = &node.input {
            if input.variable.trim().is_empty() {
                return Err(invalid("input variable is empty"));
            }
            if let (Some(min), Some(max)) = (input.min_length, input.max_length)
                && min > max
            {
                return Err(invalid("min_length is greater than max_length"));
            }
        }

        if let Some(select) = &node.multi_select {
            if select.variable.trim().is_empty() {
                return Err(invalid("multi_select variable is empty"));
            }
            if select.options.is_empty() {
                return Err(invalid("multi_select has no options"));
            }
            if select.min_selected > select.options.len() {
                return Err(invalid("min_selected exceeds the number of options"));
            }
        }

        if let Some(keyboard) = &node.keyboard {
            if keyboard.columns == 0 {
                return Err(invalid("keyboard columns must be positive"));
            }
            for button in &keyboard.buttons {
                if button.url.is_some() && (button.goto.is_some() || button.value.is_some()) {
                    return Err(invalid("url buttons cannot carry goto or value"));
                }
                if button.url.is_some() && keyboard.kind == KeyboardKind::Reply {
                    return Err(invalid("reply keyboards cannot hold url buttons"));
                }
            }
        }

        if node.variable.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(invalid("variable is empty"));
        }
        Ok(())
    }

    /// Follow every chain of non-waiting nodes and fail if one loops back on itself
    fn check_auto_advance_cycles(&self) -> Result<(), FlowError> {
        for node in &self.nodes {
            let mut chain: Vec<&str> = vec![node.id.as_str()];
            let mut current = node;
            while let Some(next) = current.auto_next() {
                if let Some(pos) = chain.iter().position(|id| *id == next) {
                    let mut cycle: Vec<String> = chain[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    return Err(FlowError::AutoAdvanceCycle(cycle));
                }
                chain.push(next);
                match self.node(next) {
                    Some(n) => current = n,
                    None => break,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURVEY: &str = r#"
name: survey
nodes:
  - id: start
    text: "Привет, {user_name}!"
    next: ask_age
  - id: ask_age
    text: "Сколько вам лет?"
    input:
      variable: age
      type: number
    next: pick_city
  - id: pick_city
    text: "Ваш город?"
    variable: city
    keyboard:
      kind: reply
      columns: 2
      buttons:
        - text: Москва
        - text: Казань
    next: done
  - id: done
    text: "Спасибо!"
commands:
  - command: menu
    description: главное меню
    node: start
synonyms:
  - text: Старт
    node: start
"#;

    #[test]
    fn test_parse_defaults() {
        let flow = Flow::from_yaml(SURVEY).expect("flow should parse");

        assert_eq!(flow.start_node(), "start");
        assert_eq!(flow.default_user_name, "Пользователь");
        assert_eq!(flow.nodes.len(), 4);

        let ask_age = flow.node("ask_age").expect("ask_age exists");
        assert_eq!(ask_age.input.as_ref().map(|i| i.kind), Some(InputKind::Number));
        assert_eq!(ask_age.format, TextFormat::Plain);

        let keyboard = flow.node("pick_city").and_then(|n| n.keyboard.as_ref()).unwrap();
        assert_eq!(keyboard.kind, KeyboardKind::Reply);
        assert!(keyboard.resize);
        assert!(!keyboard.one_time);
        assert_eq!(keyboard.buttons[1].answer(), "Казань");
    }

    #[test]
    fn test_waiting_and_auto_next() {
        let flow = Flow::from_yaml(SURVEY).unwrap();

        let start = flow.node("start").unwrap();
        assert!(!start.waits_for_user());
        assert_eq!(start.auto_next(), Some("ask_age"));

        let ask_age = flow.node("ask_age").unwrap();
        assert!(ask_age.waits_for_user());
        assert_eq!(ask_age.auto_next(), None);

        let done = flow.node("done").unwrap();
        assert!(!done.waits_for_user());
        assert_eq!(done.auto_next(), None);
    }

    #[test]
    fn test_command_and_synonym_lookup() {
        let flow = Flow::from_yaml(SURVEY).unwrap();

        assert_eq!(flow.command_node("menu"), Some("start"));
        assert_eq!(flow.command_node("/MENU"), Some("start"));
        assert_eq!(flow.command_node("unknown"), None);

        assert_eq!(flow.synonym_node("  старт "), Some("start"));
        assert_eq!(flow.synonym_node("стоп"), None);
    }

    #[test]
    fn test_url_only_keyboard_does_not_wait() {
        let yaml = r#"
name: links
nodes:
  - id: start
    text: "Наш сайт"
    keyboard:
      buttons:
        - text: Открыть
          url: https://example.com
    next: bye
  - id: bye
    text: "Пока"
"#;
        let flow = Flow::from_yaml(yaml).unwrap();
        assert_eq!(flow.node("start").unwrap().auto_next(), Some("bye"));
    }

    #[test]
    fn test_rejects_unknown_target() {
        let yaml = r#"
name: broken
nodes:
  - id: start
    text: hi
    keyboard:
      buttons:
        - text: Go
          goto: nowhere
"#;
        let err = Flow::from_yaml(yaml).unwrap_err();
        assert!(
            matches!(&err, FlowError::UnknownNode { from, to } if from == "start" && to == "nowhere")
        );
    }

    #[test]
    fn test_rejects_missing_start_and_duplicates() {
        let missing = "name: x\nstart: intro\nnodes:\n  - id: start\n    text: hi\n";
        assert!(matches!(
            Flow::from_yaml(missing),
            Err(FlowError::MissingStart(id)) if id == "intro"
        ));

        let duplicate =
            "name: x\nnodes:\n  - id: start\n    text: a\n  - id: start\n    text: b\n";
        assert!(matches!(
            Flow::from_yaml(duplicate),
            Err(FlowError::DuplicateNode(id)) if id == "start"
        ));

        assert!(matches!(
            Flow::from_yaml("name: x\nnodes: []\n"),
            Err(FlowError::Empty)
        ));
    }

    #[test]
    fn test_rejects_auto_advance_cycle() {
        let yaml = r#"
name: loop
nodes:
  - id: start
    text: a
    next: b
  - id: b
    text: b
    next: c
  - id: c
    text: c
    next: b
"#;
        match Flow::from_yaml(yaml) {
            Err(FlowError::AutoAdvanceCycle(cycle)) => {
                assert_eq!(cycle, vec!["b", "c", "b"]);
            }
            other => panic!("Expected cycle error, got {:?}", other.map(|f| f.name)),
        }
    }

    #[test]
    fn test_cycle_through_waiting_node_is_allowed() {
        let yaml = r#"
name: menu
nodes:
  - id: start
    text: menu
    keyboard:
      buttons:
        - text: again
          goto: info
  - id: info
    text: info
    next: start
"#;
        assert!(Flow::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_rejects_bad_node_settings() {
        let bad_lengths = r#"
name: x
nodes:
  - id: start
    text: a
    input:
      variable: name
      min_length: 5
      max_length: 2
"#;
        assert!(matches!(
            Flow::from_yaml(bad_lengths),
            Err(FlowError::InvalidNode { node, .. }) if node == "start"
        ));

        let empty_select = r#"
name: x
nodes:
  - id: start
    text: a
    multi_select:
      variable: topics
      options: []
"#;
        assert!(matches!(
            Flow::from_yaml(empty_select),
            Err(FlowError::InvalidNode { .. })
        ));

        let url_with_goto = r#"
name: x
nodes:
  - id: start
    text: a
    keyboard:
      buttons:
        - text: site
          url: https://example.com
          goto: start
"#;
        assert!(matches!(
            Flow::from_yaml(url_with_goto),
            Err(FlowError::InvalidNode { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_command_target() {
        let yaml = r#"
name: x
nodes:
  - id: start
    text: a
commands:
  - command: menu
    description: menu
    node: main_menu
"#;
        assert!(matches!(
            Flow::from_yaml(yaml),
            Err(FlowError::UnknownNode { from, .. }) if from == "/menu"
        ));
    }

    #[tokio::test]
    async fn test_bundled_survey_flow_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../flows/survey.yaml");
        let flow = Flow::load(&path).await.unwrap();
        assert_eq!(flow.start_node(), "start");
        assert_eq!(flow.node("start").and_then(Node::auto_next), Some("ask_age"));
        assert_eq!(flow.command_node("/menu"), Some("main_menu"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        assert!(matches!(
            Flow::load("no/such/flow.yaml").await,
            Err(FlowError::Io { .. })
        ));
    }
}
