use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde_json::Value;
use teloxide::types::UserId;
use tokio::sync::Mutex;

use crate::api::{
    action::Action,
    error::FlowError,
    flow::{Button, Flow, KeyboardKind, MultiSelect, Node},
    screen::{InlineRows, Reply, Screen, ScreenButton, ScreenKeyboard, into_rows},
    storage::{
        profile_storage::{Profile, ProfileStorageTrait, UserInfo},
        session_storage::{PendingInput, Session, SessionStorageTrait},
    },
    template::{render_value, substitute, substitute_escaped, variables_for},
    validation::validate_input,
};

/// Hard stop for auto-advance chains; well-formed flows never get close
const MAX_AUTO_ADVANCE: usize = 64;

const SELECTED_MARK: &str = "✅ ";

/// What the user did, independent of how the bot API delivered it
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// `/start`: reset the session and enter the start node
    Start,
    /// Jump to a node (flow commands, settings)
    Enter(String),
    /// Inline button press
    Action(Action),
    /// Any non-command text, including reply keyboard presses
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub user: UserInfo,
    pub trigger: Trigger,
}

impl Event {
    pub fn new(user: UserInfo, trigger: Trigger) -> Self {
        Self { user, trigger }
    }
}

/// Walks a [`Flow`] for every user.
///
/// Events of the same user are handled one at a time; the whole
/// read-session / compute / write-session sequence runs under a per-user lock.
pub struct Interpreter {
    flow: Arc<Flow>,
    sessions: Arc<dyn SessionStorageTrait>,
    profiles: Arc<dyn ProfileStorageTrait>,
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl Interpreter {
    pub fn new(
        flow: Arc<Flow>,
        sessions: Arc<dyn SessionStorageTrait>,
        profiles: Arc<dyn ProfileStorageTrait>,
    ) -> Self {
        Self {
            flow,
            sessions,
            profiles,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Handle one event and return the replies to deliver, in order
    pub async fn handle(&self, event: Event) -> Result<Vec<Reply>, FlowError> {
        let user_id = event.user.id;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        if let Err(e) = self.profiles.record_interaction(&event.user).await {
            log::warn!("Failed to record interaction of user {}: {}", user_id, e);
        }

        let mut session = if event.trigger == Trigger::Start {
            self.sessions.reset_session(user_id).await;
            Session::default()
        } else {
            self.sessions.get_session(user_id).await
        };

        let mut replies = Vec::new();
        let result = self
            .dispatch(&event.user, &mut session, event.trigger, &mut replies)
            .await;
        self.sessions.save_session(user_id, session).await;
        result.map(|()| replies)
    }

    /// Stored answers of a user as (variable, value) pairs, sorted by variable
    pub async fn profile_lines(&self, user_id: UserId) -> Vec<(String, String)> {
        self.load_profile(user_id)
            .await
            .iter()
            .map(|(key, value)| (key.clone(), render_value(value)))
            .collect()
    }

    /// Drop expired sessions and locks nobody holds; returns the number of purged sessions
    pub async fn purge_idle(&self) -> usize {
        let purged = self.sessions.purge_expired(Utc::now()).await;
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        purged
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }

    async fn dispatch(
        &self,
        user: &UserInfo,
        session: &mut Session,
        trigger: Trigger,
        replies: &mut Vec<Reply>,
    ) -> Result<(), FlowError> {
        match trigger {
            Trigger::Start => {
                let start = self.flow.start_node().to_string();
                self.enter(user, session, &start, replies).await
            }
            Trigger::Enter(node) => self.enter(user, session, &node, replies).await,
            Trigger::Action(action) => self.on_action(user, session, action, replies).await,
            Trigger::Text(text) => self.on_text(user, session, &text, replies).await,
        }
    }

    /// Show `node_id` and cascade through non-waiting nodes
    async fn enter(
        &self,
        user: &UserInfo,
        session: &mut Session,
        node_id: &str,
        replies: &mut Vec<Reply>,
    ) -> Result<(), FlowError> {
        let mut current = node_id.to_string();
        for _ in 0..MAX_AUTO_ADVANCE {
            let node = self.flow.node(&current).ok_or_else(|| FlowError::UnknownNode {
                from: session.current_node.clone().unwrap_or_default(),
                to: current.clone(),
            })?;

            session.current_node = Some(node.id.clone());
            session.pending = node.input.as_ref().map(|input| PendingInput {
                node: node.id.clone(),
                input: input.clone(),
                next: node.next.clone(),
            });
            if node.multi_select.is_some() {
                session.selections.insert(node.id.clone(), Vec::new());
            }

            let profile = self.load_profile(user.id).await;
            let vars = variables_for(user, &profile, &self.flow.default_user_name);
            replies.push(Reply::Screen(render_node(node, &vars, session)));
            log::debug!("User {} entered node `{}`", user.id, node.id);

            match node.auto_next() {
                Some(next) => current = next.to_string(),
                None => return Ok(()),
            }
        }
        Err(FlowError::AutoAdvanceLimit(
            node_id.to_string(),
            MAX_AUTO_ADVANCE,
        ))
    }

    async fn on_action(
        &self,
        user: &UserInfo,
        session: &mut Session,
        action: Action,
        replies: &mut Vec<Reply>,
    ) -> Result<(), FlowError> {
        let Some(node) = self.flow.node(action.node()) else {
            log::warn!(
                "User {} pressed a button of unknown node `{}`",
                user.id,
                action.node()
            );
            return Ok(());
        };

        match action {
            Action::Button { index, .. } => match node.buttons().get(index) {
                Some(button) => self.press_button(user, session, node, button, replies).await,
                None => {
                    log::warn!("Node `{}` has no button #{}", node.id, index);
                    Ok(())
                }
            },
            Action::Toggle { index, .. } => {
                let Some(select) = &node.multi_select else {
                    return Ok(());
                };
                let Some(option) = select.options.get(index) else {
                    return Ok(());
                };
                let selected = session.selections.entry(node.id.clone()).or_default();
                let value = option.value().to_string();
                if let Some(pos) = selected.iter().position(|v| *v == value) {
                    selected.remove(pos);
                } else {
                    selected.push(value);
                }
                replies.push(Reply::Keyboard {
                    node: node.id.clone(),
                    rows: multi_select_rows(node, select, selected),
                });
                Ok(())
            }
            Action::Done { .. } => self.finish_multi_select(user, session, node, replies).await,
        }
    }

    async fn on_text(
        &self,
        user: &UserInfo,
        session: &mut Session,
        text: &str,
        replies: &mut Vec<Reply>,
    ) -> Result<(), FlowError> {
        let text = text.trim();
        let current = session
            .current_node
            .as_deref()
            .and_then(|id| self.flow.node(id));

        // Reply keyboard buttons arrive as plain text
        if let Some(node) = current
            && let Some(keyboard) = &node.keyboard
            && keyboard.kind == KeyboardKind::Reply
            && let Some(button) = keyboard.buttons.iter().find(|b| b.text == text)
        {
            return self.press_button(user, session, node, button, replies).await;
        }

        if let Some(target) = self.flow.synonym_node(text) {
            let target = target.to_string();
            return self.enter(user, session, &target, replies).await;
        }

        if let Some(pending) = session.pending.clone() {
            return match validate_input(&pending.input, text) {
                Ok(answer) => {
                    self.store(user.id, &pending.input.variable, Value::String(answer))
                        .await;
                    session.pending = None;
                    match &pending.next {
                        Some(next) => self.enter(user, session, next, replies).await,
                        None => Ok(()),
                    }
                }
                Err(rejection) => {
                    log::info!(
                        "Rejected input of user {} for node `{}`: {}",
                        user.id,
                        pending.node,
                        rejection
                    );
                    let retry = pending
                        .input
                        .retry_text
                        .clone()
                        .unwrap_or_else(|| rejection.default_text());
                    replies.push(Reply::Notice(retry));
                    Ok(())
                }
            };
        }

        if let Some(node) = current
            && let Some(select) = &node.multi_select
            && select.done_text == text
        {
            return self.finish_multi_select(user, session, node, replies).await;
        }

        if let Some(fallback) = &self.flow.fallback_text {
            let profile = self.load_profile(user.id).await;
            let vars = variables_for(user, &profile, &self.flow.default_user_name);
            replies.push(Reply::Notice(substitute(fallback, &vars)));
        } else {
            log::debug!("Ignoring text from user {} with nothing pending", user.id);
        }
        Ok(())
    }

    async fn press_button(
        &self,
        user: &UserInfo,
        session: &mut Session,
        node: &Node,
        button: &Button,
        replies: &mut Vec<Reply>,
    ) -> Result<(), FlowError> {
        if let Some(variable) = &node.variable {
            self.store(user.id, variable, Value::String(button.answer().to_string()))
                .await;
        }
        match button.goto.as_ref().or(node.next.as_ref()) {
            Some(target) => self.enter(user, session, target, replies).await,
            None => {
                log::debug!("Button `{}` of node `{}` leads nowhere", button.text, node.id);
                Ok(())
            }
        }
    }

    async fn finish_multi_select(
        &self,
        user: &UserInfo,
        session: &mut Session,
        node: &Node,
        replies: &mut Vec<Reply>,
    ) -> Result<(), FlowError> {
        let Some(select) = &node.multi_select else {
            return Ok(());
        };
        let selected = session.selections.remove(&node.id).unwrap_or_default();
        if selected.len() < select.min_selected {
            replies.push(Reply::Notice(format!(
                "❌ Выберите хотя бы {} вариант(ов).",
                select.min_selected
            )));
            session.selections.insert(node.id.clone(), selected);
            return Ok(());
        }

        let values = selected.into_iter().map(Value::String).collect();
        self.store(user.id, &select.variable, Value::Array(values))
            .await;
        match &node.next {
            Some(next) => self.enter(user, session, next, replies).await,
            None => Ok(()),
        }
    }

    async fn store(&self, user_id: UserId, key: &str, value: Value) {
        if let Err(e) = self.profiles.set_value(user_id, key, value).await {
            log::error!("Failed to store `{}` for user {}: {}", key, user_id, e);
        }
    }

    async fn load_profile(&self, user_id: UserId) -> Profile {
        self.profiles
            .get_profile(user_id)
            .await
            .unwrap_or_else(|e| {
                log::warn!("Failed to load profile of user {}: {}", user_id, e);
                Profile::new()
            })
    }
}

fn render_node(node: &Node, vars: &HashMap<String, String>, session: &Session) -> Screen {
    let keyboard = if let Some(select) = &node.multi_select {
        let selected = session
            .selections
            .get(&node.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        ScreenKeyboard::Inline(multi_select_rows(node, select, selected))
    } else if let Some(keyboard) = &node.keyboard {
        match keyboard.kind {
            KeyboardKind::Inline => {
                let buttons = keyboard
                    .buttons
                    .iter()
                    .enumerate()
                    .map(|(index, button)| {
                        let text = substitute(&button.text, vars);
                        match &button.url {
                            Some(url) => ScreenButton::url(text, url.clone()),
                            None => ScreenButton::callback(
                                text,
                                Action::Button {
                                    node: node.id.clone(),
                                    index,
                                },
                            ),
                        }
                    })
                    .collect();
                ScreenKeyboard::Inline(into_rows(buttons, keyboard.columns))
            }
            KeyboardKind::Reply => ScreenKeyboard::Reply {
                rows: into_rows(
                    keyboard.buttons.iter().map(|b| b.text.clone()).collect(),
                    keyboard.columns,
                ),
                one_time: keyboard.one_time,
                resize: keyboard.resize,
            },
            KeyboardKind::Remove => ScreenKeyboard::Remove,
        }
    } else {
        ScreenKeyboard::None
    };

    Screen {
        node: node.id.clone(),
        text: substitute_escaped(&node.text, vars, node.format),
        format: node.format,
        photo: node.photo.clone(),
        keyboard,
    }
}

fn multi_select_rows(node: &Node, select: &MultiSelect, selected: &[String]) -> InlineRows {
    let options = select
        .options
        .iter()
        .enumerate()
        .map(|(index, option)| {
            let text = if selected.iter().any(|v| v == option.value()) {
                format!("{}{}", SELECTED_MARK, option.text)
            } else {
                option.text.clone()
            };
            ScreenButton::callback(
                text,
                Action::Toggle {
                    node: node.id.clone(),
                    index,
                },
            )
        })
        .collect();
    let mut rows = into_rows(options, select.columns);
    rows.push(vec![ScreenButton::callback(
        select.done_text.clone(),
        Action::Done {
            node: node.id.clone(),
        },
    )]);
    rows
}
