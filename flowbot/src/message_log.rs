//
// Every message the bot exchanges can be reported to observers: the `bot_messages`
// table and the dashboard HTTP API. Observers run after delivery, on their own tasks,
// and a failing observer never affects the conversation.
//

use std::{error::Error, sync::Arc, time::Duration};

use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use teloxide::types::UserId;

use crate::config::API_TIMEOUT_SECONDS;

pub type ObserverError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    User,
    Bot,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::User => "user",
            Direction::Bot => "bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub user_id: UserId,
    pub direction: Direction,
    pub text: String,
    /// Node shown by a bot message
    pub node: Option<String>,
    pub data: Value,
    pub photo_file_id: Option<String>,
    pub message_id: Option<i32>,
}

impl MessageRecord {
    pub fn incoming(user_id: UserId, text: impl Into<String>, message_id: i32) -> Self {
        Self {
            user_id,
            direction: Direction::User,
            text: text.into(),
            node: None,
            data: Value::Null,
            photo_file_id: None,
            message_id: Some(message_id),
        }
    }

    pub fn outgoing(user_id: UserId, text: impl Into<String>, node: Option<String>) -> Self {
        Self {
            user_id,
            direction: Direction::Bot,
            text: text.into(),
            node,
            data: Value::Null,
            photo_file_id: None,
            message_id: None,
        }
    }

    /// Extra fields stored next to the text
    pub fn metadata(&self) -> Value {
        let mut data = match &self.data {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        if let Some(message_id) = self.message_id {
            data.insert("message_id".to_string(), json!(message_id));
        }
        if let Some(file_id) = &self.photo_file_id {
            data.insert("photo_file_id".to_string(), json!(file_id));
        }
        Value::Object(data)
    }
}

/// Receives a copy of every exchanged message
#[async_trait::async_trait]
pub trait MessageObserverTrait: Send + Sync {
    fn name(&self) -> &'static str;

    async fn observe(&self, record: &MessageRecord) -> Result<(), ObserverError>;
}

/// Fan-out to all configured observers
#[derive(Clone, Default)]
pub struct MessageLog {
    observers: Vec<Arc<dyn MessageObserverTrait>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn MessageObserverTrait>) -> Self {
        log::info!("Message log: {} observer enabled", observer.name());
        self.observers.push(observer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Hand the record to every observer without waiting for them
    pub fn record(&self, record: MessageRecord) {
        if self.observers.is_empty() {
            return;
        }
        let record = Arc::new(record);
        for observer in &self.observers {
            let observer = observer.clone();
            let record = record.clone();
            tokio::spawn(async move {
                if let Err(e) = observer.observe(&record).await {
                    log::error!(
                        "{} failed to log message for user {}: {}",
                        observer.name(),
                        record.user_id,
                        e
                    );
                }
            });
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage<'a> {
    user_id: String,
    message_type: &'a str,
    message_text: &'a str,
    message_data: Value,
    node_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiPhoto<'a> {
    file_id: &'a str,
    user_id: String,
    node_id: Option<&'a str>,
}

/// Posts messages to the dashboard API of a project
pub struct ApiMessageLog {
    http: Client,
    base_url: String,
    project_id: String,
}

impl ApiMessageLog {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> Result<Self, ObserverError> {
        let http = Client::builder()
            .user_agent(format!("flowbot/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(API_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/api/projects/{}/messages", self.base_url, self.project_id)
    }

    fn photo_url(&self) -> String {
        format!(
            "{}/api/projects/{}/media/register-telegram-photo",
            self.base_url, self.project_id
        )
    }

    async fn post(&self, url: String, body: &impl Serialize) -> Result<(), ObserverError> {
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("{} returned HTTP {}: {}", url, status.as_u16(), text).into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageObserverTrait for ApiMessageLog {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn observe(&self, record: &MessageRecord) -> Result<(), ObserverError> {
        let message = ApiMessage {
            user_id: record.user_id.to_string(),
            message_type: record.direction.as_str(),
            message_text: &record.text,
            message_data: record.metadata(),
            node_id: record.node.as_deref(),
        };
        self.post(self.messages_url(), &message).await?;

        if let Some(file_id) = &record.photo_file_id {
            let photo = ApiPhoto {
                file_id,
                user_id: record.user_id.to_string(),
                node_id: record.node.as_deref(),
            };
            self.post(self.photo_url(), &photo).await?;
        }
        Ok(())
    }
}
