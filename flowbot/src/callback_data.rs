use std::{collections::HashMap, fmt::Display, str::FromStr, sync::Arc};

use reqwest::Url;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tokio::sync::Mutex;

/// Telegram rejects callback data longer than this many bytes
pub const CALLBACK_DATA_LIMIT: usize = 64;

const REFERENCE_PREFIX: &str = "cb";

/// One inline button before it is attached to a sent message
#[derive(Debug, Clone, PartialEq)]
pub enum ButtonData {
    /// Label and full callback payload
    Callback(String, String),
    /// Label and link opened by the client
    Url(String, Url),
}

/// Whether the payload can travel as callback data unchanged
pub fn fits_callback_limit(data: &str) -> bool {
    data.len() <= CALLBACK_DATA_LIMIT && data.is_ascii()
}

/// Trait for keeping oversized callback payloads server side
#[async_trait::async_trait]
pub trait CallbackDataStorageTrait: Send + Sync {
    /// Store a payload and return the short reference put on the button
    async fn store_callback_data(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        button_pos: usize,
        data: String,
    ) -> String;

    /// Resolve a reference produced by `store_callback_data`
    async fn get_callback_data(&self, reference: &str) -> Option<String>;

    /// Forget every payload attached to a message
    async fn clear_message_callbacks(&self, chat_id: ChatId, message_id: MessageId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackDataKey {
    chat_id: ChatId,
    message_id: MessageId,
    button_pos: usize,
}

impl CallbackDataKey {
    pub fn new(chat_id: ChatId, message_id: MessageId, button_pos: usize) -> Self {
        Self {
            chat_id,
            message_id,
            button_pos,
        }
    }
}

/// Example format: "cb:{chat_id}:{message_id}:{button_pos}"
impl Display for CallbackDataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            REFERENCE_PREFIX, self.chat_id.0, self.message_id.0, self.button_pos
        )
    }
}

impl FromStr for CallbackDataKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [prefix, chat_id, message_id, button_pos] =
            s.split(':').collect::<Vec<_>>()[..]
        else {
            return Err(());
        };
        if prefix != REFERENCE_PREFIX {
            return Err(());
        }
        Ok(CallbackDataKey::new(
            ChatId(chat_id.parse().map_err(|_| ())?),
            MessageId(message_id.parse().map_err(|_| ())?),
            button_pos.parse().map_err(|_| ())?,
        ))
    }
}

type CallbackStorageData = Arc<Mutex<HashMap<CallbackDataKey, String>>>;

/// In-memory map from button references to payloads
#[derive(Clone)]
pub struct CallbackDataStorage {
    data: CallbackStorageData,
}

impl CallbackDataStorage {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for CallbackDataStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CallbackDataStorageTrait for CallbackDataStorage {
    async fn store_callback_data(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        button_pos: usize,
        data: String,
    ) -> String {
        let key = CallbackDataKey::new(chat_id, message_id, button_pos);
        let mut storage_guard = self.data.lock().await;
        storage_guard.insert(key, data);
        key.to_string()
    }

    async fn get_callback_data(&self, reference: &str) -> Option<String> {
        let key = CallbackDataKey::from_str(reference).ok()?;
        let storage_guard = self.data.lock().await;
        storage_guard.get(&key).cloned()
    }

    async fn clear_message_callbacks(&self, chat_id: ChatId, message_id: MessageId) {
        let mut storage_guard = self.data.lock().await;
        storage_guard.retain(|key, _| key.chat_id != chat_id || key.message_id != message_id);
    }
}

/// Build the markup for a message, replacing payloads that do not fit
/// the callback limit with stored references.
///
/// References depend on the message id, so the message has to exist first.
/// Payloads stored earlier for the same message are dropped.
pub async fn pack_callback_data(
    storage: &Arc<dyn CallbackDataStorageTrait>,
    chat_id: ChatId,
    message_id: MessageId,
    rows: Vec<Vec<ButtonData>>,
) -> InlineKeyboardMarkup {
    storage.clear_message_callbacks(chat_id, message_id).await;

    let mut button_pos = 0;
    let mut keyboard = Vec::with_capacity(rows.len());
    for row in rows {
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            match button {
                ButtonData::Callback(label, data) => {
                    let data = if fits_callback_limit(&data) {
                        data
                    } else {
                        storage
                            .store_callback_data(chat_id, message_id, button_pos, data)
                            .await
                    };
                    buttons.push(InlineKeyboardButton::callback(label, data));
                    button_pos += 1;
                }
                ButtonData::Url(label, url) => {
                    buttons.push(InlineKeyboardButton::url(label, url));
                }
            }
        }
        keyboard.push(buttons);
    }
    InlineKeyboardMarkup::new(keyboard)
}

/// Resolve the data of a pressed button; anything that is not a known reference passes through
pub async fn unpack_callback_data(
    storage: &Arc<dyn CallbackDataStorageTrait>,
    callback_data: &str,
) -> String {
    if callback_data.starts_with(REFERENCE_PREFIX)
        && let Some(original) = storage.get_callback_data(callback_data).await
    {
        return original;
    }
    callback_data.to_string()
}

#[cfg(test)]
mod tests {
    use teloxide::types::InlineKeyboardButtonKind;

    use super::*;

    fn storage() -> Arc<dyn CallbackDataStorageTrait> {
        Arc::new(CallbackDataStorage::new())
    }

    fn callback_of(button: &InlineKeyboardButton) -> &str {
        match &button.kind {
            InlineKeyboardButtonKind::CallbackData(data) => data,
            other => panic!("Expected callback button, got {:?}", other),
        }
    }

    #[test]
    fn test_key_format() {
        let key = CallbackDataKey::new(ChatId(-100), MessageId(7), 2);
        assert_eq!(key.to_string(), "cb:-100:7:2");
        assert_eq!("cb:-100:7:2".parse::<CallbackDataKey>(), Ok(key));
        assert!("cb:1:2".parse::<CallbackDataKey>().is_err());
        assert!("b:ask:1:2".parse::<CallbackDataKey>().is_err());
    }

    #[test]
    fn test_fits_callback_limit() {
        assert!(fits_callback_limit("b:ask_city:2"));
        assert!(!fits_callback_limit(&"x".repeat(65)));
        assert!(!fits_callback_limit("b:город:1"));
    }

    #[tokio::test]
    async fn test_pack_and_unpack() {
        let storage = storage();
        let chat_id = ChatId(42);
        let message_id = MessageId(100);
        let long = format!("b:{}:0", "node".repeat(20));
        let url = Url::parse("https://example.com").unwrap();

        let markup = pack_callback_data(
            &storage,
            chat_id,
            message_id,
            vec![
                vec![
                    ButtonData::Callback("Short".to_string(), "b:start:0".to_string()),
                    ButtonData::Url("Site".to_string(), url),
                ],
                vec![
                    ButtonData::Callback("Long".to_string(), long.clone()),
                    ButtonData::Callback("Город".to_string(), "b:город:1".to_string()),
                ],
            ],
        )
        .await;

        let rows = &markup.inline_keyboard;
        assert_eq!(callback_of(&rows[0][0]), "b:start:0");
        assert!(matches!(rows[0][1].kind, InlineKeyboardButtonKind::Url(_)));
        assert_eq!(callback_of(&rows[1][0]), "cb:42:100:1");
        assert_eq!(callback_of(&rows[1][1]), "cb:42:100:2");

        assert_eq!(unpack_callback_data(&storage, "cb:42:100:1").await, long);
        assert_eq!(unpack_callback_data(&storage, "cb:42:100:2").await, "b:город:1");
        assert_eq!(unpack_callback_data(&storage, "b:start:0").await, "b:start:0");
        assert_eq!(unpack_callback_data(&storage, "cb:1:1:1").await, "cb:1:1:1");
    }

    #[tokio::test]
    async fn test_repack_clears_previous_references() {
        let storage = storage();
        let long = "x".repeat(80);
        pack_callback_data(
            &storage,
            ChatId(1),
            MessageId(5),
            vec![vec![ButtonData::Callback("A".to_string(), long.clone())]],
        )
        .await;
        assert_eq!(storage.get_callback_data("cb:1:5:0").await, Some(long));

        pack_callback_data(
            &storage,
            ChatId(1),
            MessageId(5),
            vec![vec![ButtonData::Callback("A".to_string(), "d:x".to_string())]],
        )
        .await;
        assert_eq!(storage.get_callback_data("cb:1:5:0").await, None);
    }
}
