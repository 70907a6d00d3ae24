use std::{path::Path, sync::Arc};

use chatflow::interpreter::{InlineRows, Reply, Screen, ScreenKeyboard};
use reqwest::Url;
use teloxide::{
    payloads::{
        EditMessageReplyMarkupSetters, EditMessageTextSetters, SendMessageSetters,
        SendPhotoSetters,
    },
    prelude::*,
    types::{ChatId, FileId, InputFile, Message, MessageId, UserId},
};

use crate::{
    callback_data::{CallbackDataStorageTrait, pack_callback_data},
    message_log::{MessageLog, MessageRecord},
    render::{inline_rows, parse_mode, reply_markup},
};

/// Where the replies to one update go
pub struct ReplyTarget {
    pub bot: Bot,
    pub chat_id: ChatId,
    pub user_id: UserId,
    /// Message whose inline button produced the update
    pub origin: Option<MessageId>,
    callbacks: Arc<dyn CallbackDataStorageTrait>,
    message_log: MessageLog,
}

impl ReplyTarget {
    pub fn new(
        bot: Bot,
        chat_id: ChatId,
        user_id: UserId,
        callbacks: Arc<dyn CallbackDataStorageTrait>,
        message_log: MessageLog,
    ) -> Self {
        Self {
            bot,
            chat_id,
            user_id,
            origin: None,
            callbacks,
            message_log,
        }
    }

    pub fn with_origin(mut self, origin: MessageId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Deliver replies in order.
    ///
    /// After a button press the first screen replaces the pressed message
    /// when Telegram allows it; every other screen is a new message.
    pub async fn deliver(&self, replies: Vec<Reply>) -> ResponseResult<()> {
        let mut editable = self.origin;
        for reply in replies {
            match reply {
                Reply::Screen(screen) => {
                    let edit = editable.take();
                    self.show_screen(&screen, edit).await?;
                }
                Reply::Notice(text) => {
                    self.notice(text).await?;
                }
                Reply::Keyboard { node, rows } => match self.origin {
                    Some(message_id) => self.attach_inline(message_id, &rows).await?,
                    None => log::debug!("No message to update keyboard of `{}`", node),
                },
            }
        }
        Ok(())
    }

    pub async fn notice(&self, text: impl Into<String>) -> ResponseResult<Message> {
        let text = text.into();
        let msg = self.bot.send_message(self.chat_id, text.clone()).await?;
        self.record(MessageRecord::outgoing(self.user_id, text, None), &msg);
        Ok(msg)
    }

    async fn show_screen(&self, screen: &Screen, edit: Option<MessageId>) -> ResponseResult<()> {
        if let ScreenDelivery::Edit(message_id) = screen_delivery(screen, edit) {
            match self.edit_screen(screen, message_id).await {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!(
                    "Failed to edit message {} for node `{}`, sending a new one: {}",
                    message_id.0,
                    screen.node,
                    e
                ),
            }
        }

        let msg = match &screen.photo {
            Some(photo) => {
                let mut request = self
                    .bot
                    .send_photo(self.chat_id, photo_input(photo))
                    .caption(screen.text.clone());
                if let Some(mode) = parse_mode(screen.format) {
                    request = request.parse_mode(mode);
                }
                if let Some(markup) = reply_markup(&screen.keyboard) {
                    request = request.reply_markup(markup);
                }
                request.await?
            }
            None => {
                let mut request = self.bot.send_message(self.chat_id, screen.text.clone());
                if let Some(mode) = parse_mode(screen.format) {
                    request = request.parse_mode(mode);
                }
                if let Some(markup) = reply_markup(&screen.keyboard) {
                    request = request.reply_markup(markup);
                }
                request.await?
            }
        };

        if let ScreenKeyboard::Inline(rows) = &screen.keyboard {
            self.attach_inline(msg.id, rows).await?;
        }

        let mut record =
            MessageRecord::outgoing(self.user_id, screen.text.clone(), Some(screen.node.clone()));
        record.photo_file_id = msg
            .photo()
            .and_then(|sizes| sizes.last())
            .map(|size| size.file.id.0.clone());
        self.record(record, &msg);
        Ok(())
    }

    /// Only a failed text edit is an error; once the text is replaced the screen is shown
    async fn edit_screen(&self, screen: &Screen, message_id: MessageId) -> ResponseResult<()> {
        let mut request = self
            .bot
            .edit_message_text(self.chat_id, message_id, screen.text.clone());
        if let Some(mode) = parse_mode(screen.format) {
            request = request.parse_mode(mode);
        }
        // Editing the text without a markup already removes the old inline keyboard
        let msg = request.await?;

        match &screen.keyboard {
            ScreenKeyboard::Inline(rows) => {
                if let Err(e) = self.attach_inline(message_id, rows).await {
                    log::warn!(
                        "Failed to attach buttons to message {} for node `{}`: {}",
                        message_id.0,
                        screen.node,
                        e
                    );
                }
            }
            _ => {
                self.callbacks
                    .clear_message_callbacks(self.chat_id, message_id)
                    .await
            }
        }

        self.record(
            MessageRecord::outgoing(self.user_id, screen.text.clone(), Some(screen.node.clone())),
            &msg,
        );
        Ok(())
    }

    /// Attach buttons once the message id is known, so oversized payloads can be stored against it
    async fn attach_inline(&self, message_id: MessageId, rows: &InlineRows) -> ResponseResult<()> {
        let markup =
            pack_callback_data(&self.callbacks, self.chat_id, message_id, inline_rows(rows)).await;
        self.bot
            .edit_message_reply_markup(self.chat_id, message_id)
            .reply_markup(markup)
            .await?;
        Ok(())
    }

    fn record(&self, mut record: MessageRecord, msg: &Message) {
        record.message_id = Some(msg.id.0);
        self.message_log.record(record);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScreenDelivery {
    Edit(MessageId),
    Send,
}

/// Telegram cannot turn a text message into a photo or give it a reply keyboard
fn screen_delivery(screen: &Screen, edit: Option<MessageId>) -> ScreenDelivery {
    match edit {
        Some(message_id)
            if screen.photo.is_none()
                && matches!(
                    screen.keyboard,
                    ScreenKeyboard::None | ScreenKeyboard::Inline(_)
                ) =>
        {
            ScreenDelivery::Edit(message_id)
        }
        _ => ScreenDelivery::Send,
    }
}

/// A photo reference is a URL, a local file or a Telegram file id
fn photo_input(photo: &str) -> InputFile {
    if let Ok(url) = Url::parse(photo)
        && matches!(url.scheme(), "http" | "https")
    {
        InputFile::url(url)
    } else if Path::new(photo).is_file() {
        InputFile::file(photo)
    } else {
        InputFile::file_id(FileId(photo.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chatflow::flow::TextFormat;

    use super::*;

    fn screen(photo: Option<&str>, keyboard: ScreenKeyboard) -> Screen {
        Screen {
            node: "menu".to_string(),
            text: "Главное меню".to_string(),
            format: TextFormat::Plain,
            photo: photo.map(str::to_string),
            keyboard,
        }
    }

    #[test]
    fn test_screen_delivery_edits_pressed_message() {
        let pressed = Some(MessageId(42));
        assert_eq!(
            screen_delivery(&screen(None, ScreenKeyboard::None), pressed),
            ScreenDelivery::Edit(MessageId(42))
        );
        assert_eq!(
            screen_delivery(&screen(None, ScreenKeyboard::Inline(vec![])), pressed),
            ScreenDelivery::Edit(MessageId(42))
        );
    }

    #[test]
    fn test_screen_delivery_sends_when_edit_is_impossible() {
        let pressed = Some(MessageId(42));
        let reply_keyboard = ScreenKeyboard::Reply {
            rows: vec![vec!["Москва".to_string()]],
            one_time: true,
            resize: true,
        };

        assert_eq!(
            screen_delivery(&screen(Some("AgACAgIAAxkBAAI"), ScreenKeyboard::None), pressed),
            ScreenDelivery::Send
        );
        assert_eq!(
            screen_delivery(&screen(None, reply_keyboard), pressed),
            ScreenDelivery::Send
        );
        assert_eq!(
            screen_delivery(&screen(None, ScreenKeyboard::Remove), pressed),
            ScreenDelivery::Send
        );
        assert_eq!(
            screen_delivery(&screen(None, ScreenKeyboard::None), None),
            ScreenDelivery::Send
        );
    }

    fn kind(input: &InputFile) -> String {
        format!("{:?}", input)
    }

    #[test]
    fn test_photo_input_kinds() {
        assert!(kind(&photo_input("https://example.com/cat.jpg")).contains("example.com"));
        assert!(kind(&photo_input("AgACAgIAAxkBAAI")).contains("AgACAgIAAxkBAAI"));
        assert!(kind(&photo_input("Cargo.toml")).contains("Cargo.toml"));
    }
}
