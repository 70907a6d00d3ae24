use chatflow::{
    flow::TextFormat,
    interpreter::{ScreenButton, ScreenButtonKind, ScreenKeyboard},
};
use reqwest::Url;
use teloxide::types::{KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode, ReplyMarkup};

use crate::callback_data::ButtonData;

pub fn parse_mode(format: TextFormat) -> Option<ParseMode> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some(ParseMode::Html),
        TextFormat::MarkdownV2 => Some(ParseMode::MarkdownV2),
    }
}

/// Inline rows as button data; links that do not parse are dropped with a warning
pub fn inline_rows(rows: &[Vec<ScreenButton>]) -> Vec<Vec<ButtonData>> {
    rows.iter()
        .map(|row| row.iter().filter_map(button_data).collect::<Vec<_>>())
        .filter(|row| !row.is_empty())
        .collect()
}

fn button_data(button: &ScreenButton) -> Option<ButtonData> {
    match &button.kind {
        ScreenButtonKind::Callback(action) => Some(ButtonData::Callback(
            button.text.clone(),
            action.to_string(),
        )),
        ScreenButtonKind::Url(url) => match Url::parse(url) {
            Ok(url) => Some(ButtonData::Url(button.text.clone(), url)),
            Err(e) => {
                log::warn!("Skipping button `{}` with bad url {}: {}", button.text, url, e);
                None
            }
        },
    }
}

/// Markup that can go on the message itself; inline keyboards are attached after sending
pub fn reply_markup(keyboard: &ScreenKeyboard) -> Option<ReplyMarkup> {
    match keyboard {
        ScreenKeyboard::None | ScreenKeyboard::Inline(_) => None,
        ScreenKeyboard::Reply {
            rows,
            one_time,
            resize,
        } => {
            let buttons = rows
                .iter()
                .map(|row| row.iter().map(KeyboardButton::new).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            let mut markup = KeyboardMarkup::new(buttons);
            if *one_time {
                markup = markup.one_time_keyboard();
            }
            if *resize {
                markup = markup.resize_keyboard();
            }
            Some(ReplyMarkup::Keyboard(markup))
        }
        ScreenKeyboard::Remove => Some(ReplyMarkup::KeyboardRemove(KeyboardRemove::new())),
    }
}
