use std::sync::Arc;

use chatflow::{
    error::FlowError,
    interpreter::{Action, Event, Interpreter, Trigger},
    storage::UserInfo,
};
use serde_json::json;
use teloxide::{
    prelude::*,
    types::{CallbackQuery, Me},
};

use crate::{
    callback_data::{CallbackDataStorageTrait, unpack_callback_data},
    commands::{CommandAction, NO_SETTINGS_TEXT, help_text, profile_text, route_command},
    message_log::{MessageLog, MessageRecord},
    reply_target::ReplyTarget,
};

/// Handle text messages: slash commands, reply keyboard presses and typed answers
pub async fn handle_text_message(
    bot: Bot,
    msg: Message,
    me: Me,
    interpreter: Arc<Interpreter>,
    callbacks: Arc<dyn CallbackDataStorageTrait>,
    message_log: MessageLog,
) -> ResponseResult<()> {
    let (Some(text), Some(user)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };
    let user = UserInfo::from(user);
    log::info!("Text from user {} in chat {}", user.id, msg.chat.id);
    message_log.record(MessageRecord::incoming(user.id, text, msg.id.0));

    let target = ReplyTarget::new(bot, msg.chat.id, user.id, callbacks, message_log);

    let trigger = if text.starts_with('/') {
        match route_command(text, me.username(), interpreter.flow()) {
            Some(CommandAction::Flow(trigger)) => trigger,
            Some(CommandAction::Help) => {
                target.notice(help_text(interpreter.flow())).await?;
                return Ok(());
            }
            Some(CommandAction::Profile) => {
                let lines = interpreter.profile_lines(user.id).await;
                target.notice(profile_text(&lines)).await?;
                return Ok(());
            }
            Some(CommandAction::NoSettings) => {
                target.notice(NO_SETTINGS_TEXT).await?;
                return Ok(());
            }
            Some(CommandAction::Ignore) => {
                log::debug!("Ignoring command for another bot: {}", text);
                return Ok(());
            }
            None => Trigger::Text(text.to_string()),
        }
    } else {
        Trigger::Text(text.to_string())
    };

    run(&interpreter, &target, Event::new(user, trigger)).await
}

/// Handle callback queries from inline keyboard buttons
pub async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    interpreter: Arc<Interpreter>,
    callbacks: Arc<dyn CallbackDataStorageTrait>,
    message_log: MessageLog,
) -> ResponseResult<()> {
    // Answer the callback query to remove the loading state
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = &q.data else {
        return Ok(());
    };
    let Some(msg) = q.message.as_ref().and_then(|m| m.regular_message()) else {
        log::warn!("Callback {} without an accessible message", data);
        return Ok(());
    };

    let unpacked = unpack_callback_data(&callbacks, data).await;
    let Ok(action) = unpacked.parse::<Action>() else {
        log::warn!("Ignoring unknown callback data: {}", unpacked);
        return Ok(());
    };
    log::info!("Button {} pressed by user {}", action, q.from.id);

    let user = UserInfo::from(&q.from);
    let mut record = MessageRecord::incoming(user.id, unpacked.clone(), msg.id.0);
    record.node = Some(action.node().to_string());
    record.data = json!({ "callback": unpacked });
    message_log.record(record);

    let target =
        ReplyTarget::new(bot, msg.chat.id, user.id, callbacks, message_log).with_origin(msg.id);
    run(&interpreter, &target, Event::new(user, Trigger::Action(action))).await
}

/// Shown instead of internal flow errors, which stay in the log
pub const FLOW_ERROR_TEXT: &str = "❌ Что-то пошло не так. Попробуйте /start.";
pub const FLOW_LOOP_TEXT: &str = "❌ Сценарий зациклился. Попробуйте /start.";

async fn run(interpreter: &Interpreter, target: &ReplyTarget, event: Event) -> ResponseResult<()> {
    match interpreter.handle(event).await {
        Ok(replies) => target.deliver(replies).await,
        Err(e) => {
            log::error!("Flow error for user {}: {}", target.user_id, e);
            target.notice(flow_error_reply(&e)).await?;
            Ok(())
        }
    }
}

fn flow_error_reply(error: &FlowError) -> &'static str {
    match error {
        FlowError::AutoAdvanceLimit(..) => FLOW_LOOP_TEXT,
        _ => FLOW_ERROR_TEXT,
    }
}
