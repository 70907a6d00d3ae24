use chatflow::{
    flow::{Flow, NodeId},
    interpreter::Trigger,
};
use teloxide::{
    prelude::*,
    types::BotCommand,
    utils::command::BotCommands,
};

/// Commands every flow bot understands
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "начать сначала")]
    Start,
    #[command(description = "показать справку")]
    Help,
    #[command(description = "открыть настройки")]
    Settings,
    #[command(description = "показать сохраненные ответы")]
    Profile,
}

/// What a slash command asks for
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    /// Hand a trigger to the interpreter
    Flow(Trigger),
    Help,
    Profile,
    /// `/settings` in a flow without a settings node
    NoSettings,
    /// Command addressed to another bot in a group chat
    Ignore,
}

/// Name of the command in a message, without the slash and the bot mention
pub fn command_name(text: &str) -> Option<&str> {
    let word = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    (!name.is_empty()).then_some(name)
}

/// Bot username in `/command@bot_name`, if the command names one
pub fn command_mention(text: &str) -> Option<&str> {
    let word = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
    word.split_once('@').map(|(_, bot)| bot)
}

/// Resolve a slash command; built-in commands win over flow commands of the same name
pub fn route_command(text: &str, bot_name: &str, flow: &Flow) -> Option<CommandAction> {
    if let Some(mention) = command_mention(text)
        && !mention.eq_ignore_ascii_case(bot_name)
    {
        return Some(CommandAction::Ignore);
    }

    if let Ok(command) = Command::parse(text, bot_name) {
        return Some(match command {
            Command::Start => CommandAction::Flow(Trigger::Start),
            Command::Help => CommandAction::Help,
            Command::Profile => CommandAction::Profile,
            Command::Settings => match &flow.settings_node {
                Some(node) => CommandAction::Flow(Trigger::Enter(node.clone())),
                None => CommandAction::NoSettings,
            },
        });
    }

    let name = command_name(text)?;
    let command = flow
        .commands
        .iter()
        .find(|c| c.command.trim_start_matches('/').eq_ignore_ascii_case(name))?;
    let trigger = match flow.command_node(&command.command) {
        Some(node) => Trigger::Enter(NodeId::from(node)),
        None => Trigger::Start,
    };
    Some(CommandAction::Flow(trigger))
}

fn is_builtin(name: &str) -> bool {
    Command::bot_commands()
        .iter()
        .any(|c| c.command.trim_start_matches('/').eq_ignore_ascii_case(name))
}

/// The command menu: built-ins followed by the flow's own commands
pub fn menu_commands(flow: &Flow) -> Vec<BotCommand> {
    let mut commands: Vec<BotCommand> = Command::bot_commands()
        .into_iter()
        .map(|c| BotCommand::new(c.command.trim_start_matches('/'), c.description))
        .collect();
    for command in &flow.commands {
        let name = command.command.trim_start_matches('/').to_lowercase();
        if is_builtin(&name) {
            log::warn!("Flow command /{} is shadowed by a built-in command", name);
            continue;
        }
        commands.push(BotCommand::new(name, command.description.clone()));
    }
    commands
}

/// Publish the command menu; failures only cost the menu
pub async fn register_commands(bot: &Bot, flow: &Flow) {
    let commands = menu_commands(flow);
    let count = commands.len();
    match bot.set_my_commands(commands).await {
        Ok(_) => log::info!("Registered {} bot commands", count),
        Err(e) => log::error!("Failed to register bot commands: {}", e),
    }
}

pub fn help_text(flow: &Flow) -> String {
    let mut text = flow
        .help_text
        .clone()
        .unwrap_or_else(|| format!("🤖 {}", flow.name));
    text.push_str("\n\n");
    text.push_str(&Command::descriptions().to_string());
    for command in &flow.commands {
        let name = command.command.trim_start_matches('/');
        if !is_builtin(name) {
            text.push_str(&format!("\n/{} - {}", name, command.description));
        }
    }
    text
}

pub fn profile_text(lines: &[(String, String)]) -> String {
    if lines.is_empty() {
        return "📋 Вы еще ничего не ответили.".to_string();
    }
    let mut text = "📋 Ваши ответы:".to_string();
    for (key, value) in lines {
        text.push_str(&format!("\n• {}: {}", key, value));
    }
    text
}

pub const NO_SETTINGS_TEXT: &str = "⚙️ Настройки пока недоступны.";
