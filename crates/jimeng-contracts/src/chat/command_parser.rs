use super::command_registry::{CommandAction, CommandSpec, KEYWORD_COMMANDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Generate { prompt: String },
    CleanAll,
    Help,
}

fn find_action(token: &str, specs: &[CommandSpec]) -> Option<CommandAction> {
    specs
        .iter()
        .find(|spec| spec.token.eq_ignore_ascii_case(token))
        .map(|spec| spec.action)
}

/// Returns the first configured prefix `content` starts with.
pub fn matching_prefix<'a, S: AsRef<str>>(content: &str, prefixes: &'a [S]) -> Option<&'a str> {
    prefixes
        .iter()
        .map(|prefix| prefix.as_ref())
        .find(|prefix| !prefix.is_empty() && content.starts_with(prefix))
}

/// Routes a chat message to a plugin command.
///
/// `None` means the message is not addressed to the plugin. Prefixes are
/// tried in configured order and only the first match is stripped.
pub fn parse_command<S: AsRef<str>>(content: &str, prefixes: &[S]) -> Option<Command> {
    let prefix = matching_prefix(content, prefixes)?;
    let remainder = content[prefix.len()..].trim();

    if remainder.is_empty() {
        return Some(Command::Help);
    }

    match find_action(remainder, KEYWORD_COMMANDS) {
        Some(CommandAction::CleanAll) => Some(Command::CleanAll),
        None => Some(Command::Generate {
            prompt: remainder.to_string(),
        }),
    }
}
