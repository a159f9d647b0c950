#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub token: &'static str,
    pub action: CommandAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandAction {
    CleanAll,
}

/// Literal tokens recognized after a drawing prefix. Matched ASCII
/// case-insensitively against the whole remainder of the message.
pub(crate) const KEYWORD_COMMANDS: &[CommandSpec] = &[CommandSpec {
    token: CLEAN_ALL_COMMAND,
    action: CommandAction::CleanAll,
}];

pub const CLEAN_ALL_COMMAND: &str = "clean_all";

pub const EXAMPLE_PROMPT: &str = "可爱的熊猫漫画";
