mod command_parser;
mod command_registry;

pub use command_parser::{matching_prefix, parse_command, Command};
pub use command_registry::{CLEAN_ALL_COMMAND, EXAMPLE_PROMPT};
