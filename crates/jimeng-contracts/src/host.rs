//! Types exchanged between the chat host and its plugins.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextType {
    Text,
    Image,
    Voice,
    File,
    Other(String),
}

/// One incoming chat message as the host hands it to plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub kind: ContextType,
    pub content: String,
}

impl Context {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ContextType::Text,
            content: content.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image(Vec<u8>),
    Error(String),
    /// Header text followed by several replies, sent in order.
    Batch { text: String, replies: Vec<Reply> },
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Text(_) => "text",
            Reply::Image(_) => "image",
            Reply::Error(_) => "error",
            Reply::Batch { .. } => "batch",
        }
    }
}

// Image payloads are summarized so log lines stay readable.
impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Reply::Image(bytes) => write!(f, "Image({} bytes)", bytes.len()),
            Reply::Error(text) => f.debug_tuple("Error").field(text).finish(),
            Reply::Batch { text, replies } => f
                .debug_struct("Batch")
                .field("text", text)
                .field("replies", replies)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventAction {
    /// Hand the event to the next plugin.
    #[default]
    Continue,
    /// Send the reply and stop plugin processing.
    BreakPass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub context: Context,
    pub reply: Option<Reply>,
    pub action: EventAction,
}

impl EventContext {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            reply: None,
            action: EventAction::Continue,
        }
    }

    pub fn respond(&mut self, reply: Reply) {
        self.reply = Some(reply);
        self.action = EventAction::BreakPass;
    }

    pub fn is_handled(&self) -> bool {
        self.action == EventAction::BreakPass
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMeta {
    pub name: &'static str,
    pub desire_priority: i32,
    pub hidden: bool,
    pub desc: &'static str,
    pub version: &'static str,
    pub author: &'static str,
}

pub trait Plugin {
    fn meta(&self) -> &PluginMeta;
    fn on_handle_context(&self, event: &mut EventContext);
    fn help_text(&self, verbose: bool) -> String;
}
