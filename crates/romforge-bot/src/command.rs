//! Parsing of chat commands.

use regex::Regex;
use std::sync::LazyLock;

/// `/name`, an optional `@botname` suffix, then free-form arguments.
static COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/([A-Za-z_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start` or `/help`.
    Start,
    Build(Vec<String>),
    Logs,
    Queue,
    Cancel(Vec<String>),
    Move(Vec<String>),
    ClearQueue,
}

impl Command {
    /// Parse a message text; `None` for non-commands and unknown commands.
    pub fn parse(text: &str) -> Option<Self> {
        let captures = COMMAND.captures(text.trim())?;
        let name = captures.get(1)?.as_str().to_ascii_lowercase();
        let args: Vec<String> = captures
            .get(2)
            .map(|m| m.as_str().split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        let command = match name.as_str() {
            "start" | "help" => Command::Start,
            "build" => Command::Build(args),
            "logs" => Command::Logs,
            "queue" => Command::Queue,
            "cancel" => Command::Cancel(args),
            "move" => Command::Move(args),
            "clearqueue" => Command::ClearQueue,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Build(_) => "build",
            Command::Logs => "logs",
            Command::Queue => "queue",
            Command::Cancel(_) => "cancel",
            Command::Move(_) => "move",
            Command::ClearQueue => "clearqueue",
        }
    }
}

/// A queue position written as plain digits.
pub fn parse_position(arg: &str) -> Option<usize> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}
