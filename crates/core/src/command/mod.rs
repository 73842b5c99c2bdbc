//! Operator commands
//!
//! Interactive agents read operator input through a [`CommandSource`] and turn
//! each line into a [`Command`] with a [`CommandInterpreter`]. Neither the
//! source nor the interpreter ever blocks the async runtime, and the
//! reconciliation loop does not depend on either.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use crate::ids::TopicId;

pub mod llm;

pub use llm::LlmCommandParser;

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a connection request to another agent's inbound topic
    Connect { inbound_topic: TopicId },
    /// Post a message on a connection topic
    Send { channel: TopicId, message: String },
    /// Show new messages on a connection topic
    Check { channel: TopicId },
    /// List established connections
    Connections,
    /// Show monitor status
    Status,
    Help,
    Quit,
    /// Free-form conversation
    Chat(String),
    /// Input that could not be understood
    Unrecognized(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect { inbound_topic } => write!(f, "connect {}", inbound_topic),
            Command::Send { channel, message } => write!(f, "send {} {}", channel, message),
            Command::Check { channel } => write!(f, "check {}", channel),
            Command::Connections => f.write_str("connections"),
            Command::Status => f.write_str("status"),
            Command::Help => f.write_str("help"),
            Command::Quit => f.write_str("quit"),
            Command::Chat(text) => write!(f, "chat: {}", text),
            Command::Unrecognized(text) => write!(f, "unrecognized: {}", text),
        }
    }
}

/// Help text listing the plain command grammar
pub const HELP: &str = "\
Commands:
  connect <inbound-topic>        request a connection with another agent
  send <channel> <message...>    post a message on a connection topic
  check <channel>                show new messages on a connection topic
  connections                    list established connections
  status                         show the connection monitor status
  help                           show this help
  quit                           exit";

/// Produces operator input lines
#[async_trait]
pub trait CommandSource: Send {
    /// Next input line, or `None` once the source is exhausted
    async fn next_line(&mut self) -> Option<String>;
}

/// Reads lines from standard input without blocking the runtime
pub struct StdinCommandSource {
    lines: Lines<BufReader<Stdin>>,
    prompt: Option<String>,
}

impl StdinCommandSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: None,
        }
    }

    /// Print `prompt` before each read
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

impl Default for StdinCommandSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandSource for StdinCommandSource {
    async fn next_line(&mut self) -> Option<String> {
        if let Some(prompt) = &self.prompt {
            let mut stdout = tokio::io::stdout();
            // A prompt that fails to print is not worth aborting input for.
            let _ = stdout.write_all(prompt.as_bytes()).await;
            let _ = stdout.flush().await;
        }

        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read from stdin: {}", e);
                None
            }
        }
    }
}

/// Replays a fixed list of lines
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommandSource {
    lines: VecDeque<String>,
}

impl ScriptedCommandSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

#[async_trait]
impl CommandSource for ScriptedCommandSource {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Turns an input line into a command
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    async fn interpret(&self, line: &str) -> Command;
}

/// Deterministic verb-first grammar (see [`HELP`])
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCommandParser;

impl PlainCommandParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, line: &str) -> Command {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let unrecognized = || Command::Unrecognized(line.to_string());
        let topic = |raw: &str| raw.parse::<TopicId>().ok();

        match verb.to_ascii_lowercase().as_str() {
            "connect" => topic(rest)
                .map(|inbound_topic| Command::Connect { inbound_topic })
                .unwrap_or_else(unrecognized),
            "send" => {
                let (channel, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                match (topic(channel), message.trim()) {
                    (Some(channel), message) if !message.is_empty() => Command::Send {
                        channel,
                        message: message.to_string(),
                    },
                    _ => unrecognized(),
                }
            }
            "check" | "messages" => topic(rest)
                .map(|channel| Command::Check { channel })
                .unwrap_or_else(unrecognized),
            "connections" | "list" if rest.is_empty() => Command::Connections,
            "status" if rest.is_empty() => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => unrecognized(),
        }
    }
}

#[async_trait]
impl CommandInterpreter for PlainCommandParser {
    async fn interpret(&self, line: &str) -> Command {
        self.parse(line)
    }
}
