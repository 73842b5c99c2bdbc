//! LLM-backed command interpretation

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{Command, CommandInterpreter, PlainCommandParser};
use crate::ids::TopicId;
use crate::llm::{ChatMessage, ChatModel};

const SYSTEM_PROMPT: &str = "\
You translate operator input for an HCS-10 agent into a single JSON object.
Reply with JSON only, no prose, using this shape:
{\"command\": \"connect\" | \"send\" | \"check\" | \"connections\" | \"status\" | \"help\" | \"quit\" | \"chat\", \"topic_id\": \"0.0.N\" or null, \"message\": string or null}
Use \"connect\" with topic_id to request a connection to another agent's inbound topic.
Use \"send\" with topic_id and message to post on a connection topic.
Use \"check\" with topic_id to read a connection topic.
Use \"chat\" for anything else.";

#[derive(Debug, Deserialize)]
struct InterpretedCommand {
    command: String,
    #[serde(default)]
    topic_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Interprets free-form input with a chat model
///
/// Input that already matches the plain grammar never reaches the model.
pub struct LlmCommandParser {
    model: Arc<dyn ChatModel>,
    plain: PlainCommandParser,
}

impl LlmCommandParser {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            plain: PlainCommandParser::new(),
        }
    }

    /// Map a model reply back onto a command; anything unusable becomes chat
    fn from_reply(line: &str, reply: &str) -> Command {
        let chat = || Command::Chat(line.to_string());

        let Ok(parsed) = serde_json::from_str::<InterpretedCommand>(strip_fences(reply)) else {
            tracing::debug!(reply, "Model reply is not a command object");
            return chat();
        };

        let topic = parsed
            .topic_id
            .as_deref()
            .and_then(|raw| raw.trim().parse::<TopicId>().ok());
        let message = parsed
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        match (parsed.command.to_ascii_lowercase().as_str(), topic, message) {
            ("connect", Some(inbound_topic), _) => Command::Connect { inbound_topic },
            ("send", Some(channel), Some(message)) => Command::Send { channel, message },
            ("check", Some(channel), _) => Command::Check { channel },
            ("connections", _, _) => Command::Connections,
            ("status", _, _) => Command::Status,
            ("help", _, _) => Command::Help,
            ("quit", _, _) => Command::Quit,
            _ => chat(),
        }
    }
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl CommandInterpreter for LlmCommandParser {
    async fn interpret(&self, line: &str) -> Command {
        let command = self.plain.parse(line);
        if !matches!(command, Command::Unrecognized(_)) || line.trim().is_empty() {
            return command;
        }

        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(line.trim())];
        match self.model.complete(&messages).await {
            Ok(reply) => Self::from_reply(line.trim(), &reply),
            Err(e) => {
                tracing::warn!("Command interpretation failed: {}", e);
                command
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use std::sync::Mutex;

    struct FakeModel {
        reply: Result<String, ()>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.calls.lock().unwrap().push(last);
            self.reply.clone().map_err(|_| LlmError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn test_plain_commands_skip_the_model() {
        let model = FakeModel::replying("{}");
        let parser = LlmCommandParser::new(model.clone());

        assert_eq!(parser.interpret("status").await, Command::Status);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_fenced_reply_becomes_command() {
        let model = FakeModel::replying(
            "```json\n{\"command\":\"send\",\"topic_id\":\"0.0.77\",\"message\":\"gm\"}\n```",
        );
        let parser = LlmCommandParser::new(model.clone());

        let command = parser.interpret("tell 0.0.77 good morning").await;
        assert_eq!(
            command,
            Command::Send {
                channel: TopicId::new(0, 0, 77),
                message: "gm".to_string()
            }
        );
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_unusable_reply_falls_back_to_chat() {
        let parser = LlmCommandParser::new(FakeModel::replying("sure, happy to help"));
        assert_eq!(
            parser.interpret("how are you").await,
            Command::Chat("how are you".to_string())
        );

        let parser = LlmCommandParser::new(FakeModel::replying(
            r#"{"command":"connect","topic_id":"nope"}"#,
        ));
        assert_eq!(
            parser.interpret("hook me up").await,
            Command::Chat("hook me up".to_string())
        );
    }

    #[tokio::test]
    async fn test_model_failure_is_unrecognized() {
        let parser = LlmCommandParser::new(FakeModel::failing());
        assert_eq!(
            parser.interpret("do a thing").await,
            Command::Unrecognized("do a thing".to_string())
        );
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("  {}  "), "{}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("```json {\"a\":1}```"), "{\"a\":1}");
    }
}
