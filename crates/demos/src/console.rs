//! Console agent - executes operator commands over the loopback feed

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use hcs_agent_core::command::HELP;
use hcs_agent_core::{
    ChatMessage, ChatModel, Command, CommandInterpreter, CommandSource, MonitorStatus, TopicId,
};

use crate::handshakes::LoopbackHandshake;
use crate::peer::LoopbackPeer;

const CHAT_PROMPT: &str = "You are a friendly HCS-10 agent chatting with your operator. \
Keep answers short. Operators can type `help` to see what you can do on the network.";

const MAX_HISTORY: usize = 20;

/// Result of executing one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// Executes commands on behalf of one agent
///
/// The agent accepts incoming connections through its own monitor (whose
/// status is watched here) and opens outgoing ones through its peer.
pub struct Console {
    peer: Arc<LoopbackPeer>,
    handshake: Arc<LoopbackHandshake>,
    status: watch::Receiver<MonitorStatus>,
    chat: Option<Arc<dyn ChatModel>>,
    history: Vec<ChatMessage>,
    confirm_timeout: Duration,
    confirm_poll: Duration,
}

impl Console {
    /// # Arguments
    ///
    /// * `peer` - This agent's identity and inbound topic
    /// * `handshake` - Invoker used by this agent's monitor
    /// * `status` - Status feed of this agent's monitor
    pub fn new(
        peer: Arc<LoopbackPeer>,
        handshake: Arc<LoopbackHandshake>,
        status: watch::Receiver<MonitorStatus>,
    ) -> Self {
        Self {
            peer,
            handshake,
            status,
            chat: None,
            history: Vec::new(),
            confirm_timeout: Duration::from_secs(10),
            confirm_poll: Duration::from_millis(250),
        }
    }

    /// Answer free-form input with a chat model
    pub fn with_chat(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(model);
        self
    }

    /// How long `connect` waits for the other agent's confirmation
    pub fn with_confirm_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.confirm_timeout = timeout;
        self.confirm_poll = poll;
        self
    }

    /// Read, interpret and execute lines until the source ends or `quit`
    ///
    /// Every reply is handed to `out`. Returns the number of executed commands.
    pub async fn run<S, F>(
        &mut self,
        source: &mut S,
        interpreter: &dyn CommandInterpreter,
        mut out: F,
    ) -> usize
    where
        S: CommandSource + ?Sized,
        F: FnMut(&str),
    {
        let mut executed = 0;

        while let Some(line) = source.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            let command = interpreter.interpret(&line).await;
            tracing::debug!(%command, "Interpreted input");
            executed += 1;

            match self.execute(command).await {
                Reply::Text(text) => out(&text),
                Reply::Quit => break,
            }
        }

        executed
    }

    pub async fn execute(&mut self, command: Command) -> Reply {
        let text = match command {
            Command::Connect { inbound_topic } => self.connect(&inbound_topic).await,
            Command::Send { channel, message } => match self.peer.send(&channel, &message).await {
                Ok(seq) => format!("Sent message #{} on {}", seq, channel),
                Err(e) => format!("Could not send on {}: {}", channel, e),
            },
            Command::Check { channel } => self.check(&channel).await,
            Command::Connections => self.connections().await,
            Command::Status => self.status(),
            Command::Help => HELP.to_string(),
            Command::Quit => return Reply::Quit,
            Command::Chat(text) => self.converse(text).await,
            Command::Unrecognized(text) => {
                format!("Unrecognized command '{}'. Type `help` for commands.", text)
            }
        };

        Reply::Text(text)
    }

    async fn connect(&self, target: &TopicId) -> String {
        if *target == self.peer.inbound_topic() {
            return "That is our own inbound topic.".to_string();
        }

        let request_id = match self
            .peer
            .request_connection(target, Some("Hello from the console"))
            .await
        {
            Ok(id) => id,
            Err(e) => return format!("Could not request a connection on {}: {}", target, e),
        };

        match self
            .peer
            .await_confirmation(target, request_id, self.confirm_timeout, self.confirm_poll)
            .await
        {
            Some(connection) => format!(
                "Connected to {} on channel {} (request #{})",
                connection.peer, connection.channel, request_id
            ),
            None => format!(
                "Request #{} sent to {}; no confirmation yet",
                request_id, target
            ),
        }
    }

    async fn check(&self, channel: &TopicId) -> String {
        let messages = self.peer.read_new(channel).await;
        if messages.is_empty() {
            return format!("No new messages on {}", channel);
        }

        messages
            .iter()
            .map(|m| {
                format!(
                    "[{}] {}: {}",
                    m.sequence_number,
                    m.sender.as_deref().unwrap_or("unknown"),
                    m.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn connections(&self) -> String {
        let incoming = self.handshake.connections().await;
        let outgoing = self.peer.outgoing().await;
        if incoming.is_empty() && outgoing.is_empty() {
            return "No connections yet".to_string();
        }

        let incoming = incoming
            .iter()
            .map(|c| format!("  <- {} on {} (request #{})", c.peer, c.channel, c.request_id));
        let outgoing = outgoing
            .iter()
            .map(|c| format!("  -> {} on {} (request #{})", c.peer, c.channel, c.request_id));

        std::iter::once("Connections:".to_string())
            .chain(incoming)
            .chain(outgoing)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn status(&self) -> String {
        let status = self.status.borrow();
        format!(
            "Monitor on {}: {} | watermark {} | processed {} | accepted {} | failed {} | dead letters {}",
            status.topic_id,
            status.state,
            status.watermark,
            status.processed,
            status.stats.handshakes_completed,
            status.stats.handshakes_failed,
            status.dead_letters.len()
        )
    }

    async fn converse(&mut self, text: String) -> String {
        let Some(model) = self.chat.clone() else {
            return "I only understand commands without an LLM configured. Type `help`.".to_string();
        };

        self.history.push(ChatMessage::user(text));
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(CHAT_PROMPT));
        messages.extend(self.history.iter().cloned());

        match model.complete(&messages).await {
            Ok(reply) => {
                self.history.push(ChatMessage::assistant(reply.clone()));
                reply
            }
            Err(e) => {
                tracing::warn!("Chat completion failed: {}", e);
                format!("(chat unavailable: {})", e)
            }
        }
    }
}
