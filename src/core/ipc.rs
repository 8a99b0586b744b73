// src/core/ipc.rs

//! Engine commands over the message bus.
//!
//! The gateway publishes `{"command", "strategy", "engine"}` on the request
//! channel and waits for `{"result", "parameter"?}` on the response channel.
//! Business outcomes travel in the reply; only transport failures and
//! timeouts are errors.

use crate::config::MessageBusConfig;
use crate::core::MoonshipError;
use crate::core::bus::{Message, MessageBus, MessageHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(CommandKind::Start),
            "stop" => Some(CommandKind::Stop),
            _ => None,
        }
    }
}

/// A request addressed to one engine about one of its strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub command: CommandKind,
    pub strategy: String,
    pub engine: String,
}

impl EngineCommand {
    pub fn start(engine: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Start,
            strategy: strategy.into(),
            engine: engine.into(),
        }
    }

    pub fn stop(engine: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Stop,
            strategy: strategy.into(),
            engine: engine.into(),
        }
    }

    pub fn to_message(&self) -> Result<Message, MoonshipError> {
        to_message(self)
    }
}

fn to_message<T: Serialize>(value: &T) -> Result<Message, MoonshipError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(MoonshipError::Serialization(format!(
            "expected an object, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageResult {
    Success,
    Unsupported,
    MissingOrInvalidParameter,
    Failed,
}

/// The reply an engine publishes for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub result: MessageResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl CommandReply {
    pub fn success() -> Self {
        Self {
            result: MessageResult::Success,
            parameter: None,
        }
    }

    pub fn unsupported() -> Self {
        Self {
            result: MessageResult::Unsupported,
            parameter: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            result: MessageResult::Failed,
            parameter: None,
        }
    }

    pub fn missing_or_invalid(parameter: impl Into<String>) -> Self {
        Self {
            result: MessageResult::MissingOrInvalidParameter,
            parameter: Some(parameter.into()),
        }
    }

    pub fn to_message(&self) -> Result<Message, MoonshipError> {
        to_message(self)
    }

    /// Interprets a reply message. Anything unrecognised counts as a failure.
    pub fn outcome_of(message: &Message) -> CommandOutcome {
        let result = message.get("result").and_then(Value::as_str);
        match result {
            Some("success") => CommandOutcome::Success,
            Some("missing_or_invalid_parameter") => CommandOutcome::MissingOrInvalidParameter(
                message
                    .get("parameter")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => CommandOutcome::Failed,
        }
    }
}

/// What the gateway makes of an engine reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    MissingOrInvalidParameter(String),
    Failed,
}

/// Gateway side: sends commands and waits for the engine's reply.
pub struct EngineClient {
    bus: Arc<MessageBus>,
    request_channel: String,
    response_channel: String,
    timeout: Duration,
    // Replies are not correlated, so only one request may be in flight.
    in_flight: Mutex<()>,
}

impl EngineClient {
    pub fn new(bus: Arc<MessageBus>, config: &MessageBusConfig) -> Self {
        Self {
            bus,
            request_channel: config.request_channel.clone(),
            response_channel: config.response_channel.clone(),
            timeout: config.reply_timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn start_strategy(
        &self,
        engine: &str,
        strategy: &str,
    ) -> Result<CommandOutcome, MoonshipError> {
        self.send(&EngineCommand::start(engine, strategy)).await
    }

    pub async fn stop_strategy(
        &self,
        engine: &str,
        strategy: &str,
    ) -> Result<CommandOutcome, MoonshipError> {
        self.send(&EngineCommand::stop(engine, strategy)).await
    }

    /// Sends `command` and waits up to the reply timeout for the answer.
    pub async fn send(&self, command: &EngineCommand) -> Result<CommandOutcome, MoonshipError> {
        let request = command.to_message()?;
        let _in_flight = self.in_flight.lock().await;
        debug!(
            "Sending '{}' for strategy '{}' to engine '{}'.",
            command.command.as_str(),
            command.strategy,
            command.engine
        );
        let reply = self
            .bus
            .publish_and_receive(
                &request,
                &self.request_channel,
                &self.response_channel,
                self.timeout,
            )
            .await?;
        Ok(CommandReply::outcome_of(&reply))
    }
}

/// Engine side: carries out a validated command.
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    async fn execute(&self, command: CommandKind, strategy: &str) -> CommandReply;
}

/// Engine side: answers commands addressed to one engine.
pub struct CommandResponder {
    engine: String,
    bus: Arc<MessageBus>,
    executor: Arc<dyn CommandExecutor>,
    request_channel: String,
    response_channel: String,
}

impl CommandResponder {
    pub fn new(
        engine: impl Into<String>,
        bus: Arc<MessageBus>,
        executor: Arc<dyn CommandExecutor>,
        config: &MessageBusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine: engine.into(),
            bus,
            executor,
            request_channel: config.request_channel.clone(),
            response_channel: config.response_channel.clone(),
        })
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Starts answering requests.
    pub async fn attach(self: &Arc<Self>) -> Result<(), MoonshipError> {
        let handler: Arc<dyn MessageHandler> = self.clone();
        self.bus.subscribe(&self.request_channel, handler).await?;
        info!(
            "Engine '{}' listening for commands on '{}'.",
            self.engine, self.request_channel
        );
        Ok(())
    }

    pub async fn detach(self: &Arc<Self>) -> Result<(), MoonshipError> {
        let handler: Arc<dyn MessageHandler> = self.clone();
        self.bus
            .unsubscribe(&self.request_channel, Some(&handler))
            .await
    }

    /// Validates the request and runs it. `None` means the request is for
    /// another engine and must not be answered.
    async fn respond(&self, message: &Message) -> Option<CommandReply> {
        let engine = match message.get("engine").and_then(Value::as_str) {
            Some(engine) => engine,
            None => {
                warn!("Ignoring engine command without an engine name.");
                return None;
            }
        };
        if engine != self.engine {
            debug!("Ignoring command addressed to engine '{}'.", engine);
            return None;
        }
        let command = match message.get("command").and_then(Value::as_str) {
            None | Some("") => return Some(CommandReply::missing_or_invalid("command")),
            Some(command) => match CommandKind::parse(command) {
                Some(kind) => kind,
                None => return Some(CommandReply::unsupported()),
            },
        };
        let strategy = match message.get("strategy").and_then(Value::as_str) {
            Some(strategy) if !strategy.is_empty() => strategy,
            _ => return Some(CommandReply::missing_or_invalid("strategy")),
        };
        Some(self.executor.execute(command, strategy).await)
    }
}

#[async_trait]
impl MessageHandler for CommandResponder {
    async fn handle(&self, message: Message, _channel: &str) -> anyhow::Result<()> {
        if let Some(reply) = self.respond(&message).await {
            self.bus
                .publish(&reply.to_message()?, &self.response_channel)
                .await?;
        }
        Ok(())
    }
}
