use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// One inline button: a caption plus the opaque callback token it sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub token: String,
}

impl Button {
    pub fn new(text: impl Into<String>, token: impl Into<String>) -> Self {
        Self { text: text.into(), token: token.into() }
    }
}

/// Inline menu attached to an outbound message, one button row per entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn single_column(buttons: Vec<Button>) -> Self {
        Self { rows: buttons.into_iter().map(|b| vec![b]).collect() }
    }

    pub fn row(buttons: Vec<Button>) -> Self {
        Self { rows: vec![buttons] }
    }
}

/// A fully rendered view: HTML text plus its menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedView {
    pub text: String,
    pub keyboard: Keyboard,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The edit produced byte-identical content. Re-rendering the same view
    /// is a no-op for us, not a failure.
    #[error("message content unchanged")]
    NotModified,
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Collapse the idempotent "nothing changed" case into success.
    pub fn ignore_not_modified(result: Result<(), TransportError>) -> Result<(), TransportError> {
        match result {
            Err(TransportError::NotModified) => Ok(()),
            other => other,
        }
    }
}

/// Inbound events from the combined listener/dispatcher pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Free-text message observed on the watched source chat.
    SourceMessage { text: String },
    /// A button press on one of our rendered views.
    Callback {
        callback_id: String,
        chat_id: i64,
        message_id: i64,
        user_id: i64,
        token: String,
    },
    /// The restricted entry-point command.
    Command { chat_id: i64, user_id: i64, name: String },
}

/// Outbound half of the chat layer. The concrete client lives outside this
/// crate; handlers only rely on these operations.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError>;

    /// Edit a previously sent message in place.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError>;

    /// Acknowledge a callback. `notice` shows a transient toast; `alert`
    /// escalates it to a blocking popup.
    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
        alert: bool,
    ) -> Result<(), TransportError>;
}

/// Inbound half of the chat layer: a connected stream of events. A returned
/// error means the connection is gone and the supervisor should reconnect.
#[async_trait]
pub trait EventStream: Send {
    async fn next_event(&mut self) -> Result<Event, TransportError>;
}

/// Factory for event streams, invoked by the supervisor on every
/// (re)connect of the listener/dispatcher pair.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventStream>, TransportError>;
}
