//! Shared test doubles for the store and transport seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::db::{BalanceSource, BreakdownRow, DutyFeeCount, RowClass};
use crate::transport::{Keyboard, Transport, TransportError};

pub fn row(name: &str, balance: Decimal, class: RowClass) -> BreakdownRow {
    BreakdownRow { name: name.into(), balance, class }
}

/// Fixed-response [`BalanceSource`] that counts scalar-balance calls.
pub struct StubSource {
    scalar: Decimal,
    breakdown: Vec<BreakdownRow>,
    duty_fees: Vec<DutyFeeCount>,
    scalar_calls: AtomicUsize,
}

impl StubSource {
    pub fn new(scalar: Decimal, breakdown: Vec<BreakdownRow>) -> Self {
        Self {
            scalar,
            breakdown,
            duty_fees: Vec::new(),
            scalar_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_duty_fees(mut self, duty_fees: Vec<DutyFeeCount>) -> Self {
        self.duty_fees = duty_fees;
        self
    }

    pub fn scalar_calls(&self) -> usize {
        self.scalar_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceSource for StubSource {
    async fn fetch_scalar_balance(&self) -> Decimal {
        self.scalar_calls.fetch_add(1, Ordering::SeqCst);
        self.scalar
    }

    async fn fetch_breakdown(&self) -> Vec<BreakdownRow> {
        self.breakdown.clone()
    }

    async fn fetch_duty_fee_counts(&self) -> Vec<DutyFeeCount> {
        self.duty_fees.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditedMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub callback_id: String,
    pub notice: Option<String>,
    pub alert: bool,
}

/// Transport double that records every outbound call. Optionally fails sends
/// to one chat or reports edits as unchanged.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent_log: Mutex<Vec<SentMessage>>,
    pub edit_log: Mutex<Vec<EditedMessage>>,
    pub answer_log: Mutex<Vec<Answer>>,
    failing_chat: Option<i64>,
    edits_not_modified: bool,
}

impl RecordingTransport {
    pub fn failing_for(chat_id: i64) -> Self {
        Self { failing_chat: Some(chat_id), ..Self::default() }
    }

    pub fn not_modified() -> Self {
        Self { edits_not_modified: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent_log.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<EditedMessage> {
        self.edit_log.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<Answer> {
        self.answer_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError> {
        if self.failing_chat == Some(chat_id) {
            return Err(TransportError::Other(format!("chat {chat_id} rejected send")));
        }
        self.sent_log.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError> {
        self.edit_log.lock().unwrap().push(EditedMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        if self.edits_not_modified {
            return Err(TransportError::NotModified);
        }
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
        alert: bool,
    ) -> Result<(), TransportError> {
        self.answer_log.lock().unwrap().push(Answer {
            callback_id: callback_id.to_string(),
            notice: notice.map(str::to_string),
            alert,
        });
        Ok(())
    }
}
