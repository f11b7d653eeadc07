use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{error, info};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::cache::{BreakdownCache, REFRESH_ZONE};
use crate::db::BalanceSource;
use crate::fmt;
use crate::parser::{parse_balance_message, ParsedSnapshot};
use crate::transport::{RenderedView, Transport};
use crate::views;

/// Process-wide holder of the last successfully composed summary and the
/// snapshot it was parsed from. Single writer (the ingestion path); the
/// navigation handlers only read. Both start empty after a restart.
#[derive(Clone, Default)]
pub struct SummaryStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    summary: Option<RenderedView>,
    parsed: Option<ParsedSnapshot>,
}

impl SummaryStore {
    pub async fn record(&self, summary: RenderedView, parsed: ParsedSnapshot) {
        let mut guard = self.inner.lock().await;
        guard.summary = Some(summary);
        guard.parsed = Some(parsed);
    }

    pub async fn last_summary(&self) -> Option<RenderedView> {
        self.inner.lock().await.summary.clone()
    }

    pub async fn last_parsed(&self) -> Option<ParsedSnapshot> {
        self.inner.lock().await.parsed.clone()
    }
}

/// Builds the outbound summary from a parsed message plus the cashbox
/// figure, records it as last-known and fans it out to the destinations.
pub struct SummaryComposer {
    source: Arc<dyn BalanceSource>,
    cache: BreakdownCache,
    store: SummaryStore,
    destinations: Vec<i64>,
}

impl SummaryComposer {
    /// `destinations` must already be deduplicated (see
    /// [`crate::settings::Settings::destinations`]).
    pub fn new(
        source: Arc<dyn BalanceSource>,
        cache: BreakdownCache,
        store: SummaryStore,
        destinations: Vec<i64>,
    ) -> Self {
        Self { source, cache, store, destinations }
    }

    /// Parse `text`, compose the summary and push it everywhere. Returns an
    /// error only after attempting every destination.
    pub async fn publish(&self, transport: &dyn Transport, text: &str) -> Result<()> {
        let (parsed, total) = parse_balance_message(text);
        let kassa = self.kassa_figure().await;
        let view = RenderedView {
            text: compose_summary_text(total, kassa),
            keyboard: views::summary_keyboard(),
        };

        self.store.record(view.clone(), parsed).await;

        let mut failed = 0usize;
        for &chat_id in &self.destinations {
            if let Err(err) = transport
                .send_message(chat_id, &view.text, Some(&view.keyboard))
                .await
            {
                error!("failed to push summary to chat {chat_id}: {err}");
                failed += 1;
            }
        }
        info!(
            "summary pushed to {}/{} destinations",
            self.destinations.len() - failed,
            self.destinations.len()
        );

        if failed > 0 {
            return Err(anyhow!("summary push failed for {failed} destination(s)"));
        }
        Ok(())
    }

    /// Degrade chain for the cashbox figure: cached breakdown total if
    /// nonzero, otherwise a live scalar query (which itself degrades to 0).
    async fn kassa_figure(&self) -> Decimal {
        if let Some(snapshot) = self.cache.read().await {
            let total = snapshot.total();
            if total != Decimal::ZERO {
                return total;
            }
        }
        self.source.fetch_scalar_balance().await
    }
}

fn compose_summary_text(total: Decimal, kassa: Decimal) -> String {
    let date = Utc::now().with_timezone(&REFRESH_ZONE).format("%d.%m.%Y");
    format!(
        "<b>\u{1F4C5} Баланс Экосмотр на {date}</b>\n\n\
         \u{1F4B3} <b>1. Р/с:</b> {total} ₽\n\
         \u{1F3E6} <b>2. Кассы Драйв:</b> {kassa} ₽\n\n\
         \u{1F9FE} <b>Итого:</b> {grand} ₽",
        total = fmt::money(total),
        kassa = fmt::money(kassa),
        grand = fmt::money(total + kassa),
    )
}
