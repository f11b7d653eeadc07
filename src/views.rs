use std::sync::Arc;

use anyhow::Result;
use chrono::DateTime;
use chrono_tz::Tz;
use log::{error, warn};

use crate::cache::BreakdownCache;
use crate::db::{BalanceSource, BreakdownRow, DutyFeeCount, RowClass};
use crate::fmt;
use crate::parser::ParsedSnapshot;
use crate::summary::SummaryStore;
use crate::transport::{Button, Keyboard, RenderedView, Transport, TransportError};

pub const TOKEN_RAW_ITEMS: &str = "show_raw";
pub const TOKEN_CACHED_BREAKDOWN: &str = "show_details";
pub const TOKEN_LIVE_BREAKDOWN: &str = "show_live";
pub const TOKEN_BACK: &str = "back_to_main";
pub const TOKEN_NOOP: &str = "noop";
const DUTY_PREFIX: &str = "duty";

/// Upper bound on rendered characters per reference-table page.
const PAGE_BUDGET: usize = 3500;

const STALE_TEXT: &str = "\u{26A0}\u{FE0F} Данные устарели — ожидаю новое сообщение";
const UNAVAILABLE_TEXT: &str = "База недоступна, попробуйте позже";

/// Where a callback token asks the state machine to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    Summary,
    RawItems,
    CachedBreakdown,
    LiveBreakdown,
    DutyFees(i64),
    /// The page-indicator button: acknowledged, never re-rendered.
    PageIndicator,
}

impl NavTarget {
    /// Decode an opaque callback token. Unknown tokens map to `None` and are
    /// acknowledged without any rendering.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            TOKEN_BACK => return Some(Self::Summary),
            TOKEN_RAW_ITEMS => return Some(Self::RawItems),
            TOKEN_CACHED_BREAKDOWN => return Some(Self::CachedBreakdown),
            TOKEN_LIVE_BREAKDOWN => return Some(Self::LiveBreakdown),
            TOKEN_NOOP => return Some(Self::PageIndicator),
            _ => {}
        }
        let (name, page) = token.split_once(':')?;
        if name != DUTY_PREFIX {
            return None;
        }
        page.parse().ok().map(Self::DutyFees)
    }
}

pub fn duty_token(page: i64) -> String {
    format!("{DUTY_PREFIX}:{page}")
}

pub fn summary_keyboard() -> Keyboard {
    Keyboard::single_column(vec![
        Button::new("\u{1F4CB} Подробно кассы", TOKEN_CACHED_BREAKDOWN),
        Button::new("\u{1F4E8} Подробно счета", TOKEN_RAW_ITEMS),
    ])
}

fn back_keyboard() -> Keyboard {
    Keyboard::single_column(vec![Button::new("\u{1F519} Назад", TOKEN_BACK)])
}

/// Rendered in place of any view whose backing data is gone, e.g. after a
/// restart wiped the parsed snapshot.
pub fn stale_placeholder() -> RenderedView {
    RenderedView { text: STALE_TEXT.to_string(), keyboard: back_keyboard() }
}

/// Raw-items view over the last parsed snapshot.
pub fn render_raw_items(snapshot: &ParsedSnapshot) -> RenderedView {
    let mut lines = Vec::with_capacity(snapshot.entries.len() * 3);
    for entry in &snapshot.entries {
        lines.push(format!("\u{25AB}\u{FE0F} {}", fmt::escape_html(&entry.label)));
        lines.push(format!("{} ₽", fmt::money(entry.amount)));
        lines.push(String::new());
    }
    RenderedView { text: lines.join("\n"), keyboard: back_keyboard() }
}

/// Breakdown view; grouped rows get the filled bullet, direct rows the
/// hollow one. `captured_at` is shown only for the cached variant.
pub fn render_breakdown(rows: &[BreakdownRow], captured_at: Option<DateTime<Tz>>) -> RenderedView {
    let mut lines = Vec::with_capacity(rows.len() * 3 + 2);
    for row in rows {
        let bullet = match row.class {
            RowClass::Grouped => "\u{25AA}\u{FE0F}",
            RowClass::Direct => "\u{25AB}\u{FE0F}",
        };
        lines.push(format!("{bullet} {}", fmt::escape_html(&row.name)));
        lines.push(format!("{} ₽", fmt::money(row.balance)));
        lines.push(String::new());
    }
    if let Some(at) = captured_at {
        lines.push(format!("\u{1F552} Данные на {}", at.format("%d.%m.%Y %H:%M")));
    }
    let keyboard = if captured_at.is_some() {
        Keyboard::single_column(vec![
            Button::new("\u{1F504} Живые данные", TOKEN_LIVE_BREAKDOWN),
            Button::new("\u{1F519} Назад", TOKEN_BACK),
        ])
    } else {
        back_keyboard()
    };
    RenderedView { text: lines.join("\n"), keyboard }
}

/// Split pre-rendered lines into pages of at most `budget` characters. Every
/// line lands on exactly one page; a single oversized line still gets its
/// own page.
fn paginate(lines: &[String], budget: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in lines {
        let line_chars = line.chars().count() + 1;
        if current_chars > 0 && current_chars + line_chars > budget {
            pages.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if current_chars > 0 {
            current.push('\n');
        }
        current.push_str(line);
        current_chars += line_chars;
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

/// One page of the regional duty-fee reference table. `page` is 1-based and
/// clamped to the valid range.
pub fn render_duty_page(rows: &[DutyFeeCount], page: i64) -> RenderedView {
    if rows.is_empty() {
        return stale_placeholder();
    }

    let lines: Vec<String> = rows
        .iter()
        .map(|r| format!("\u{25AB}\u{FE0F} {} — {}", fmt::escape_html(&r.region), r.count))
        .collect();
    let pages = paginate(&lines, PAGE_BUDGET);
    let total = pages.len() as i64;
    let page = page.clamp(1, total);
    let body = &pages[(page - 1) as usize];

    let keyboard = Keyboard::row(vec![
        Button::new("\u{2B05}\u{FE0F}", duty_token((page - 1).max(1))),
        Button::new(format!("{page}/{total}"), TOKEN_NOOP),
        Button::new("\u{27A1}\u{FE0F}", duty_token((page + 1).min(total))),
    ]);

    RenderedView {
        text: format!("<b>\u{1F4CA} Сборы по регионам</b>\n\n{body}"),
        keyboard,
    }
}

enum Outcome {
    /// Edit the triggering message in place.
    Replace(RenderedView),
    /// Keep the current view, show a transient alert instead.
    Notice(&'static str),
    /// Nothing to render, just acknowledge.
    AckOnly,
}

/// Maps view-selection callbacks to re-renders of the triggering message.
/// Every event is acknowledged exactly once, including all failure paths.
#[derive(Clone)]
pub struct Navigator {
    source: Arc<dyn BalanceSource>,
    cache: BreakdownCache,
    store: SummaryStore,
}

impl Navigator {
    pub fn new(source: Arc<dyn BalanceSource>, cache: BreakdownCache, store: SummaryStore) -> Self {
        Self { source, cache, store }
    }

    pub async fn handle_callback(
        &self,
        transport: &dyn Transport,
        callback_id: &str,
        chat_id: i64,
        message_id: i64,
        token: &str,
    ) -> Result<()> {
        let outcome = match NavTarget::from_token(token) {
            Some(target) => self.resolve(target).await,
            None => {
                warn!("ignoring unknown callback token '{token}'");
                Outcome::AckOnly
            }
        };

        match outcome {
            Outcome::Replace(view) => {
                let edited = TransportError::ignore_not_modified(
                    transport
                        .edit_message(chat_id, message_id, &view.text, Some(&view.keyboard))
                        .await,
                );
                match edited {
                    Ok(()) => self.answer(transport, callback_id, None, false).await,
                    Err(err) => {
                        error!("view edit failed for token '{token}': {err}");
                        self.answer(transport, callback_id, Some("Ошибка отображения"), true)
                            .await
                    }
                }
            }
            Outcome::Notice(text) => self.answer(transport, callback_id, Some(text), true).await,
            Outcome::AckOnly => self.answer(transport, callback_id, None, false).await,
        }

        Ok(())
    }

    async fn resolve(&self, target: NavTarget) -> Outcome {
        match target {
            NavTarget::Summary => {
                let view = self
                    .store
                    .last_summary()
                    .await
                    .unwrap_or_else(stale_placeholder);
                Outcome::Replace(view)
            }
            NavTarget::RawItems => {
                let view = match self.store.last_parsed().await {
                    Some(snapshot) if !snapshot.is_empty() => render_raw_items(&snapshot),
                    _ => stale_placeholder(),
                };
                Outcome::Replace(view)
            }
            NavTarget::CachedBreakdown => {
                let view = match self.cache.read().await {
                    Some(snapshot) if !snapshot.rows.is_empty() => {
                        render_breakdown(&snapshot.rows, Some(snapshot.captured_at))
                    }
                    _ => stale_placeholder(),
                };
                Outcome::Replace(view)
            }
            NavTarget::LiveBreakdown => {
                // The client degrades to empty when the store is down; in
                // that case keep the current view and alert instead.
                let rows = self.source.fetch_breakdown().await;
                if rows.is_empty() {
                    Outcome::Notice(UNAVAILABLE_TEXT)
                } else {
                    Outcome::Replace(render_breakdown(&rows, None))
                }
            }
            NavTarget::DutyFees(page) => {
                let rows = self.source.fetch_duty_fee_counts().await;
                Outcome::Replace(render_duty_page(&rows, page))
            }
            NavTarget::PageIndicator => Outcome::AckOnly,
        }
    }

    async fn answer(
        &self,
        transport: &dyn Transport,
        callback_id: &str,
        notice: Option<&str>,
        alert: bool,
    ) {
        if let Err(err) = transport.answer_callback(callback_id, notice, alert).await {
            error!("failed to acknowledge callback {callback_id}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::REFRESH_ZONE;
    use crate::parser::parse_balance_message;
    use crate::testutil::{row, RecordingTransport, StubSource};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn navigator(source: StubSource) -> (Navigator, BreakdownCache, SummaryStore) {
        let source = Arc::new(source);
        let cache = BreakdownCache::new(source.clone());
        let store = SummaryStore::default();
        (Navigator::new(source, cache.clone(), store.clone()), cache, store)
    }

    #[test]
    fn tokens_round_trip() {
        assert_eq!(NavTarget::from_token("back_to_main"), Some(NavTarget::Summary));
        assert_eq!(NavTarget::from_token("show_raw"), Some(NavTarget::RawItems));
        assert_eq!(NavTarget::from_token("show_details"), Some(NavTarget::CachedBreakdown));
        assert_eq!(NavTarget::from_token("show_live"), Some(NavTarget::LiveBreakdown));
        assert_eq!(NavTarget::from_token("duty:4"), Some(NavTarget::DutyFees(4)));
        assert_eq!(NavTarget::from_token("noop"), Some(NavTarget::PageIndicator));
        assert_eq!(NavTarget::from_token("duty:x"), None);
        assert_eq!(NavTarget::from_token("something_else"), None);
    }

    #[test]
    fn raw_items_render_escapes_labels() {
        let (snapshot, _) = parse_balance_message("^ООО <Ромашка>$100$");
        let view = render_raw_items(&snapshot);
        assert!(view.text.contains("ООО &lt;Ромашка&gt;"), "{}", view.text);
        assert!(view.text.contains("100,00 ₽"));
        assert_eq!(view.keyboard.rows[0][0].token, TOKEN_BACK);
    }

    #[test]
    fn breakdown_render_tags_bullets_by_class() {
        let rows = vec![
            row("Центр", dec!(100), RowClass::Grouped),
            row("Касса 1", dec!(5), RowClass::Direct),
        ];
        let view = render_breakdown(&rows, None);
        assert!(view.text.contains("\u{25AA}\u{FE0F} Центр"));
        assert!(view.text.contains("\u{25AB}\u{FE0F} Касса 1"));
    }

    #[test]
    fn cached_breakdown_shows_capture_time_and_live_button() {
        let at = REFRESH_ZONE.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let view = render_breakdown(&[row("Центр", dec!(1), RowClass::Grouped)], Some(at));
        assert!(view.text.contains("Данные на 01.06.2025 00:00"), "{}", view.text);
        assert_eq!(view.keyboard.rows[0][0].token, TOKEN_LIVE_BREAKDOWN);
    }

    #[test]
    fn pagination_splits_and_clamps() {
        // ~9000 rendered chars with a 3500 budget must give at least 3 pages
        let rows: Vec<DutyFeeCount> = (0..300)
            .map(|i| DutyFeeCount { region: format!("Region-{i:04} padding padding"), count: i })
            .collect();
        let total_chars: usize = rows
            .iter()
            .map(|r| format!("\u{25AB}\u{FE0F} {} — {}", r.region, r.count).chars().count() + 1)
            .sum();
        assert!(total_chars >= 9000);

        let first = render_duty_page(&rows, 1);
        let indicator = &first.keyboard.rows[0][1];
        let total_pages: i64 = indicator.text.split('/').nth(1).unwrap().parse().unwrap();
        assert!(total_pages >= 3, "got {total_pages} pages");

        // out-of-range pages clamp
        let below = render_duty_page(&rows, -5);
        assert!(below.keyboard.rows[0][1].text.starts_with("1/"));
        let above = render_duty_page(&rows, 9999);
        assert!(above.keyboard.rows[0][1].text.starts_with(&format!("{total_pages}/")));

        // page content stays within budget (header excluded)
        let body_chars = first.text.chars().count();
        assert!(body_chars <= PAGE_BUDGET + 30, "page too large: {body_chars}");
    }

    #[test]
    fn duty_page_controls_clamp_at_edges() {
        let rows = vec![DutyFeeCount { region: "Москва".into(), count: 12 }];
        let view = render_duty_page(&rows, 1);
        let nav = &view.keyboard.rows[0];
        assert_eq!(nav[0].token, "duty:1");
        assert_eq!(nav[1].token, TOKEN_NOOP);
        assert_eq!(nav[2].token, "duty:1");
    }

    #[tokio::test]
    async fn back_reproduces_stored_summary_verbatim() {
        let (nav, _, store) = navigator(StubSource::new(Decimal::ZERO, vec![]));
        let summary = RenderedView {
            text: "<b>stored summary</b>".into(),
            keyboard: summary_keyboard(),
        };
        store.record(summary.clone(), ParsedSnapshot::default()).await;

        let transport = RecordingTransport::default();
        nav.handle_callback(&transport, "cb1", 7, 99, TOKEN_BACK).await.unwrap();

        let edits = transport.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].text, summary.text);
        assert_eq!(edits[0].message_id, 99);
        assert_eq!(transport.answers().len(), 1);
        assert_eq!(transport.answers()[0].notice, None);
    }

    #[tokio::test]
    async fn raw_items_after_restart_renders_stale_placeholder() {
        let (nav, _, _) = navigator(StubSource::new(Decimal::ZERO, vec![]));
        let transport = RecordingTransport::default();

        nav.handle_callback(&transport, "cb1", 7, 99, TOKEN_RAW_ITEMS).await.unwrap();

        let edits = transport.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].text, STALE_TEXT);
        assert_eq!(transport.answers().len(), 1);
    }

    #[tokio::test]
    async fn cached_breakdown_renders_snapshot() {
        let (nav, cache, _) = navigator(StubSource::new(
            Decimal::ZERO,
            vec![row("Центр", dec!(42), RowClass::Grouped)],
        ));
        cache.refresh().await;

        let transport = RecordingTransport::default();
        nav.handle_callback(&transport, "cb1", 7, 99, TOKEN_CACHED_BREAKDOWN).await.unwrap();

        let edits = transport.edits();
        assert!(edits[0].text.contains("Центр"));
        assert!(edits[0].text.contains("42,00 ₽"));
    }

    #[tokio::test]
    async fn live_breakdown_unreachable_alerts_without_replacing_view() {
        let (nav, _, _) = navigator(StubSource::new(Decimal::ZERO, vec![]));
        let transport = RecordingTransport::default();

        nav.handle_callback(&transport, "cb1", 7, 99, TOKEN_LIVE_BREAKDOWN).await.unwrap();

        assert!(transport.edits().is_empty());
        let answers = transport.answers();
        assert_eq!(answers.len(), 1);
        assert!(answers[0].alert);
        assert_eq!(answers[0].notice.as_deref(), Some(UNAVAILABLE_TEXT));
    }

    #[tokio::test]
    async fn identical_rerender_is_not_an_error() {
        let (nav, _, store) = navigator(StubSource::new(Decimal::ZERO, vec![]));
        store
            .record(
                RenderedView { text: "same".into(), keyboard: summary_keyboard() },
                ParsedSnapshot::default(),
            )
            .await;

        let transport = RecordingTransport::not_modified();
        nav.handle_callback(&transport, "cb1", 7, 99, TOKEN_BACK).await.unwrap();

        let answers = transport.answers();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].notice, None, "NotModified must not surface as an error");
    }

    #[tokio::test]
    async fn unknown_token_is_acknowledged_and_ignored() {
        let (nav, _, _) = navigator(StubSource::new(Decimal::ZERO, vec![]));
        let transport = RecordingTransport::default();

        nav.handle_callback(&transport, "cb1", 7, 99, "mystery").await.unwrap();

        assert!(transport.edits().is_empty());
        assert_eq!(transport.answers().len(), 1);
    }
}
