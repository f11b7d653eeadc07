use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info};
use tokio::time::sleep;

use crate::cache::BreakdownCache;
use crate::db::BalanceSource;
use crate::parser::looks_like_balance_message;
use crate::settings::Settings;
use crate::summary::{SummaryComposer, SummaryStore};
use crate::transport::{Connector, Event, Transport};
use crate::views::{render_duty_page, Navigator};

/// Entry-point command for the duty-fee reference table.
pub const COMMAND_DUTY_FEES: &str = "sbory";

/// Wait between transport reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Ties the ingestion path and the navigation handlers together. One
/// instance lives for the whole process; every inbound event passes through
/// [`App::handle_event`], which never lets an error escape to the loop.
pub struct App {
    composer: SummaryComposer,
    navigator: Navigator,
    source: Arc<dyn BalanceSource>,
    owner_chat_id: i64,
    allowed_user_ids: Vec<i64>,
}

impl App {
    pub fn new(
        settings: &Settings,
        source: Arc<dyn BalanceSource>,
        cache: BreakdownCache,
        store: SummaryStore,
    ) -> Self {
        let composer = SummaryComposer::new(
            source.clone(),
            cache.clone(),
            store.clone(),
            settings.destinations(),
        );
        let navigator = Navigator::new(source.clone(), cache, store);
        Self {
            composer,
            navigator,
            source,
            owner_chat_id: settings.owner_chat_id,
            allowed_user_ids: settings.allowed_user_ids.clone(),
        }
    }

    /// Outermost handler boundary: dispatch, and convert any error into a
    /// logged, best-effort notice to the primary chat. The event loop keeps
    /// running regardless of what happened here.
    pub async fn handle_event(&self, transport: &dyn Transport, event: Event) {
        let result = match event {
            Event::SourceMessage { text } => self.on_source_message(transport, &text).await,
            Event::Callback { callback_id, chat_id, message_id, token, .. } => {
                self.navigator
                    .handle_callback(transport, &callback_id, chat_id, message_id, &token)
                    .await
            }
            Event::Command { chat_id, user_id, name } => {
                self.on_command(transport, chat_id, user_id, &name).await
            }
        };

        if let Err(err) = result {
            error!("event handling failed: {err:#}");
            let notice = format!("\u{274C} Ошибка при обработке: {err}");
            if let Err(notice_err) = transport
                .send_message(self.owner_chat_id, &notice, None)
                .await
            {
                error!("failed to deliver error notice: {notice_err}");
            }
        }
    }

    async fn on_source_message(&self, transport: &dyn Transport, text: &str) -> Result<()> {
        if !looks_like_balance_message(text) {
            debug!("ignoring source message without both delimiters");
            return Ok(());
        }
        self.composer.publish(transport, text).await
    }

    /// The one restricted command. Out-of-list senders get no reply at all.
    async fn on_command(
        &self,
        transport: &dyn Transport,
        chat_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<()> {
        if name != COMMAND_DUTY_FEES {
            debug!("ignoring unknown command '{name}'");
            return Ok(());
        }
        if !self.allowed_user_ids.contains(&user_id) {
            info!("dropping {COMMAND_DUTY_FEES} from unlisted user {user_id}");
            return Ok(());
        }

        let rows = self.source.fetch_duty_fee_counts().await;
        let view = render_duty_page(&rows, 1);
        transport
            .send_message(chat_id, &view.text, Some(&view.keyboard))
            .await?;
        Ok(())
    }
}

/// Supervised connect-and-listen cycle. Any failure of the listener or the
/// dispatcher tears the connection down, waits a fixed interval and
/// reconnects, forever. The cache refresh schedule runs outside this loop
/// and is unaffected by transport restarts.
pub async fn run_supervised(
    app: App,
    transport: Arc<dyn Transport>,
    connector: Arc<dyn Connector>,
) {
    loop {
        match connector.connect().await {
            Ok(mut stream) => {
                info!("transport connected, listening for events");
                loop {
                    match stream.next_event().await {
                        Ok(event) => app.handle_event(transport.as_ref(), event).await,
                        Err(err) => {
                            error!("event stream failed: {err}; restarting connection");
                            break;
                        }
                    }
                }
            }
            Err(err) => error!("transport connect failed: {err}"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}
