//! Watches a finance broadcast channel, extracts itemized balance entries,
//! joins them with a daily-cached cashbox breakdown and republishes a
//! summary with drill-down views to the configured chats.
//!
//! The chat client itself lives outside this crate: the embedding binary
//! supplies a [`transport::Transport`] for outbound calls and a
//! [`transport::Connector`] for the inbound event stream, then hands both to
//! [`start`].

pub mod app;
pub mod cache;
pub mod db;
pub mod fmt;
pub mod parser;
pub mod settings;
pub mod summary;
pub mod transport;
pub mod views;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use log::info;

use app::App;
use cache::BreakdownCache;
use db::Database;
use settings::Settings;
use summary::SummaryStore;
use transport::{Connector, Transport};

/// RUST_LOG-driven logging, defaulting to `info`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Wire everything up and run until the process is killed: spawn the daily
/// cache refresh schedule, then drive the supervised connect-and-listen
/// cycle. Call [`Settings::from_env`] first; a configuration error there is
/// fatal and must abort startup before this point.
pub async fn start(
    settings: Settings,
    transport: Arc<dyn Transport>,
    connector: Arc<dyn Connector>,
) {
    info!(
        "starting: primary chat {}, {} extra destination(s)",
        settings.owner_chat_id,
        settings.extra_chat_ids.len()
    );

    let source = Arc::new(Database::new(&settings.db));
    let cache = BreakdownCache::new(source.clone());
    let store = SummaryStore::default();

    tokio::spawn(cache::run_refresh_schedule(cache.clone()));

    let app = App::new(&settings, source, cache, store);
    app::run_supervised(app, transport, connector).await
}
