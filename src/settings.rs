use anyhow::{bail, Result};
use serde::Serialize;

/// Relational store connection options.
#[derive(Debug, Clone, Serialize)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub charset: String,
}

/// Credentials for the chat transport: the bot identity used for outbound
/// pushes and the source-account session used to watch the broadcast channel.
#[derive(Debug, Clone, Serialize)]
pub struct TransportSettings {
    pub api_id: i32,
    #[serde(skip_serializing)]
    pub api_hash: String,
    pub session: String,
    #[serde(skip_serializing)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub db: DbSettings,
    pub transport: TransportSettings,
    /// Primary destination chat. Always receives summaries and error notices.
    pub owner_chat_id: i64,
    /// Up to three secondary destination chats.
    pub extra_chat_ids: Vec<i64>,
    /// Numeric user ids allowed to issue the reference-table command.
    pub allowed_user_ids: Vec<i64>,
}

impl Settings {
    /// Load settings from the process environment. Every key is required;
    /// all missing or malformed values are reported in one diagnostic so a
    /// partially-configured process never starts.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut problems: Vec<String> = Vec::new();

        let mut require = |key: &str| -> String {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => value,
                _ => {
                    problems.push(format!("{key} is not set"));
                    String::new()
                }
            }
        };

        let host = require("DB_HOST");
        let port_raw = require("DB_PORT");
        let user = require("DB_USER");
        let password = require("DB_PASS");
        let name = require("DB_NAME");
        let charset = require("DB_CHARSET");
        let api_id_raw = require("TG_API_ID");
        let api_hash = require("TG_API_HASH");
        let session = require("TG_SESSION");
        let bot_token = require("BOT_TOKEN");
        let owner_raw = require("OWNER_CHAT_ID");
        let allowed_raw = require("ALLOWED_USER_IDS");
        let extra_raw = lookup("EXTRA_CHAT_IDS").unwrap_or_default();

        let port = parse_number::<u16>("DB_PORT", &port_raw, &mut problems);
        let api_id = parse_number::<i32>("TG_API_ID", &api_id_raw, &mut problems);
        let owner_chat_id = parse_number::<i64>("OWNER_CHAT_ID", &owner_raw, &mut problems);
        let allowed_user_ids = parse_id_list("ALLOWED_USER_IDS", &allowed_raw, &mut problems);
        let extra_chat_ids = parse_id_list("EXTRA_CHAT_IDS", &extra_raw, &mut problems);

        if extra_chat_ids.len() > 3 {
            problems.push(format!(
                "EXTRA_CHAT_IDS allows at most 3 chats, got {}",
                extra_chat_ids.len()
            ));
        }

        if !problems.is_empty() {
            bail!("configuration is incomplete: {}", problems.join("; "));
        }

        Ok(Self {
            db: DbSettings { host, port, user, password, name, charset },
            transport: TransportSettings { api_id, api_hash, session, bot_token },
            owner_chat_id,
            extra_chat_ids,
            allowed_user_ids,
        })
    }

    /// All destination chats, primary first, duplicates removed. A secondary
    /// id equal to the primary must not receive the summary twice.
    pub fn destinations(&self) -> Vec<i64> {
        let mut out = vec![self.owner_chat_id];
        for &id in &self.extra_chat_ids {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    pub fn is_allowed_issuer(&self, user_id: i64) -> bool {
        self.allowed_user_ids.contains(&user_id)
    }
}

fn parse_number<T: std::str::FromStr + Default>(
    key: &str,
    raw: &str,
    problems: &mut Vec<String>,
) -> T {
    if raw.is_empty() {
        // missing value already reported
        return T::default();
    }
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            problems.push(format!("{key} is not a valid number: '{raw}'"));
            T::default()
        }
    }
}

fn parse_id_list(key: &str, raw: &str, problems: &mut Vec<String>) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                problems.push(format!("{key} contains an invalid id: '{part}'"));
                None
            }
        })
        .collect()
}
