use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;

use safechat_moderation::SessionConfig;
use safechat_sync::{LedgerConfig, ReconcileConfig};
use safechat_transport::TransportConfig;
use safechat_types::UserId;

/// Who the local user is. Passed to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub context: ClientContext,
    pub transport: TransportConfig,
    pub reconcile: ReconcileConfig,
    pub session: SessionConfig,
    pub ledger: LedgerConfig,
}

impl ClientConfig {
    /// Defaults for everything except the user.
    pub fn new(context: ClientContext) -> Self {
        Self {
            context,
            transport: TransportConfig::default(),
            reconcile: ReconcileConfig::default(),
            session: SessionConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }

    /// Read `SAFECHAT_*` variables from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup("SAFECHAT_USERNAME").unwrap_or_default();
        let username = username.trim();
        if username.is_empty() {
            bail!("SAFECHAT_USERNAME must be set");
        }

        let user_id = match lookup("SAFECHAT_USER_ID") {
            Some(raw) => UserId(raw.parse().context("SAFECHAT_USER_ID must be a number")?),
            None => UserId(Utc::now().timestamp_millis().unsigned_abs()),
        };

        let mut config = Self::new(ClientContext {
            user_id,
            username: username.to_string(),
        });

        if let Some(url) = lookup("SAFECHAT_SERVER_URL") {
            config.transport.server_url = url;
        }
        if let Some(delay) = millis(&lookup, "SAFECHAT_RECONNECT_DELAY_MS")? {
            config.transport.reconnect_delay = delay;
        }
        if let Some(window) = millis(&lookup, "SAFECHAT_MATCH_WINDOW_MS")? {
            config.reconcile.match_window = window;
        }
        if let Some(cooldown) = millis(&lookup, "SAFECHAT_RESTART_COOLDOWN_MS")? {
            config.session.restart_cooldown = cooldown;
        }

        Ok(config)
    }
}

fn millis<F>(lookup: &F, key: &str) -> anyhow::Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("{} must be a whole number of milliseconds", key))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        None => Ok(None),
    }
}
