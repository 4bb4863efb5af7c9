use std::collections::{HashMap, HashSet};

use tracing::info;

use safechat_types::UserId;

#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// Moderator warnings at which a user is restricted from chat.
    pub restrict_threshold: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            restrict_threshold: 3,
        }
    }
}

/// Result of a moderator warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarnOutcome {
    pub count: u32,
    pub restricted: bool,
}

/// Chat warning counts and restrictions, per user. Neither ever decreases.
#[derive(Debug, Default)]
pub struct ModerationLedger {
    warnings: HashMap<UserId, u32>,
    restricted: HashSet<UserId>,
    config: LedgerConfig,
}

impl ModerationLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            warnings: HashMap::new(),
            restricted: HashSet::new(),
            config,
        }
    }

    /// Record a server-issued count. A stale, lower count is ignored.
    pub fn record_warning(&mut self, user: UserId, count: u32) -> u32 {
        let entry = self.warnings.entry(user).or_insert(0);
        *entry = (*entry).max(count);
        *entry
    }

    /// A moderator warned `user`: bump the count by one and restrict at the
    /// threshold.
    pub fn moderator_warn(&mut self, user: UserId) -> WarnOutcome {
        let entry = self.warnings.entry(user).or_insert(0);
        *entry += 1;
        let count = *entry;

        let restricted = if count >= self.config.restrict_threshold {
            self.restrict(user);
            true
        } else {
            self.is_restricted(user)
        };
        WarnOutcome { count, restricted }
    }

    /// Returns true if `user` was not restricted before.
    pub fn restrict(&mut self, user: UserId) -> bool {
        let newly = self.restricted.insert(user);
        if newly {
            info!("user {} restricted from chat", user);
        }
        newly
    }

    pub fn is_restricted(&self, user: UserId) -> bool {
        self.restricted.contains(&user)
    }

    pub fn warning_count(&self, user: UserId) -> u32 {
        self.warnings.get(&user).copied().unwrap_or(0)
    }

    pub fn restricted_users(&self) -> &HashSet<UserId> {
        &self.restricted
    }
}
