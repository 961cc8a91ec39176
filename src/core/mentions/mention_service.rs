// Business logic for the mention tracker. No Discord-specific code lives here:
// the module works with primitive ids (u64) and message text, so the same
// service could sit behind any chat frontend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Default number of rows a leaderboard query returns.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
/// Upper bound on a caller-supplied leaderboard limit.
pub const MAX_LEADERBOARD_LIMIT: usize = 50;
/// How many rows an export pulls. Matches the largest ranking we ever render.
pub const EXPORT_LIMIT: usize = 1000;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// Aggregated counters for one user under a (guild, optional channel) scope.
///
/// `received` is how often the user was @-mentioned by others; `given` is how
/// often they mentioned someone else. Both start at zero and only grow, except
/// for a whole-guild reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionTally {
    pub user_id: u64,
    pub received: u64,
    pub given: u64,
    pub last_mentioned_at: Option<DateTime<Utc>>,
}

/// One row of a ranked leaderboard, ordered by `received` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: u64,
    pub received: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum MentionError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid user or guild ID")]
    InvalidId,

    #[error("Leaderboard limit must be between 1 and {MAX_LEADERBOARD_LIMIT}, got {0}")]
    InvalidLimit(usize),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Persistence contract for mention counters.
///
/// Rows are keyed by (guild_id, channel_id, user_id) and created implicitly on
/// first write. Reads over a missing key behave as if the counters were zero.
#[async_trait]
pub trait MentionStore: Send + Sync {
    /// Credit one received mention to every id in `mentioned` and
    /// `mentioned.len()` given mentions to `author_id`, all under
    /// (guild_id, channel_id). `at` becomes the targets' `last_mentioned_at`.
    async fn bump(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: u64,
        mentioned: &[u64],
        at: DateTime<Utc>,
    ) -> Result<(), MentionError>;

    /// Counters for one user, summed across channels when `channel_id` is None.
    async fn tally(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        user_id: u64,
    ) -> Result<MentionTally, MentionError>;

    /// Top users by mentions received, non-increasing order.
    async fn leaderboard(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, MentionError>;

    /// Delete every row for the guild. Returns how many rows went away.
    async fn reset_guild(&self, guild_id: u64) -> Result<u64, MentionError>;
}

// ============================================================================
// MENTION EXTRACTION
// ============================================================================

/// Extract user ids from raw `<@123>` / `<@!123>` tokens in message text.
///
/// The nick form (`<@!id>`) resolves to the same id. Role mentions (`<@&id>`),
/// channel mentions (`<#id>`) and malformed tokens are skipped. Duplicates are
/// preserved here; the service dedupes per message.
pub fn parse_mention_ids(content: &str) -> Vec<u64> {
    let mut ids = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("<@") {
        let tail = &rest[start + 2..];
        let body = tail.strip_prefix('!').unwrap_or(tail);

        if let Some(end) = body.find('>') {
            let digits = &body[..end];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                // parse() only fails on overflow past u64; treat that as malformed
                if let Ok(id) = digits.parse::<u64>() {
                    ids.push(id);
                }
                rest = &body[end + 1..];
                continue;
            }
        }

        // Not a user mention. Resume the scan right after "<@" so an
        // immediately following token is still seen.
        rest = tail;
    }

    ids
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Orchestrates mention counting over any `MentionStore` implementation.
pub struct MentionService<S: MentionStore> {
    store: S,
}

impl<S: MentionStore> MentionService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn validate_guild_id(guild_id: u64) -> Result<(), MentionError> {
        if guild_id == 0 {
            Err(MentionError::InvalidId)
        } else {
            Ok(())
        }
    }

    fn validate_ids(user_id: u64, guild_id: u64) -> Result<(), MentionError> {
        if user_id == 0 || guild_id == 0 {
            Err(MentionError::InvalidId)
        } else {
            Ok(())
        }
    }

    /// Process one guild message and bump counters for everyone it mentions.
    ///
    /// `structured_mentions` is the resolved mention list from the gateway
    /// payload; it is merged with ids parsed out of `content` so edits and
    /// partial payloads still count. Each distinct user counts once per
    /// message no matter how often they are repeated, and the author
    /// mentioning themself does not count.
    ///
    /// Returns how many users were credited (0 for a mention-free message).
    pub async fn record_message(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: u64,
        content: &str,
        structured_mentions: &[u64],
    ) -> Result<usize, MentionError> {
        Self::validate_ids(author_id, guild_id)?;

        let mut targets: BTreeSet<u64> = structured_mentions.iter().copied().collect();
        targets.extend(parse_mention_ids(content));
        targets.remove(&author_id);
        targets.remove(&0);

        if targets.is_empty() {
            return Ok(0);
        }

        let mentioned: Vec<u64> = targets.into_iter().collect();
        self.store
            .bump(guild_id, channel_id, author_id, &mentioned, Utc::now())
            .await?;

        Ok(mentioned.len())
    }

    /// Point lookup: both counters for one user, guild-wide or per channel.
    /// A user with no recorded mentions yields zeros, not an error.
    pub async fn user_tally(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        user_id: u64,
    ) -> Result<MentionTally, MentionError> {
        Self::validate_ids(user_id, guild_id)?;
        self.store.tally(guild_id, channel_id, user_id).await
    }

    /// Ranked top-N by mentions received. `limit` defaults to
    /// `DEFAULT_LEADERBOARD_LIMIT` and must stay within 1..=50.
    pub async fn leaderboard(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardEntry>, MentionError> {
        Self::validate_guild_id(guild_id)?;

        let limit = limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
        if limit == 0 || limit > MAX_LEADERBOARD_LIMIT {
            return Err(MentionError::InvalidLimit(limit));
        }

        self.store.leaderboard(guild_id, channel_id, limit).await
    }

    /// Wipe every counter for the guild. The only deletion path in the system.
    pub async fn reset_guild(&self, guild_id: u64) -> Result<u64, MentionError> {
        Self::validate_guild_id(guild_id)?;
        self.store.reset_guild(guild_id).await
    }

    /// Full guild-wide ranking for the JSON export command.
    pub async fn export_guild(
        &self,
        guild_id: u64,
    ) -> Result<Vec<LeaderboardEntry>, MentionError> {
        Self::validate_guild_id(guild_id)?;
        self.store.leaderboard(guild_id, None, EXPORT_LIMIT).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
