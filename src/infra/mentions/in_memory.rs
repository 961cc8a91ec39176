// In-memory implementation of MentionStore.
//
// Used by tests and for token-less local runs; the SQLite store is the one
// wired up in production. Both implement the same trait, so the core never
// knows which one it is talking to.

use crate::core::mentions::{LeaderboardEntry, MentionError, MentionStore, MentionTally};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Composite key: counters are scoped per guild, per channel, per user.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct ScopeKey {
    guild_id: u64,
    channel_id: u64,
    user_id: u64,
}

#[derive(Clone, Debug, Default)]
struct Counters {
    received: u64,
    given: u64,
    last_mentioned_at: Option<DateTime<Utc>>,
}

/// DashMap-backed store. The map is safe to hit from concurrent event
/// handlers without an outer mutex.
#[derive(Default)]
pub struct InMemoryMentionStore {
    data: DashMap<ScopeKey, Counters>,
}

impl InMemoryMentionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn in_scope(key: &ScopeKey, guild_id: u64, channel_id: Option<u64>) -> bool {
        key.guild_id == guild_id && channel_id.is_none_or(|ch| key.channel_id == ch)
    }
}

#[async_trait]
impl MentionStore for InMemoryMentionStore {
    async fn bump(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: u64,
        mentioned: &[u64],
        at: DateTime<Utc>,
    ) -> Result<(), MentionError> {
        for &user_id in mentioned {
            let key = ScopeKey {
                guild_id,
                channel_id,
                user_id,
            };
            let mut entry = self.data.entry(key).or_default();
            entry.received = entry.received.saturating_add(1);
            entry.last_mentioned_at = Some(at);
        }

        let author_key = ScopeKey {
            guild_id,
            channel_id,
            user_id: author_id,
        };
        let mut entry = self.data.entry(author_key).or_default();
        entry.given = entry.given.saturating_add(mentioned.len() as u64);

        Ok(())
    }

    async fn tally(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        user_id: u64,
    ) -> Result<MentionTally, MentionError> {
        let mut tally = MentionTally {
            user_id,
            received: 0,
            given: 0,
            last_mentioned_at: None,
        };

        for entry in self.data.iter() {
            let key = entry.key();
            if key.user_id != user_id || !Self::in_scope(key, guild_id, channel_id) {
                continue;
            }
            tally.received += entry.received;
            tally.given += entry.given;
            if entry.last_mentioned_at > tally.last_mentioned_at {
                tally.last_mentioned_at = entry.last_mentioned_at;
            }
        }

        Ok(tally)
    }

    async fn leaderboard(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, MentionError> {
        // Sum per user across the matching channels, then rank.
        let mut totals: std::collections::HashMap<u64, u64> = std::collections::HashMap::new();
        for entry in self.data.iter() {
            let key = entry.key();
            if Self::in_scope(key, guild_id, channel_id) && entry.received > 0 {
                *totals.entry(key.user_id).or_default() += entry.received;
            }
        }

        let mut ranked: Vec<LeaderboardEntry> = totals
            .into_iter()
            .map(|(user_id, received)| LeaderboardEntry { user_id, received })
            .collect();

        ranked.sort_by(|a, b| b.received.cmp(&a.received));
        ranked.truncate(limit);

        Ok(ranked)
    }

    async fn reset_guild(&self, guild_id: u64) -> Result<u64, MentionError> {
        let before = self.data.len();
        self.data.retain(|key, _| key.guild_id != guild_id);
        Ok((before - self.data.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: u64 = 1;
    const GENERAL: u64 = 100;
    const RANDOM: u64 = 200;

    #[tokio::test]
    async fn untracked_user_reads_as_zero() {
        let store = InMemoryMentionStore::new();
        let tally = store.tally(GUILD, None, 42).await.unwrap();
        assert_eq!(tally.received, 0);
        assert_eq!(tally.given, 0);
        assert!(tally.last_mentioned_at.is_none());
    }

    #[tokio::test]
    async fn bump_credits_targets_and_author() {
        let store = InMemoryMentionStore::new();
        store
            .bump(GUILD, GENERAL, 10, &[20, 30], Utc::now())
            .await
            .unwrap();

        assert_eq!(store.tally(GUILD, None, 20).await.unwrap().received, 1);
        assert_eq!(store.tally(GUILD, None, 30).await.unwrap().received, 1);

        let author = store.tally(GUILD, None, 10).await.unwrap();
        assert_eq!(author.given, 2);
        assert_eq!(author.received, 0);
    }

    #[tokio::test]
    async fn channel_scope_filters_counts() {
        let store = InMemoryMentionStore::new();
        store
            .bump(GUILD, GENERAL, 10, &[20], Utc::now())
            .await
            .unwrap();
        store
            .bump(GUILD, RANDOM, 10, &[20], Utc::now())
            .await
            .unwrap();

        assert_eq!(
            store.tally(GUILD, Some(GENERAL), 20).await.unwrap().received,
            1
        );
        assert_eq!(
            store.tally(GUILD, Some(RANDOM), 20).await.unwrap().received,
            1
        );
        assert_eq!(store.tally(GUILD, None, 20).await.unwrap().received, 2);
    }

    #[tokio::test]
    async fn leaderboard_is_non_increasing_and_limited() {
        let store = InMemoryMentionStore::new();
        for _ in 0..3 {
            store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();
        }
        for _ in 0..5 {
            store.bump(GUILD, RANDOM, 10, &[30], Utc::now()).await.unwrap();
        }
        store.bump(GUILD, GENERAL, 10, &[40], Utc::now()).await.unwrap();

        let board = store.leaderboard(GUILD, None, 2).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, 30);
        assert_eq!(board[0].received, 5);
        assert_eq!(board[1].user_id, 20);
        assert_eq!(board[1].received, 3);
    }

    #[tokio::test]
    async fn authors_without_received_mentions_stay_off_the_board() {
        let store = InMemoryMentionStore::new();
        store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();

        let board = store.leaderboard(GUILD, None, 10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, 20);
    }

    #[tokio::test]
    async fn reset_clears_one_guild_only() {
        let store = InMemoryMentionStore::new();
        store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();
        store.bump(2, GENERAL, 10, &[20], Utc::now()).await.unwrap();

        let removed = store.reset_guild(GUILD).await.unwrap();
        assert!(removed > 0);

        assert_eq!(store.tally(GUILD, None, 20).await.unwrap().received, 0);
        assert_eq!(store.tally(2, None, 20).await.unwrap().received, 1);
    }
}
