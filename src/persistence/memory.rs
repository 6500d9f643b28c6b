//! In-process [`AccountDirectory`] implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, ready};

use super::{Account, AccountDirectory};
use crate::error::ServerError;

/// Directory backed by in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    accounts: RwLock<HashMap<i64, Account>>,
    members: RwLock<HashMap<i64, BTreeSet<i64>>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an account.
    pub fn insert_account(&self, account: Account) {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.id, account);
    }

    /// Adds an account to a chat channel.
    pub fn add_member(&self, channel_id: i64, account_id: i64) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id)
            .or_default()
            .insert(account_id);
    }
}

impl AccountDirectory for MemoryDirectory {
    fn find_account(&self, id: i64) -> BoxFuture<'_, Result<Option<Account>, ServerError>> {
        let account = self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        ready(Ok(account)).boxed()
    }

    fn channel_members(&self, channel_id: i64) -> BoxFuture<'_, Result<Vec<i64>, ServerError>> {
        let members = self
            .members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ready(Ok(members)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_inserted_accounts() {
        let directory = MemoryDirectory::new();
        directory.insert_account(Account {
            id: 7,
            username: "mika".to_string(),
        });

        let found = directory.find_account(7).await.ok().flatten();
        assert_eq!(found.map(|a| a.username).as_deref(), Some("mika"));
        assert!(matches!(directory.find_account(8).await, Ok(None)));
    }

    #[tokio::test]
    async fn lists_channel_members_once() {
        let directory = MemoryDirectory::new();
        directory.add_member(1, 10);
        directory.add_member(1, 11);
        directory.add_member(1, 10);

        assert_eq!(directory.channel_members(1).await.ok(), Some(vec![10, 11]));
        assert_eq!(directory.channel_members(2).await.ok(), Some(Vec::new()));
    }
}
