// Copyright (C) 2025 The frontpage developers <frontpage-devs@example.com>
//
// This file is part of frontpage.
//
// frontpage is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// frontpage is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with frontpage.  If not,
// see <http://www.gnu.org/licenses/>.

//! # in-memory cache store
//!
//! A [Store] implementation backed by a `HashMap` guarded by an async `RwLock`. Expiry is lazy:
//! `get` checks the entry's deadline & lapsed entries are swept opportunistically on `set`, so
//! the map's size is bounded by the working set of live keys plus whatever expired since the
//! last write.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::RwLock, time::Instant};

use crate::{Result, Store};

#[derive(Debug, Default)]
pub struct Memory {
    entries: RwLock<HashMap<String, (Instant, Bytes)>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            entries: RwLock::new(HashMap::new()),
        }
    }
    /// The number of entries currently held, live or lapsed. Test affordance.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Store for Memory {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let guard = self.entries.read().await;
        Ok(guard.get(key).and_then(|(deadline, value)| {
            if Instant::now() < *deadline {
                Some(value.clone())
            } else {
                None
            }
        }))
    }
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        guard.retain(|_, (deadline, _)| now < *deadline);
        guard.insert(key.to_owned(), (now + ttl, value));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_lapse() {
        let store = Memory::new();
        store
            .set("beststories_ids", Bytes::from_static(b"[1,2,3]"), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(
            store.get("beststories_ids").await.unwrap(),
            Some(Bytes::from_static(b"[1,2,3]"))
        );

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.get("beststories_ids").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("beststories_ids").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn last_writer_wins() {
        let store = Memory::new();
        store
            .set("item_42", Bytes::from_static(b"first"), Duration::from_secs(300))
            .await
            .unwrap();
        store
            .set("item_42", Bytes::from_static(b"second"), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(
            store.get("item_42").await.unwrap(),
            Some(Bytes::from_static(b"second"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_entries_are_swept_on_set() {
        let store = Memory::new();
        store
            .set("item_1", Bytes::from_static(b"x"), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .set("item_2", Bytes::from_static(b"y"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }
}
