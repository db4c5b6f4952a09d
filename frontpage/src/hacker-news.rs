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

//! # the Hacker News gateway
//!
//! Everything frontpage knows about the upstream lives here: the "best stories" id-list fetch
//! (memoized for thirty seconds), the per-item micro-cache (five minutes), and the
//! bounded-concurrency fan-out that the warmup drives.
//!
//! The error policies of the three operations differ deliberately. The id list is the one thing a
//! warmup cannot proceed without, so its failures propagate. A single item, by contrast, must
//! never poison an entire top-N build: every per-item failure-- including the breaker refusing the
//! call-- is logged at warn, counted, and swallowed to `None`. The top-N builder tolerates holes.

use std::{sync::Arc, time::Duration};

use snafu::{Backtrace, ResultExt, Snafu};
use tokio::{sync::Semaphore, task::JoinSet, time::Instant};
use tracing::warn;
use url::Url;

use frontpage_cache::Store;

use crate::{
    client::{self, ClientType},
    entities::{item_key, Item, IDS_KEY},
    metrics::Instruments,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{fragment} does not make a valid upstream URL: {source}"))]
    BadUrl {
        fragment: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse the best-stories id list: {source}"))]
    Decode {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to fetch the best-stories id list: {source}"))]
    Fetch { source: client::Error },
    #[snafu(display("Cache store failure: {source}"))]
    Store { source: frontpage_cache::Error },
}

impl Error {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::Fetch { source } if source.is_circuit_open())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Raw item records may be memoized for up to five minutes
static ITEM_TTL: Duration = Duration::from_secs(300);

/// The id list is fresher stuff; thirty seconds
static IDS_TTL: Duration = Duration::from_secs(30);

/// The upstream gateway
///
/// Cheaply clonable; clones share the client (& hence the breaker), the cache store, and-- most
/// importantly-- the fan-out semaphore, so the concurrency ceiling holds across all callers, not
/// per invocation.
#[derive(Clone)]
pub struct HackerNews {
    client: ClientType,
    store: Arc<dyn Store + Send + Sync>,
    semaphore: Arc<Semaphore>,
    instruments: Arc<Instruments>,
    base: Url,
}

impl HackerNews {
    pub fn new(
        client: ClientType,
        store: Arc<dyn Store + Send + Sync>,
        instruments: Arc<Instruments>,
        mut base: Url,
        fanout_concurrency: usize,
    ) -> HackerNews {
        // `Url::join` treats a path without a trailing slash as a file & replaces it.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        HackerNews {
            client,
            store,
            semaphore: Arc::new(Semaphore::new(fanout_concurrency)),
            instruments,
            base,
        }
    }

    /// Retrieve the ordered "best stories" id list
    ///
    /// Cached under [IDS_KEY] for thirty seconds. Upstream & store failures propagate; the warmup
    /// cannot proceed without ids. The upstream's ordering is a score-ordered hint, not
    /// load-bearing: the builder re-sorts.
    pub async fn best_story_ids(&self) -> Result<Vec<u64>> {
        if let Some(buf) = self.store.get(IDS_KEY).await.context(StoreSnafu)? {
            match serde_json::from_slice::<Vec<u64>>(&buf) {
                Ok(ids) => {
                    self.instruments.upstream.id_list_hits.add(1, &[]);
                    return Ok(ids);
                }
                Err(err) => warn!("Discarding an unreadable cached id list: {err}"),
            }
        }
        self.instruments.upstream.id_list_misses.add(1, &[]);

        let fragment = "beststories.json";
        let url = self.base.join(fragment).context(BadUrlSnafu { fragment })?;
        let body = client::fetch(&self.client, url).await.context(FetchSnafu)?;
        let ids = serde_json::from_slice::<Vec<u64>>(&body).context(DecodeSnafu)?;
        self.store
            .set(IDS_KEY, body, IDS_TTL)
            .await
            .context(StoreSnafu)?;
        Ok(ids)
    }

    /// Retrieve one raw item, through the micro-cache
    ///
    /// `None` covers every failure mode-- cache trouble, transport, breaker-open, unparseable
    /// payload, the upstream's literal `null` for an unknown id. Concurrent misses on the same id
    /// may each fetch; the write is idempotent & the last writer wins.
    pub async fn item(&self, id: u64) -> Option<Item> {
        let key = item_key(id);
        match self.store.get(&key).await {
            Ok(Some(buf)) => match serde_json::from_slice::<Item>(&buf) {
                Ok(item) => {
                    self.instruments.upstream.item_hits.add(1, &[]);
                    return Some(item);
                }
                Err(err) => warn!("Discarding an unreadable cached record for item {id}: {err}"),
            },
            Ok(None) => (),
            Err(err) => warn!("Cache read for item {id} failed: {err}"),
        }
        self.instruments.upstream.item_misses.add(1, &[]);

        let url = match self.base.join(&format!("item/{}.json", id)) {
            Ok(url) => url,
            Err(err) => {
                warn!("Item {id} does not make a valid upstream URL: {err}");
                return None;
            }
        };
        let body = match client::fetch(&self.client, url).await {
            Ok(body) => body,
            Err(err) => {
                self.instruments.upstream.item_failures.add(1, &[]);
                warn!("Failed to fetch item {id}: {err}");
                return None;
            }
        };
        let item = match serde_json::from_slice::<Item>(&body) {
            Ok(item) => item,
            Err(err) => {
                self.instruments.upstream.item_failures.add(1, &[]);
                warn!("Failed to parse item {id}: {err}");
                return None;
            }
        };
        if let Err(err) = self.store.set(&key, body, ITEM_TTL).await {
            warn!("Cache write for item {id} failed: {err}");
        }
        Some(item)
    }

    /// Fan out over `ids`, returning the successfully-retrieved items in completion order
    ///
    /// At most `fanout_concurrency` lookups run at once, enforced by the shared semaphore. If the
    /// deadline arrives first, in-flight fetches are cancelled & whatever is already in hand is
    /// returned; the builder can still produce a partial snapshot. Failures never propagate--
    /// this returns an empty list even if every single item failed.
    pub async fn fetch_many(&self, ids: &[u64], deadline: Instant) -> Vec<Item> {
        let mut tasks = JoinSet::new();
        for &id in ids {
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = match this.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return None, // semaphore closed; we're shutting down
                };
                this.item(id).await
            });
        }

        let mut items = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Some(item)))) => items.push(item),
                Ok(Some(Ok(None))) => (), // failure; already logged & counted
                Ok(Some(Err(err))) => {
                    warn!("An item fetch task failed to run to completion: {err}")
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    warn!(
                        "Deadline reached with {} of {} items in hand; cancelling the rest",
                        items.len(),
                        ids.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
        items
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use frontpage_cache::Memory;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::client::{make_client, Breaker, BreakerParameters, ClientParameters};

    fn gateway(server: &MockServer, store: Arc<Memory>, per_attempt_timeout: Duration) -> HackerNews {
        let params = ClientParameters {
            per_attempt_timeout,
            retries: 0,
            retry_unit: Duration::from_millis(2),
        };
        let client = make_client(
            "frontpage unit tests/0.0.1",
            &params,
            Breaker::new(&BreakerParameters::default()),
        )
        .unwrap();
        HackerNews::new(
            client,
            store,
            Arc::new(Instruments::new("frontpage-tests")),
            server.uri().parse().unwrap(),
            10,
        )
    }

    #[tokio::test]
    async fn items_are_memoized() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/42.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id": 42, "type": "story", "score": 7, "title": "An Essay"}"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let hn = gateway(&mock_server, Arc::new(Memory::new()), Duration::from_millis(250));
        let first = hn.item(42).await.unwrap();
        let second = hn.item(42).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.score, Some(7));
    }

    #[tokio::test]
    async fn item_failures_become_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/1.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/item/2.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&mock_server)
            .await;

        let hn = gateway(&mock_server, Arc::new(Memory::new()), Duration::from_millis(250));
        assert!(hn.item(1).await.is_none());
        assert!(hn.item(2).await.is_none());
    }

    #[tokio::test]
    async fn the_id_list_is_memoized() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/beststories.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[3, 1, 2]"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let hn = gateway(&mock_server, Arc::new(Memory::new()), Duration::from_millis(250));
        assert_eq!(hn.best_story_ids().await.unwrap(), vec![3, 1, 2]);
        assert_eq!(hn.best_story_ids().await.unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn id_list_failures_propagate() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let hn = gateway(&mock_server, Arc::new(Memory::new()), Duration::from_millis(250));
        assert!(hn.best_story_ids().await.is_err());
    }

    #[tokio::test]
    async fn fan_out_tolerates_holes() {
        let mock_server = MockServer::start().await;
        for id in [1_u64, 3] {
            Mock::given(method("GET"))
                .and(path(format!("/item/{}.json", id)))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                    r#"{{"id": {}, "type": "story", "score": {}}}"#,
                    id,
                    id * 10
                )))
                .mount(&mock_server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/item/2.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let hn = gateway(&mock_server, Arc::new(Memory::new()), Duration::from_millis(250));
        let mut items = hn
            .fetch_many(&[1, 2, 3], Instant::now() + Duration::from_secs(5))
            .await;
        items.sort_by_key(|item| item.id);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 1);
        assert_eq!(items[1].id, 3);
    }

    #[tokio::test]
    async fn fan_out_returns_what_it_has_at_the_deadline() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/1.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"id": 1, "type": "story", "score": 1}"#),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/item/2.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"id": 2, "type": "story", "score": 2}"#)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let hn = gateway(&mock_server, Arc::new(Memory::new()), Duration::from_secs(10));
        let items = hn
            .fetch_many(&[1, 2], Instant::now() + Duration::from_millis(500))
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 1);
    }
}
