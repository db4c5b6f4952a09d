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

//! # top stories
//!
//! The top-N pipeline: the builder that turns raw items into the sorted story list, the warmup
//! that publishes it as a [CachedSnapshot], the supervised task that re-runs the warmup on a
//! cadence, and the reader that serves `top_stories(n)` off the published snapshot.
//!
//! Publication is atomic by construction: the snapshot goes into the store as one serialized
//! value under [SNAPSHOT_KEY], so readers see the prior snapshot or the new one, never a torn
//! intermediate. Concurrent warmups are tolerated (cold-miss readers may race the periodic task);
//! the last writer's snapshot wins & each one individually satisfies the snapshot invariants.
//!
//! Two durations govern serving & they are *not* the same knob. The reader considers a snapshot
//! expired once it is `cache_duration` old; the store entry, though, is written with TTL
//! `refresh_interval` plus one minute. The gap leaves the previous snapshot briefly retrievable
//! past its freshness deadline, which is exactly what the stale-fallback path (upstream down,
//! breaker open) serves from.

use std::{cmp::Reverse, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use snafu::{ResultExt, Snafu};
use tokio::{sync::Notify, task::JoinHandle, time::Instant};
use tracing::{error, info, warn};

use frontpage_cache::Store;

use crate::{
    entities::{CachedSnapshot, Item, Story, SNAPSHOT_KEY},
    frontpage::Frontpage,
    hacker_news,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error types                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Failure modes of a warmup
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to serialize the snapshot: {source}"))]
    Encode { source: serde_json::Error },
    #[snafu(display("Failed to retrieve the best-stories id list: {source}"))]
    Ids { source: hacker_news::Error },
    #[snafu(display("Failed to publish the snapshot: {source}"))]
    Publish { source: frontpage_cache::Error },
}

impl Error {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::Ids { source } if source.is_circuit_open())
    }
}

/// Failure modes of a read
#[derive(Debug, Snafu)]
pub enum ReadError {
    #[snafu(display("Failed to rebuild the top-stories snapshot: {source}"))]
    Rebuild { source: Error },
    #[snafu(display("Cache store failure: {source}"))]
    Store { source: frontpage_cache::Error },
    #[snafu(display("The upstream is unavailable & no snapshot exists to serve"))]
    Unavailable,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the top-N builder                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Build the full sorted story list from a batch of raw items
///
/// Filters to scored stories, sorts by score descending (stable, so ties keep their input order),
/// projects to the published DTO. No truncation here: the same snapshot serves any N, so cutting
/// to the requested length is the reader's job.
pub fn build(items: &[Item]) -> Vec<Story> {
    let mut scored: Vec<&Item> = items.iter().filter(|item| item.is_scored_story()).collect();
    scored.sort_by_key(|item| Reverse(item.score));
    scored.into_iter().map(Story::from).collect()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            warmup                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// How long past its freshness deadline the published snapshot remains retrievable
static SNAPSHOT_TTL_GRACE: Duration = Duration::from_secs(60);

/// Rebuild & publish the top-stories snapshot
///
/// Idempotent & safe to invoke concurrently. An empty upstream id list is a logged no-op success
/// (the extant snapshot, if any, remains); id-list & publish failures propagate, leaving the
/// previous snapshot untouched.
pub async fn warmup(app: &Frontpage, deadline: Instant) -> Result<(), Error> {
    let started = Instant::now();
    let ids = app.hn.best_story_ids().await.context(IdsSnafu)?;
    if ids.is_empty() {
        warn!("The upstream returned an empty id list; leaving any extant snapshot in place");
        return Ok(());
    }
    // The upstream list is a score-ordered hint; bound the working set by it.
    let working = &ids[..ids.len().min(app.tunables.max_stories)];
    let items = app.hn.fetch_many(working, deadline).await;
    let stories = build(&items);
    let snapshot = CachedSnapshot {
        cached_at: Utc::now(),
        total_stories: stories.len(),
        stories,
    };
    let buf = serde_json::to_vec(&snapshot).context(EncodeSnafu)?;
    app.store
        .set(
            SNAPSHOT_KEY,
            Bytes::from(buf),
            app.tunables.refresh_interval + SNAPSHOT_TTL_GRACE,
        )
        .await
        .context(PublishSnafu)?;
    app.instruments
        .warmup
        .stories
        .record(snapshot.total_stories as u64, &[]);
    info!(
        "Published a snapshot of {} stories in {:?}",
        snapshot.total_stories,
        started.elapsed()
    );
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the reader                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn read_snapshot(
    store: &(dyn Store + Send + Sync),
) -> Result<Option<CachedSnapshot>, frontpage_cache::Error> {
    match store.get(SNAPSHOT_KEY).await? {
        Some(buf) => match serde_json::from_slice::<CachedSnapshot>(&buf) {
            Ok(snapshot) => Ok(Some(snapshot)),
            // The snapshot is authoritative-but-rebuildable; an unreadable one is just a miss.
            Err(err) => {
                warn!("Discarding an unreadable snapshot: {err}");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

fn first_n(mut snapshot: CachedSnapshot, n: usize) -> Vec<Story> {
    snapshot.stories.truncate(n);
    snapshot.stories
}

/// Serve the top `n` stories, freshest available
///
/// `n` is clamped to `[0, max_stories]`. A fresh snapshot is served as-is (the cache-hit fast
/// path); otherwise the snapshot is rebuilt synchronously & re-read. If the rebuild surfaces a
/// breaker-open failure, any stored snapshot is served regardless of age; only when there is no
/// snapshot at all does the reader fail with [ReadError::Unavailable]. Other rebuild failures
/// propagate as [ReadError::Rebuild]-- the stale-fallback condition is deliberately narrow.
pub async fn top_stories(
    app: &Frontpage,
    n: i64,
    deadline: Instant,
) -> Result<Vec<Story>, ReadError> {
    let n = n.clamp(0, app.tunables.max_stories as i64) as usize;
    if n == 0 {
        return Ok(Vec::new());
    }

    if let Some(snapshot) = read_snapshot(app.store.as_ref()).await.context(StoreSnafu)? {
        let age = (Utc::now() - snapshot.cached_at).to_std().unwrap_or_default();
        if age <= app.tunables.cache_duration {
            app.instruments.snapshot.hits.add(1, &[]);
            return Ok(first_n(snapshot, n));
        }
    }
    app.instruments.snapshot.misses.add(1, &[]);
    info!("Snapshot missing or expired; rebuilding synchronously");

    match warmup(app, deadline).await {
        Ok(()) => match read_snapshot(app.store.as_ref()).await.context(StoreSnafu)? {
            Some(snapshot) => Ok(first_n(snapshot, n)),
            // The warmup no-op'd on an empty id list; nothing to serve & nothing wrong.
            None => Ok(Vec::new()),
        },
        Err(err) if err.is_circuit_open() => {
            match read_snapshot(app.store.as_ref()).await.context(StoreSnafu)? {
                Some(snapshot) => {
                    app.instruments.snapshot.stale_serves.add(1, &[]);
                    warn!(
                        "The upstream is unavailable; serving a stale snapshot cached at {}",
                        snapshot.cached_at
                    );
                    Ok(first_n(snapshot, n))
                }
                None => {
                    error!("The upstream is unavailable & there is no snapshot, stale or otherwise");
                    UnavailableSnafu.fail()
                }
            }
        }
        Err(err) => Err(err).context(RebuildSnafu),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          the refresher                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The supervised periodic-warmup task
///
/// Spawned at system init; holds the [Notify] with which it is told to stand down, and the
/// [JoinHandle] on which `shutdown()` waits, bounded, so the task is not leaked across a process
/// reload.
pub struct Refresher {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

#[derive(Debug, Snafu)]
pub enum ShutdownError {
    #[snafu(display("The refresher failed to run to completion: {source}"))]
    Join { source: tokio::task::JoinError },
    #[snafu(display("Timed-out waiting for the refresher to exit: {source}"))]
    ShutdownTimeout { source: tokio::time::error::Elapsed },
}

impl Refresher {
    pub fn spawn(app: Arc<Frontpage>) -> Refresher {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(refresh_loop(app, shutdown.clone()));
        Refresher { handle, shutdown }
    }
    /// Signal the task to exit & wait (at most `timeout`) for it to do so.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ShutdownError> {
        self.shutdown.notify_one();
        tokio::time::timeout(timeout, self.handle)
            .await
            .context(ShutdownTimeoutSnafu)?
            .context(JoinSnafu)
    }
}

async fn refresh_loop(app: Arc<Frontpage>, shutdown: Arc<Notify>) {
    tokio::select! {
        _ = tokio::time::sleep(app.tunables.startup_delay) => (),
        _ = shutdown.notified() => {
            info!("Refresher shutting down before its first run");
            return;
        }
    }
    loop {
        let pause = match warmup(&app, Instant::now() + app.tunables.refresh_interval).await {
            Ok(()) => {
                app.instruments.warmup.successes.add(1, &[]);
                app.tunables.refresh_interval
            }
            Err(err) => {
                app.instruments.warmup.failures.add(1, &[]);
                error!("Periodic warmup failed: {err}");
                app.tunables.error_backoff
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(pause) => (),
            _ = shutdown.notified() => {
                info!("Refresher shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn story(id: u64, score: i64, title: &str) -> Item {
        Item {
            id,
            by: None,
            time: None,
            title: Some(title.to_owned()),
            url: None,
            score: Some(score),
            descendants: None,
            kind: Some("story".to_owned()),
        }
    }

    #[test]
    fn builder_filters_and_orders() {
        let mut comment = story(2, 9999, "not really");
        comment.kind = Some("comment".to_owned());
        let mut scoreless = story(4, 0, "no score");
        scoreless.score = None;

        let stories = build(&[story(1, 50, "a"), comment, story(3, 70, "b"), scoreless]);
        assert_eq!(
            stories.iter().map(|s| s.score).collect::<Vec<_>>(),
            vec![70, 50]
        );
    }

    #[test]
    fn builder_ties_keep_input_order() {
        let stories = build(&[story(1, 10, "first"), story(2, 10, "second")]);
        assert_eq!(stories[0].title.as_deref(), Some("first"));
        assert_eq!(stories[1].title.as_deref(), Some("second"));
    }

    #[test]
    fn builder_is_total_on_empty_input() {
        assert!(build(&[]).is_empty());
    }
}
