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

//! # entities
//!
//! Core types for the frontpage data model: the raw upstream [Item], the published [Story] DTO,
//! and the [CachedSnapshot] that is the unit of atomic publication. Also home to the cache-key
//! constants, since every other module needs them & they belong with the things they name.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Cache key under which the pre-processed top-stories snapshot is published
pub static SNAPSHOT_KEY: &str = "preprocessed_top_stories";

/// Cache key under which the upstream "best stories" id list is memoized
pub static IDS_KEY: &str = "beststories_ids";

/// Cache key for an individual raw item record
pub fn item_key(id: u64) -> String {
    format!("item_{}", id)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Item                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A raw Hacker News item, as deserialized from `/v0/item/<id>.json`
///
/// Everything but `id` is optional upstream-- deleted items, jobs and polls routinely omit
/// fields-- so everything but `id` is an `Option` here. Unknown fields are ignored.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Item {
    pub id: u64,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub descendants: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Item {
    /// An item is eligible for the top list iff it is a story with a known score.
    pub fn is_scored_story(&self) -> bool {
        self.kind.as_deref() == Some("story") && self.score.is_some()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Story                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The published story DTO
///
/// This is the shape clients see; the field names below are load-bearing wire format.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub title: Option<String>,
    pub uri: Option<String>,
    pub posted_by: Option<String>,
    /// ISO-8601 with offset, or "" if the item carried no timestamp
    pub time: String,
    /// 0 if unknown (unreachable for items admitted by [Item::is_scored_story])
    pub score: i64,
    /// 0 if unknown
    pub comment_count: i64,
}

impl From<&Item> for Story {
    fn from(item: &Item) -> Story {
        Story {
            title: item.title.clone(),
            uri: item.url.clone(),
            posted_by: item.by.clone(),
            time: item.time.map(format_unix_time).unwrap_or_default(),
            score: item.score.unwrap_or(0),
            comment_count: item.descendants.unwrap_or(0),
        }
    }
}

/// Format Unix seconds as `YYYY-MM-DDTHH:MM:SS+00:00`; out-of-range values degrade to "".
fn format_unix_time(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false))
        .unwrap_or_default()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          CachedSnapshot                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The authoritative published artifact: the full sorted story list plus its publication instant
///
/// Invariants: `stories` is sorted by `score` descending (ties in fetch-completion order), every
/// element projects from a scored story, `total_stories == stories.len()`, and `cached_at` is the
/// instant of publication-- not the instant the fan-out began.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CachedSnapshot {
    pub stories: Vec<Story>,
    pub cached_at: DateTime<Utc>,
    pub total_stories: usize,
}
