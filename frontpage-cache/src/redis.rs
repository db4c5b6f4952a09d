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

//! # Redis cache store
//!
//! The network [Store] variant. All three of frontpage's key families (`item_<id>`,
//! `beststories_ids`, `preprocessed_top_stories`) carry TTLs of whole seconds, so `SET` with `EX`
//! covers our needs; sub-second TTLs are rounded up rather than silently becoming "no expiry".

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tracing::debug;

use crate::{Error, Result, Store};

/// A [Store] backed by a Redis server
///
/// The multiplexed connection is cheaply clonable & handles pipelining internally, so a single
/// instance serves all of frontpage's tasks.
#[derive(Clone)]
pub struct Redis {
    connection: MultiplexedConnection,
}

impl Redis {
    /// Connect to the Redis server at `url` (e.g. "redis://127.0.0.1:6379").
    pub async fn new(url: &str) -> Result<Redis> {
        let client = redis::Client::open(url).map_err(Error::new)?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(Error::new)?;
        debug!("Connected to the Redis cache store at {url}");
        Ok(Redis { connection })
    }
}

#[async_trait]
impl Store for Redis {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection.get(key).await.map_err(Error::new)?;
        Ok(value.map(Bytes::from))
    }
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let seconds = std::cmp::max(1, ttl.as_secs());
        let _: () = connection
            .set_ex(key, value.as_ref(), seconds)
            .await
            .map_err(Error::new)?;
        Ok(())
    }
}
