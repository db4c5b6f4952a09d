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

//! # frontpage-cache
//!
//! The [frontpage] cache store: a key-value store with string keys, byte-string values and a
//! per-entry absolute TTL.
//!
//! [frontpage]: https://git.example.com/frontpage/frontpage
//!
//! Everything frontpage caches goes through the [Store] trait defined here: the raw item records,
//! the "best stories" id list, and the pre-processed top-stories snapshot itself. The trait is
//! deliberately tiny-- `get` & `set`-- with eviction left to the implementation (entries simply
//! stop being returned once their TTL has lapsed). Two implementations are provided: [Memory], an
//! in-process map suitable for tests & single-node deployments, and [Redis], the network variant
//! for production.
//!
//! The store is authoritative-but-rebuildable: losing it entirely costs one warmup, nothing more,
//! so none of the implementations make any durability promises.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Backtrace;

pub mod memory;
pub mod redis;

pub use self::memory::Memory;
pub use self::redis::Redis;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The cache-store error type
///
/// Modeled after the storage layer's approach: implementations' native errors are boxed-up into a
/// single opaque variant, since no caller can do anything more clever with a failed cache access
/// than log it & move on (or, in the warmup's case, propagate it).
#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
    backtrace: Backtrace,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
            backtrace: Backtrace::capture(),
        }
    }
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the Store trait                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Object-safe trait abstracting over the cache store
///
/// Implementations must be safe for concurrent use; last-writer-wins on concurrent `set`s of the
/// same key.
#[async_trait]
pub trait Store {
    /// Retrieve the value cached under `key`. `None` means either that no one ever wrote that key,
    /// or that the entry's TTL has lapsed; callers can't (and needn't) tell the difference.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    /// Cache `value` under `key` for `ttl`, replacing any previous entry wholesale.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;
}
