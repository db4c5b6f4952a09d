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

//! # storage
//!
//! Abstractions for the frontpage user-storage layer. The application writes to this generic API;
//! which *implementation* backs it is chosen at startup. At the time of this writing there is one:
//! [Memory], which is also what the test suites inject.

use std::collections::HashMap;

use async_trait::async_trait;
use snafu::Backtrace;
use tokio::sync::RwLock;

use crate::users::{User, Username};

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
    #[allow(dead_code)] // captured for operator diagnostics, not read programmatically
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
}

#[async_trait]
pub trait Backend {
    /// Add a user; return true if the user was actually created, false if the username was
    /// already taken.
    async fn add_user(&self, user: &User) -> Result<bool, Error>;
    /// Retrieve a [User] given a username. None means there is no user by that name.
    async fn user_for_name(&self, name: &Username) -> Result<Option<User>, Error>;
}

/// The in-memory [Backend]
///
/// Durable user storage is out of scope; this map lives & dies with the process.
#[derive(Debug, Default)]
pub struct Memory {
    users: RwLock<HashMap<Username, User>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            users: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Backend for Memory {
    async fn add_user(&self, user: &User) -> Result<bool, Error> {
        let mut users = self.users.write().await;
        if users.contains_key(user.username()) {
            Ok(false)
        } else {
            users.insert(user.username().clone(), user.clone());
            Ok(true)
        }
    }
    async fn user_for_name(&self, name: &Username) -> Result<Option<User>, Error> {
        Ok(self.users.read().await.get(name).cloned())
    }
}
