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

//! # frontpage
//!
//! Right now, the library crate has the same name as the binary, meaning that `rustdoc` will
//! ignore the binary crate.
pub mod client;
pub mod entities;
pub mod frontpage;
#[path = "hacker-news.rs"]
pub mod hacker_news;
pub mod http;
pub mod metrics;
pub mod storage;
pub mod token;
#[path = "top-stories.rs"]
pub mod top_stories;
pub mod users;
