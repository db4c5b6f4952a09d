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

use std::{sync::Arc, time::Duration};

use opentelemetry_prometheus_text_exporter::PrometheusExporter;

use frontpage_cache::Store;

use crate::{
    hacker_news::HackerNews, metrics::Instruments, storage::Backend as UserBackend, token::SigningKey,
    users::Pepper,
};

/// Serving-side tunables; every one of these has a sensible default
#[derive(Clone, Debug)]
pub struct Tunables {
    /// Cadence of the periodic warmup, and the budget handed to any single warmup
    pub refresh_interval: Duration,
    /// Age past which the reader considers a snapshot expired. Distinct from the snapshot store
    /// TTL (`refresh_interval` + one minute) on purpose: the gap is the stale-fallback window.
    pub cache_duration: Duration,
    /// Upper bound on the top-N working set
    pub max_stories: usize,
    /// How long the periodic warmup waits after process start
    pub startup_delay: Duration,
    /// How long the periodic warmup waits after a failed run
    pub error_backoff: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            refresh_interval: Duration::from_secs(120),
            cache_duration: Duration::from_secs(120),
            max_stories: 200,
            startup_delay: Duration::from_secs(10),
            error_backoff: Duration::from_secs(30),
        }
    }
}

/// Application state available to all handlers & to the refresher
pub struct Frontpage {
    pub hn: HackerNews,
    pub store: Arc<dyn Store + Send + Sync>,
    pub users: Arc<dyn UserBackend + Send + Sync>,
    pub instruments: Arc<Instruments>,
    pub exporter: PrometheusExporter,
    /// This instance's public origin; doubles as the token issuer
    pub origin: String,
    pub signing_key: SigningKey,
    pub token_lifetime: chrono::Duration,
    pub pepper: Pepper,
    pub tunables: Tunables,
}
