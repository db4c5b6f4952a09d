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

//! # frontpage metrics
//!
//! Frontpage uses [OpenTelemetry] to collect & export metrics. OTel advises re-using instruments
//! rather than re-creating them at each collection site, which raises the question of where to
//! keep them. Frontpage's instrument set is small & closed-- a dozen counters and a gauge, every
//! one known at startup-- so the instruments are plain typed fields here, grouped by subsystem &
//! built once from the global meter. Collection sites reach through the [Instruments] instance
//! hung off the application state:
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! ```ignore
//! state.instruments.snapshot.hits.add(1, &[]);
//! ```
//!
//! A misspelled or mis-typed metric is a compile error, and there is no name-keyed lookup to
//! panic in some little-used code path. The price is that adding a metric means touching this
//! module; at frontpage's scale that's a feature-- the full instrument inventory is readable in
//! one screen.
//!
//! Everything is pre-built in [Instruments::new], so recording never needs `&mut self` & the
//! instance can live behind an `Arc`.

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
};

/// Traffic between the gateway & the upstream item API
pub struct Upstream {
    /// Id-list requests answered from the cache store
    pub id_list_hits: Counter<u64>,
    /// Id-list requests that went to the upstream
    pub id_list_misses: Counter<u64>,
    /// Item lookups answered from the micro-cache
    pub item_hits: Counter<u64>,
    /// Item lookups that went to the upstream
    pub item_misses: Counter<u64>,
    /// Item lookups swallowed to `None`: transport trouble, breaker open, unparseable payload
    pub item_failures: Counter<u64>,
}

impl Upstream {
    fn new(meter: &Meter) -> Upstream {
        Upstream {
            id_list_hits: meter.u64_counter("upstream.ids.hits").build(),
            id_list_misses: meter.u64_counter("upstream.ids.misses").build(),
            item_hits: meter.u64_counter("upstream.items.hits").build(),
            item_misses: meter.u64_counter("upstream.items.misses").build(),
            item_failures: meter.u64_counter("upstream.items.failures").build(),
        }
    }
}

/// Reads served off the published snapshot
pub struct Snapshot {
    /// Fresh-snapshot fast path
    pub hits: Counter<u64>,
    /// Missing-or-expired snapshot; a synchronous rebuild followed
    pub misses: Counter<u64>,
    /// Past-freshness snapshots served because the breaker was open
    pub stale_serves: Counter<u64>,
}

impl Snapshot {
    fn new(meter: &Meter) -> Snapshot {
        Snapshot {
            hits: meter.u64_counter("snapshot.hits").build(),
            misses: meter.u64_counter("snapshot.misses").build(),
            stale_serves: meter.u64_counter("snapshot.stale-serves").build(),
        }
    }
}

/// The warmup pipeline, periodic & reader-driven alike
pub struct Warmup {
    pub successes: Counter<u64>,
    pub failures: Counter<u64>,
    /// Story count of the most recently published snapshot
    pub stories: Gauge<u64>,
}

impl Warmup {
    fn new(meter: &Meter) -> Warmup {
        Warmup {
            successes: meter.u64_counter("warmup.successes").build(),
            failures: meter.u64_counter("warmup.failures").build(),
            stories: meter.u64_gauge("warmup.stories").build(),
        }
    }
}

/// The user API
pub struct Users {
    pub auth_successes: Counter<u64>,
    pub auth_failures: Counter<u64>,
    pub signups: Counter<u64>,
    pub logins: Counter<u64>,
}

impl Users {
    fn new(meter: &Meter) -> Users {
        Users {
            auth_successes: meter.u64_counter("user.auth.successes").build(),
            auth_failures: meter.u64_counter("user.auth.failures").build(),
            signups: meter.u64_counter("user.signups").build(),
            logins: meter.u64_counter("user.logins").build(),
        }
    }
}

/// Container for frontpage's OTel instruments
pub struct Instruments {
    pub upstream: Upstream,
    pub snapshot: Snapshot,
    pub warmup: Warmup,
    pub users: Users,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let meter = global::meter(prefix);
        Instruments {
            upstream: Upstream::new(&meter),
            snapshot: Snapshot::new(&meter),
            warmup: Warmup::new(&meter),
            users: Users::new(&meter),
        }
    }
}
