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

//! # frontpaged
//!
//! The frontpage daemon: a read-through aggregation service in front of the Hacker News item API.
//! Clients ask for the top N highest-scoring stories; frontpaged answers from a pre-computed
//! snapshot kept warm by a background task, and weathers upstream trouble with retries, a circuit
//! breaker & stale-fallback.

use std::{future::IntoFuture, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use opentelemetry::KeyValue;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use serde::Deserialize;
use snafu::{prelude::*, Snafu};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tracing::{error, info, Level};
use tracing_subscriber::filter::EnvFilter;
use url::Url;

use frontpage_cache::{Memory as MemoryStore, Redis, Store};

use frontpage::{
    client::{make_client, Breaker, BreakerParameters, ClientParameters},
    frontpage::{Frontpage, Tunables},
    hacker_news::HackerNews,
    http::make_router,
    metrics::Instruments,
    storage::Memory as MemoryUsers,
    token::SigningKey,
    top_stories::Refresher,
    users::Pepper,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     application Error type                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The frontpaged application error type
///
/// `main()` returns `Result<(), Error>`, and on the `Err` variant the Rust runtime prints the
/// `Debug` representation; the derived one is unreadable, so `Debug` here is hand-written to
/// forward to `Display`.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {address}: {source}"))]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Failed to create an HTTP client: {source}"))]
    Client { source: frontpage::client::Error },
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to shut down the refresher: {source}"))]
    RefresherShutdown {
        source: frontpage::top_stories::ShutdownError,
    },
    #[snafu(display("Failed to install a signal handler: {source}"))]
    Signal { source: std::io::Error },
    #[snafu(display("Failed to connect to the cache store: {source}"))]
    Store { source: frontpage_cache::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Frontpage cache-store configuration
///
/// Most of frontpage writes to the generic [Store] API; which *implementation* backs it is chosen
/// here, at startup.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheConfig {
    /// In-process map; fine for a single node, vanishes on restart
    Memory,
    /// Shared Redis; give a connection URL like "redis://127.0.0.1:6379"
    Redis { url: String },
}

/// Frontpage configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct ConfigV1 {
    /// Local address at which to listen; specify as "address:port"
    #[serde(rename = "listen-address")]
    listen_address: SocketAddr,
    /// Base URL of the upstream item API
    #[serde(rename = "upstream-base-url")]
    upstream_base_url: Url,
    /// Sent on every outbound request, identifying this service
    #[serde(rename = "user-agent")]
    user_agent: String,
    /// The address at which this instance is reached; doubles as the token issuer
    origin: String,
    cache: CacheConfig,
    client: ClientParameters,
    breaker: BreakerParameters,
    /// Ceiling on concurrent in-flight upstream item fetches
    #[serde(rename = "fanout-concurrency")]
    fanout_concurrency: usize,
    #[serde(rename = "refresh-interval")]
    refresh_interval: Duration,
    #[serde(rename = "cache-duration")]
    cache_duration: Duration,
    #[serde(rename = "max-stories")]
    max_stories: usize,
    #[serde(rename = "startup-delay")]
    startup_delay: Duration,
    #[serde(rename = "error-backoff")]
    error_backoff: Duration,
    /// Hex-encoded HMAC-SHA256 key; omit to generate a fresh one at startup (extant tokens won't
    /// survive a restart)
    #[serde(rename = "signing-key")]
    signing_key: Option<SigningKey>,
    #[serde(rename = "token-lifetime")]
    token_lifetime: Duration,
    /// Hex-encoded site-wide password pepper; omit to generate a fresh one at startup (extant
    /// password hashes won't survive a restart)
    pepper: Option<Pepper>,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            listen_address: "127.0.0.1:8080".parse().unwrap(/* known good */),
            upstream_base_url: "https://hacker-news.firebaseio.com/v0".parse().unwrap(/* known good */),
            user_agent: format!(
                "frontpage/{} (+https://git.example.com/frontpage/frontpage)",
                crate_version!()
            ),
            origin: "http://127.0.0.1:8080".to_owned(),
            cache: CacheConfig::Memory,
            client: ClientParameters::default(),
            breaker: BreakerParameters::default(),
            fanout_concurrency: 10,
            refresh_interval: Duration::from_secs(120),
            cache_duration: Duration::from_secs(120),
            max_stories: 200,
            startup_delay: Duration::from_secs(10),
            error_backoff: Duration::from_secs(30),
            signing_key: None,
            token_lifetime: Duration::from_secs(12 * 3600),
            pepper: None,
        }
    }
}

fn parse_config(pth: Option<&PathBuf>) -> Result<ConfigV1> {
    match pth {
        Some(pth) => {
            let text = std::fs::read_to_string(pth).context(ConfigNotFoundSnafu { pth })?;
            toml::from_str(&text).context(ConfigParseSnafu { pth })
        }
        None => Ok(ConfigV1::default()),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            serving                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Initialize telemetry; returns the exporter backing the `/metrics` endpoint
///
/// Must be invoked from inside the Tokio runtime, but before any instruments are accessed.
fn init_telemetry() -> PrometheusExporter {
    let exporter = PrometheusExporter::new();
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attribute(KeyValue::new("service.name", "frontpage"))
                .build(),
        )
        .with_reader(exporter.clone())
        .build();
    opentelemetry::global::set_meter_provider(provider);
    exporter
}

async fn select_store(config: &CacheConfig) -> Result<Arc<dyn Store + Send + Sync>> {
    match config {
        CacheConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        CacheConfig::Redis { url } => {
            Ok(Arc::new(Redis::new(url).await.context(StoreSnafu)?))
        }
    }
}

/// Serve frontpage API requests until signalled to stop
async fn serve(cfg: ConfigV1) -> Result<()> {
    let exporter = init_telemetry();
    let instruments = Arc::new(Instruments::new("frontpage"));
    let store = select_store(&cfg.cache).await?;
    let client = make_client(&cfg.user_agent, &cfg.client, Breaker::new(&cfg.breaker))
        .context(ClientSnafu)?;
    let hn = HackerNews::new(
        client,
        store.clone(),
        instruments.clone(),
        cfg.upstream_base_url.clone(),
        cfg.fanout_concurrency,
    );
    let state = Arc::new(Frontpage {
        hn,
        store,
        users: Arc::new(MemoryUsers::new()),
        instruments,
        exporter,
        origin: cfg.origin.clone(),
        signing_key: cfg.signing_key.clone().unwrap_or_else(SigningKey::random),
        token_lifetime: chrono::Duration::from_std(cfg.token_lifetime)
            .unwrap_or_else(|_| chrono::Duration::hours(12)),
        pepper: cfg.pepper.clone().unwrap_or_default(),
        tunables: Tunables {
            refresh_interval: cfg.refresh_interval,
            cache_duration: cfg.cache_duration,
            max_stories: cfg.max_stories,
            startup_delay: cfg.startup_delay,
            error_backoff: cfg.error_backoff,
        },
    });

    let refresher = Refresher::spawn(state.clone());

    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let listener = TcpListener::bind(cfg.listen_address)
        .await
        .context(BindSnafu {
            address: cfg.listen_address,
        })?;
    info!("frontpage listening on {}", cfg.listen_address);

    let nfy = Arc::new(Notify::new());
    let server = axum::serve(listener, make_router(state))
        .with_graceful_shutdown(shutdown_signal(nfy.clone()));
    let mut server = server.into_future();

    let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;
    tokio::select! {
        // The server *should* never exit on its own.
        res = &mut server => {
            if let Err(err) = res {
                error!("The server exited early: {err}");
            }
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM; draining & shutting down.");
            nfy.notify_one();
            if let Err(err) = server.await {
                error!("While draining: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT; draining & shutting down.");
            nfy.notify_one();
            if let Err(err) = server.await {
                error!("While draining: {err}");
            }
        }
    }

    // The periodic warmup is supervised: signal it & wait, bounded, so it isn't leaked.
    refresher
        .shutdown(Duration::from_secs(5))
        .await
        .context(RefresherShutdownSnafu)?;

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn main() -> Result<()> {
    let matches = Command::new("frontpaged")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Top Hacker News stories, served in milliseconds")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to a TOML configuration file; every key has a default"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .action(ArgAction::SetTrue)
                .help("Print the effective configuration & exit"),
        )
        .get_matches();

    let level = match (
        matches.get_flag("debug"),
        matches.get_flag("verbose"),
        matches.get_flag("quiet"),
    ) {
        (true, _, _) => Level::TRACE,
        (false, true, _) => Level::DEBUG,
        (false, false, true) => Level::ERROR,
        (_, _, _) => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("frontpage={level},frontpaged={level},info")));
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt().with_env_filter(filter).finish(),
    )
    .context(SubscriberSnafu)?;

    let cfg = parse_config(matches.get_one::<PathBuf>("config"))?;
    if matches.get_flag("dump-config") {
        // Secret material (signing key, pepper) has redacting Debug implementations.
        println!("{:#?}", cfg);
        return Ok(());
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context(TokioRuntimeSnafu)?
        .block_on(serve(cfg))
}
