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

//! # the HTTP façade
//!
//! Request validation, response shaping & caching headers for the stories API, plus the odds &
//! ends every service carries (`/healthz`, `/metrics`). The interesting work happens in
//! [top_stories](crate::top_stories); handlers here translate between HTTP & that module's
//! vocabulary.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::error;

use crate::{
    frontpage::Frontpage,
    top_stories::{self, ReadError},
    users,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Error Responses                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A serializable struct for use in HTTP error responses
///
/// Intended for the [IntoResponse] implementations of whatever error type an axum handler is
/// using, so that every error a client sees has the same JSON shape.
///
/// [IntoResponse]: https://docs.rs/axum/latest/axum/response/trait.IntoResponse.html
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `/best-stories`                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize)]
struct TopQuery {
    n: Option<i64>,
}

/// `GET /best-stories?n=<int>`
///
/// Serves at most `n` stories (default: the configured maximum) from the freshest snapshot
/// available. Successful responses carry a strong `ETag` (hex SHA-256 of the body) & a
/// `Cache-Control` matching the snapshot freshness window; a matching `If-None-Match` short-
/// circuits to 304.
async fn best_stories(
    State(state): State<Arc<Frontpage>>,
    query: Result<Query<TopQuery>, QueryRejection>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                ErrorResponseBody {
                    error: format!("{}", rejection),
                },
            )
                .into_response();
        }
    };
    let n = query.n.unwrap_or(state.tunables.max_stories as i64);
    let deadline = Instant::now() + state.tunables.refresh_interval;
    match top_stories::top_stories(&state, n, deadline).await {
        Ok(stories) => {
            let body = match serde_json::to_vec(&stories) {
                Ok(body) => body,
                Err(err) => {
                    error!("Failed to serialize {} stories: {err}", stories.len());
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponseBody {
                            error: format!("{}", err),
                        },
                    )
                        .into_response();
                }
            };
            let etag = format!("\"{}\"", hex::encode(Sha256::digest(&body)));
            if headers
                .get(header::IF_NONE_MATCH)
                .and_then(|value| value.to_str().ok())
                == Some(etag.as_str())
            {
                return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
            }
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/json".to_owned()),
                    (header::ETAG, etag),
                    (
                        header::CACHE_CONTROL,
                        format!(
                            "public, max-age={}",
                            state.tunables.cache_duration.as_secs()
                        ),
                    ),
                ],
                body,
            )
                .into_response()
        }
        Err(err @ ReadError::Unavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponseBody {
                error: format!("{}", err),
            },
        )
            .into_response(),
        Err(err) => {
            error!("While serving /best-stories: {err}");
            (
                StatusCode::BAD_GATEWAY,
                ErrorResponseBody {
                    error: format!("{}", err),
                },
            )
                .into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       service plumbing                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Frontpage>>) -> String {
    let mut output = Vec::new();
    if let Err(err) = state.exporter.export(&mut output) {
        error!("Failed to encode Prometheus metrics: {err}");
    }
    String::from_utf8_lossy(&output).into_owned()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Assemble the frontpage router
pub fn make_router(state: Arc<Frontpage>) -> Router {
    let protected = Router::new()
        .route("/best-stories", get(best_stories))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            users::authenticate,
        ));
    Router::new()
        .merge(protected)
        .merge(users::make_router())
        .route("/healthz", get(healthcheck))
        .route("/metrics", get(metrics))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
