// HTTP gateway: thin reads over the snapshot store and vessel registry.
//
// /bridges, /bridges/{id}, /boats, /health plus a one-line status page.
// Data responses carry short Cache-Control max-ages; every endpoint is
// rate-limited per source IP.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, Duration};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::rate_limit::client_ip;
use super::ws;
use crate::state::AppState;

/// Bridge-activity warning thresholds, hours. The seaway is quiet in winter,
/// so the off-season grace is a week.
const ACTIVITY_THRESHOLD_SEASON_HOURS: i64 = 24;
const ACTIVITY_THRESHOLD_OFFSEASON_HOURS: i64 = 168;

/// Consecutive region failures before the seaway indicator degrades.
const SEAWAY_DEGRADED_AFTER_FAILURES: u32 = 3;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let data_routes = Router::new()
        .route("/bridges", get(get_bridges))
        .route("/bridges/{id}", get(get_bridge))
        .route("/boats", get(get_boats))
        .route("/health", get(get_health))
        .layer(middleware::from_fn_with_state(state.clone(), data_rate_limit));

    let static_routes = Router::new()
        .route("/", get(index))
        .layer(middleware::from_fn_with_state(state.clone(), static_rate_limit));

    Router::new()
        .merge(data_routes)
        .merge(static_routes)
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn data_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    rate_limited(&state.data_limiter, peer, request, next).await
}

async fn static_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    rate_limited(&state.static_limiter, peer, request, next).await
}

async fn rate_limited(
    limiter: &crate::net::rate_limit::RateLimiter,
    peer: SocketAddr,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer.ip());
    match limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(json!({"detail": "Rate limit exceeded"})),
        )
            .into_response(),
    }
}

fn cache_headers(state: &AppState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = format!("public, max-age={}", state.cache_max_age).parse() {
        headers.insert(header::CACHE_CONTROL, value);
    }
    headers
}

/// `GET /bridges` — the full snapshot, identical to the WebSocket payload.
async fn get_bridges(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot.current().await;
    (cache_headers(&state), Json((*snapshot).clone()))
}

/// `GET /bridges/{id}` — one bridge or 404.
async fn get_bridge(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let snapshot = state.snapshot.current().await;
    match snapshot.bridges.get(&id) {
        Some(record) => (cache_headers(&state), Json(record.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Bridge not found"})),
        )
            .into_response(),
    }
}

/// `GET /boats` — the current vessels payload.
async fn get_boats(State(state): State<AppState>) -> impl IntoResponse {
    let payload = state.registry.boats_payload().await;
    (cache_headers(&state), Json(payload))
}

/// `GET /health` — liveness plus freshness indicators.
async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.clock.now();
    let snapshot = state.snapshot.current().await;

    let failures = state.scraper.max_region_failures().await;
    let (seaway_status, seaway_message) = if failures >= SEAWAY_DEGRADED_AFTER_FAILURES {
        (
            "degraded",
            format!("upstream failing, worst region at {failures} consecutive failures"),
        )
    } else {
        ("ok", "upstream feeds reachable".to_string())
    };

    let threshold_hours = if in_navigation_season(now.month(), now.day()) {
        ACTIVITY_THRESHOLD_SEASON_HOURS
    } else {
        ACTIVITY_THRESHOLD_OFFSEASON_HOURS
    };
    let last_change = state.scraper.last_observable_change().await;
    let (bridge_activity, bridge_activity_message) = match last_change {
        Some(changed_at)
            if now.fixed_offset() - changed_at > Duration::hours(threshold_hours) =>
        {
            (
                "warning",
                format!("no bridge changes in over {threshold_hours}h"),
            )
        }
        Some(_) => ("ok", "bridges changing normally".to_string()),
        None => ("unknown", "no changes observed since startup".to_string()),
    };

    let status = if seaway_status == "ok" { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "status_message": "running",
        "seaway_status": seaway_status,
        "seaway_message": seaway_message,
        "bridge_activity": bridge_activity,
        "bridge_activity_message": bridge_activity_message,
        "last_updated": snapshot.last_updated,
        "last_scrape": state.scraper.last_scrape().await,
        "last_scrape_had_changes": state.scraper.last_scrape_had_changes(),
        "statistics_last_updated": state.scraper.statistics_last_updated().await,
        "bridges_count": snapshot.bridges.len(),
        "websocket_clients": state.ws_client_count(),
    }))
}

/// `GET /` — minimal status page.
async fn index(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot.current().await;
    format!(
        "Seaway bridge server: {} bridges, {} websocket clients\n",
        snapshot.bridges.len(),
        state.ws_client_count()
    )
}

/// The navigation season runs from mid-March through November.
pub fn in_navigation_season(month: u32, day: u32) -> bool {
    match month {
        4..=11 => true,
        3 => day >= 15,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_season_boundaries() {
        assert!(!in_navigation_season(1, 10));
        assert!(!in_navigation_season(3, 14));
        assert!(in_navigation_season(3, 15));
        assert!(in_navigation_season(7, 1));
        assert!(in_navigation_season(11, 30));
        assert!(!in_navigation_season(12, 1));
    }
}
