// HTTP request handlers
use crate::application::dashboard_service::{Resource, WindowView};
use crate::application::plot_controller::PlotEvent;
use crate::infrastructure::chunked_json::chunked_json_stream;
use crate::infrastructure::http_response::json_response;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub seconds: f64,
}

#[derive(Debug, Deserialize)]
pub struct ZoomInQuery {
    pub range: f64,
    pub stop: Option<f64>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("br"))
        .unwrap_or(false)
}

fn parse_resource(name: &str) -> Result<Resource, StatusCode> {
    name.parse().map_err(|_| StatusCode::NOT_FOUND)
}

/// Current snapshot of one plot
pub async fn get_plot(
    Path(resource): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let snapshot = parse_resource(&resource)
        .and_then(|resource| state.dashboard.snapshot(resource).ok_or(StatusCode::NOT_FOUND));

    match snapshot {
        Ok(snapshot) => match json_response(&snapshot, accepts_brotli(&headers)).await {
            Ok(response) => response,
            Err(status) => status.into_response(),
        },
        Err(status) => status.into_response(),
    }
}

/// Streams a fresh snapshot of one plot after every change, starting with
/// the current one.
pub async fn stream_plot(
    Path(resource): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let resource = match parse_resource(&resource) {
        Ok(resource) => resource,
        Err(status) => return status.into_response(),
    };
    let Some(events) = state.dashboard.subscribe(resource) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let dashboard = state.dashboard.clone();
    let snapshots = async_stream::stream! {
        if let Some(snapshot) = dashboard.snapshot(resource) {
            yield snapshot;
        }

        let mut events = BroadcastStream::new(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(PlotEvent::Hover { .. }) => continue,
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::debug!("Plot stream for {} skipped {} events", resource.name(), skipped);
                }
            }
            if let Some(snapshot) = dashboard.snapshot(resource) {
                yield snapshot;
            }
        }
    };

    match chunked_json_stream(snapshots, accepts_brotli(&headers)) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

fn valid_range(seconds: f64) -> Result<f64, StatusCode> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(StatusCode::BAD_REQUEST)
    }
}

pub async fn set_range(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<WindowView>, StatusCode> {
    let seconds = valid_range(query.seconds)?;
    Ok(Json(state.dashboard.set_range(seconds)))
}

pub async fn zoom_in(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ZoomInQuery>,
) -> Result<Json<WindowView>, StatusCode> {
    let range = valid_range(query.range)?;
    if query.stop.is_some_and(|stop| !stop.is_finite()) {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(state.dashboard.zoom_in(range, query.stop)))
}

pub async fn zoom_out(State(state): State<Arc<AppState>>) -> Json<WindowView> {
    Json(state.dashboard.zoom_out())
}

pub async fn scroll_left(State(state): State<Arc<AppState>>) -> Json<WindowView> {
    Json(state.dashboard.scroll_left())
}

pub async fn scroll_right(State(state): State<Arc<AppState>>) -> Json<WindowView> {
    Json(state.dashboard.scroll_right())
}

pub async fn goto_now(State(state): State<Arc<AppState>>) -> Json<WindowView> {
    Json(state.dashboard.goto_now())
}
