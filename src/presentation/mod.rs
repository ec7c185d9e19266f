// Presentation layer - HTTP routes
pub mod app_state;
pub mod handlers;

use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_plot, goto_now, health_check, scroll_left, scroll_right, set_range, stream_plot, zoom_in,
    zoom_out,
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/plots/:resource", get(get_plot))
        .route("/plots/:resource/stream", get(stream_plot))
        .route("/window/range", post(set_range))
        .route("/window/zoom-in", post(zoom_in))
        .route("/window/zoom-out", post(zoom_out))
        .route("/window/scroll-left", post(scroll_left))
        .route("/window/scroll-right", post(scroll_right))
        .route("/window/now", post(goto_now))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
