//! Snapshot API
//!
//! Read-side HTTP surface for the globe frontend: current arcs and
//! markers, aggregate stats and the category visibility toggles.

use crate::logic::pipeline::{LastSource, SharedStats, SharedStore};
use crate::logic::store::{Marker, RenderableArc};
use crate::logic::stream::{SharedStreamStatus, StreamStatus};
use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub stats: SharedStats,
    pub stream_status: SharedStreamStatus,
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/globe/arcs", get(arcs))
        .route("/api/v1/globe/markers", get(markers))
        .route("/api/v1/globe/stats", get(stats))
        .route("/api/v1/globe/toggles", put(set_toggles))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().timestamp(),
    })
}

/// Visible arcs, filtered by the category toggles.
async fn arcs(State(state): State<AppState>) -> Json<Vec<RenderableArc>> {
    Json(state.store.read().visible_arcs())
}

/// Live markers; expired ones are aged out on read.
async fn markers(State(state): State<AppState>) -> Json<Vec<Marker>> {
    let mut store = state.store.write();
    store.decay_markers(Utc::now());
    Json(store.markers())
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_alerts: u64,
    country_counts: HashMap<String, u64>,
    last_source: Option<LastSource>,
    stream_status: StreamStatus,
    arc_count: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.stats.read();
    Json(StatsResponse {
        total_alerts: stats.total_alerts,
        country_counts: stats.country_counts.clone(),
        last_source: stats.last_source.clone(),
        stream_status: *state.stream_status.read(),
        arc_count: state.store.read().arc_count(),
    })
}

#[derive(Debug, Deserialize)]
struct TogglesRequest {
    show_attack: Option<bool>,
    show_normal: Option<bool>,
}

#[derive(Debug, Serialize)]
struct TogglesResponse {
    show_attack: bool,
    show_normal: bool,
}

/// Set the read-side visibility toggles. Never mutates the stored set.
async fn set_toggles(
    State(state): State<AppState>,
    Json(request): Json<TogglesRequest>,
) -> Json<TogglesResponse> {
    let mut store = state.store.write();
    store.set_toggles(request.show_attack, request.show_normal);
    let (show_attack, show_normal) = store.toggles();
    Json(TogglesResponse {
        show_attack,
        show_normal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::alert::Category;
    use crate::logic::pipeline::DashboardStats;
    use crate::logic::store::RetentionStore;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(RwLock::new(RetentionStore::new())),
            stats: Arc::new(RwLock::new(DashboardStats::default())),
            stream_status: Arc::new(RwLock::new(StreamStatus::Disconnected)),
        }
    }

    async fn serve(state: AppState) -> String {
        let app = create_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let base = serve(test_state()).await;
        let body: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_arcs_respect_toggles() {
        let state = test_state();
        {
            let mut store = state.store.write();
            store.add_arc(RenderableArc {
                start_lat: 1.0,
                start_lng: 1.0,
                end_lat: 0.0,
                end_lng: 0.0,
                color: Category::Attack.color().to_string(),
                weight: 1.0,
                category: Category::Attack,
            });
            store.add_arc(RenderableArc {
                start_lat: 2.0,
                start_lng: 2.0,
                end_lat: 0.0,
                end_lng: 0.0,
                color: Category::Normal.color().to_string(),
                weight: 1.0,
                category: Category::Normal,
            });
        }
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let arcs: Vec<serde_json::Value> = client
            .get(format!("{}/api/v1/globe/arcs", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(arcs.len(), 2);
        // Wire format matches what the globe renderer expects.
        assert!(arcs[0].get("startLat").is_some());

        let toggles: serde_json::Value = client
            .put(format!("{}/api/v1/globe/toggles", base))
            .json(&serde_json::json!({"show_normal": false}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(toggles["show_normal"], false);
        assert_eq!(toggles["show_attack"], true);

        let arcs: Vec<serde_json::Value> = client
            .get(format!("{}/api/v1/globe/arcs", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(arcs.len(), 1);
        assert_eq!(arcs[0]["category"], "attack");
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let state = test_state();
        state.stats.write().total_alerts = 7;
        *state.stream_status.write() = StreamStatus::Connected;

        let base = serve(state).await;
        let body: serde_json::Value = reqwest::get(format!("{}/api/v1/globe/stats", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["total_alerts"], 7);
        assert_eq!(body["stream_status"], "connected");
    }
}
