use axum::{
    extract::{State as AxumState, WebSocketUpgrade},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dicearena_execution::{Backend, Effects, Engine, EngineConfig, IntentJournal};
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

mod config;
pub use config::{Config, ConfigError, SessionConfig, ValidatedConfig};
pub mod history;
pub use history::BroadcastHistory;
pub mod registry;
pub use registry::Registry;
mod session;

/// Shared state of every connection: the match engine and the connection registry.
pub struct Server<B> {
    engine: Engine<BroadcastHistory<B>>,
    registry: Registry,
    session: SessionConfig,
}

impl<B: Backend> Server<B> {
    pub fn new(
        backend: B,
        journal: Arc<dyn IntentJournal>,
        engine: EngineConfig,
        session: SessionConfig,
    ) -> Self {
        Self::from_engine(
            Engine::new(Arc::new(BroadcastHistory::new(backend)), journal, engine),
            session,
        )
    }

    /// Wrap an already configured engine (for example one with scripted dice).
    pub fn from_engine(engine: Engine<BroadcastHistory<B>>, session: SessionConfig) -> Self {
        Self {
            engine,
            registry: Registry::new(),
            session,
        }
    }

    pub fn engine(&self) -> &Engine<BroadcastHistory<B>> {
        &self.engine
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session
    }

    /// Queue an operation's frames and, if the open lobbies changed, the new listing for everyone.
    pub fn deliver(&self, effects: Effects) {
        for (conn, frame) in &effects.messages {
            self.registry.send(*conn, frame);
        }
        if effects.lobbies_changed {
            self.registry.broadcast(&self.engine.lobby_list());
        }
    }
}

/// Per-IP limit on HTTP requests, WebSocket upgrades included.
#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            per_second: 50,
            burst: 200,
        }
    }
}

pub struct Api<B> {
    server: Arc<Server<B>>,
    rate_limit: RateLimit,
}

impl<B: Backend> Api<B> {
    pub fn new(server: Arc<Server<B>>, rate_limit: RateLimit) -> Self {
        Self { server, rate_limit }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        let router = Router::new()
            .route("/ws/dice", get(dice_ws::<B>))
            .route("/ws/history", get(history_ws::<B>))
            .route("/health", get(health::<B>))
            .layer(cors);

        // The builder takes the replenish period of one request, not a rate.
        let period = (1_000_000_000 / self.rate_limit.per_second.max(1)).max(1);
        let governor = GovernorConfigBuilder::default()
            .per_nanosecond(period)
            .burst_size(self.rate_limit.burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        let router = match governor {
            Some(config) => router.layer(GovernorLayer {
                config: Arc::new(config),
            }),
            None => {
                warn!(
                    per_second = self.rate_limit.per_second,
                    burst = self.rate_limit.burst,
                    "invalid rate limit, serving without one"
                );
                router
            }
        };
        router.with_state(self.server.clone())
    }
}

async fn dice_ws<B: Backend>(
    AxumState(server): AxumState<Arc<Server<B>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, server))
}

async fn history_ws<B: Backend>(
    AxumState(server): AxumState<Arc<Server<B>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let records = server.engine().backend().subscribe();
    ws.on_upgrade(move |socket| history::stream(socket, records))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
    open_lobbies: usize,
}

async fn health<B: Backend>(AxumState(server): AxumState<Arc<Server<B>>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        connections: server.registry().len(),
        open_lobbies: server.engine().open_lobbies().len(),
    })
}
