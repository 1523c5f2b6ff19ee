use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::data::CandleStore;
use crate::session::Session;
use crate::ws::broadcast::Broadcaster;

/// Shared application state, passed to all route handlers via
/// `axum::extract::State`.
///
/// The candle store is read-only after startup and shared without locking.
/// The session mutex is the transition mutex: every state-changing
/// operation serializes behind it in arrival order.
pub struct AppState {
    pub config: ServerConfig,
    pub candles: CandleStore,
    pub broadcast: Broadcaster,
    pub session: Mutex<Session>,
}

impl AppState {
    pub fn new(config: ServerConfig, candles: CandleStore) -> Arc<Self> {
        let session = Session::new(&config, &candles);
        Arc::new(Self {
            config,
            candles,
            broadcast: Broadcaster::new(),
            session: Mutex::new(session),
        })
    }
}
