use std::sync::Arc;

use crate::config::Config;
use crate::crypto::random::CryptoRandom;
use crate::error::Result;
use crate::session::provider::{ProductionProvider, SessionProvider};
use crate::store::{MemoryStore, RedisStore, SessionStore};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The session provider.
    pub sessions: Arc<dyn SessionProvider>,
    /// The application's configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// Sessions go to Redis when `REDIS_URL` is configured, and stay in
    /// process memory otherwise.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn SessionStore> = match &config.redis_url {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                tracing::info!("✅ Redis session store initialized");
                Arc::new(store)
            }
            None => {
                tracing::warn!("REDIS_URL not set, sessions will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let provider = ProductionProvider::new(&config.provider(), Arc::new(CryptoRandom), store)?;
        tracing::info!("✅ Session provider initialized");

        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    /// Creates an `AppState` around an existing provider.
    pub fn with_provider(config: &Config, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            sessions,
            config: Arc::new(config.clone()),
        }
    }
}
