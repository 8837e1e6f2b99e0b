use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tower_cookies::cookie::time::OffsetDateTime;
use tower_cookies::Cookies;
use zeroize::Zeroizing;

use crate::crypto::random::RandomSource;
use crate::error::{Result, SessionError};
use crate::models::session::{Session, SessionKeys};
use crate::session::codec::SessionCodec;
use crate::session::cookie::{parse_same_site, CookieExpiry, CookiePolicy, SESSION_ID_CHARSET, SESSION_ID_LENGTH};
use crate::session::gc::GarbageCollector;
use crate::store::{SessionRecord, SessionStore};

/// Settings for a [`ProductionProvider`].
#[derive(Clone)]
pub struct ProviderConfig {
    /// The session cookie name.
    pub cookie_name: String,
    /// The session cookie domain.
    pub domain: String,
    /// `strict`, `lax` or `none`; anything else means `lax`.
    pub same_site: String,
    /// Inactivity window. Default lifetime for [`SessionProvider::save`]
    /// and the storage lifetime of browser-session cookies.
    pub expiration: Duration,
    /// Storage lifetime of sessions saved with an unlimited cookie.
    pub remember_me: Duration,
    /// Encryption key material, any length.
    pub encryption_key: Zeroizing<Vec<u8>>,
    /// Key for the private ID hash.
    pub secret: Zeroizing<Vec<u8>>,
}

/// Everything request handlers can do with sessions.
///
/// Expirations are signed: negative issues a cookie that dies with the
/// user agent, zero issues an unlimited cookie, positive issues a cookie
/// expiring after that long.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The raw session ID carried by the request, if any.
    fn session_id(&self, cookies: &Cookies) -> Option<String>;

    /// The storage key for a raw session ID.
    fn private_id(&self, id: &str) -> String;

    /// Loads the session attached to the request.
    ///
    /// A missing, unknown, tampered or undecodable session reads as `None`.
    async fn load(&self, cookies: &Cookies) -> Result<Option<Session>>;

    /// Saves with the configured expiration.
    async fn save(&self, cookies: &Cookies, session: &mut Session) -> Result<()>;

    /// Encrypts and persists `session`, then writes the cookie.
    async fn save_with_expiration(
        &self,
        cookies: &Cookies,
        session: &mut Session,
        expiration: Duration,
    ) -> Result<()>;

    /// Moves `session` to a fresh session ID, keeping its internal ID.
    async fn regenerate(&self, cookies: &Cookies, session: &mut Session, expiration: Duration) -> Result<()>;

    /// Destroys the stored session and deletes the cookie.
    async fn destroy(&self, cookies: &Cookies, session: &Session) -> Result<()>;

    /// Deletes the session cookie without touching the store.
    fn delete_cookie(&self, cookies: &Cookies);

    async fn session_by_public_id(&self, public_id: &str) -> Result<Option<Session>>;

    async fn session_by_internal_id(&self, internal_id: &str) -> Result<Option<Session>>;

    async fn sessions_by_username(&self, username: &str) -> Result<Vec<SessionKeys>>;

    /// Destroys a stored session found through enumeration.
    async fn destroy_keys(&self, keys: &SessionKeys) -> Result<()>;

    async fn count_sessions(&self) -> Result<usize>;

    /// Starts background collection if the store needs it.
    fn start(&self) -> bool;

    /// Stops background collection.
    async fn shutdown(&self);
}

/// The session provider used by the portal.
pub struct ProductionProvider {
    cookies: CookiePolicy,
    expiration: Duration,
    remember_me: Duration,
    codec: SessionCodec,
    random: Arc<dyn RandomSource>,
    store: Arc<dyn SessionStore>,
    gc: GarbageCollector,
}

impl ProductionProvider {
    /// Creates a new `ProductionProvider`.
    ///
    /// Background collection is not started; call
    /// [`SessionProvider::start`] once the runtime is up.
    ///
    /// # Arguments
    ///
    /// * `config` - Cookie attributes, lifetimes and secrets.
    /// * `random` - Source for session IDs and nonces. Must be a CSPRNG.
    /// * `store` - Where sealed sessions live.
    ///
    /// # Returns
    ///
    /// A `Result` containing the provider, or a configuration error.
    pub fn new(
        config: &ProviderConfig,
        random: Arc<dyn RandomSource>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        if config.cookie_name.is_empty() {
            return Err(SessionError::Config("cookie name must not be empty".to_string()));
        }
        if config.domain.is_empty() {
            return Err(SessionError::Config("cookie domain must not be empty".to_string()));
        }
        if config.expiration <= Duration::zero() || config.remember_me <= Duration::zero() {
            return Err(SessionError::Config(
                "expiration and remember-me durations must be positive".to_string(),
            ));
        }
        let now = Utc::now();
        if now.checked_add_signed(config.expiration).is_none() || now.checked_add_signed(config.remember_me).is_none() {
            return Err(SessionError::Config(
                "expiration and remember-me durations are out of range".to_string(),
            ));
        }

        let codec = SessionCodec::new(random.clone(), &config.encryption_key, &config.secret)?;

        Ok(Self {
            cookies: CookiePolicy {
                name: config.cookie_name.clone(),
                domain: config.domain.clone(),
                same_site: parse_same_site(&config.same_site),
            },
            expiration: config.expiration,
            remember_me: config.remember_me,
            codec,
            random,
            gc: GarbageCollector::new(store.clone()),
            store,
        })
    }

    /// Replaces the collector with one sweeping at `interval`.
    pub fn with_gc_interval(mut self, interval: std::time::Duration) -> Self {
        self.gc = GarbageCollector::with_interval(self.store.clone(), interval);
        self
    }

    /// The cookie attributes this provider issues.
    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookies
    }

    fn mint_id(&self) -> Result<String> {
        Ok(self.random.string_custom(SESSION_ID_LENGTH, SESSION_ID_CHARSET)?)
    }

    fn storage_expiry(&self, expiration: Duration, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let lifetime = if expiration > Duration::zero() {
            expiration
        } else if expiration.is_zero() {
            self.remember_me
        } else {
            self.expiration
        };

        now.checked_add_signed(lifetime)
            .ok_or_else(|| SessionError::Config(format!("session expiration {} is out of range", lifetime)))
    }

    fn record(&self, private_id: String, data: Vec<u8>, session: &Session, expires_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            private_id,
            data,
            public_id: session.public_id.clone(),
            internal_id: session.internal_id.clone(),
            username: session.username.clone(),
            expires_at,
        }
    }

    /// Decodes a sealed session. Crypto and serialization failures are
    /// indistinguishable from "no session" to the caller.
    fn open(&self, sealed: &[u8]) -> Option<Session> {
        match self.codec.decode::<Session>(sealed) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!("Stored session rejected: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl SessionProvider for ProductionProvider {
    fn session_id(&self, cookies: &Cookies) -> Option<String> {
        self.cookies.read(cookies)
    }

    fn private_id(&self, id: &str) -> String {
        self.codec.encode_session_id(id.as_bytes())
    }

    async fn load(&self, cookies: &Cookies) -> Result<Option<Session>> {
        let Some(id) = self.cookies.read(cookies) else {
            return Ok(None);
        };

        let private_id = self.codec.encode_session_id(id.as_bytes());
        let Some(sealed) = self.store.get_session_by_private_id(&private_id).await? else {
            tracing::debug!("No stored session for {}…", &private_id[..8]);
            return Ok(None);
        };

        Ok(self.open(&sealed).map(|mut session| {
            session.id = id;
            session
        }))
    }

    async fn save(&self, cookies: &Cookies, session: &mut Session) -> Result<()> {
        self.save_with_expiration(cookies, session, self.expiration).await
    }

    async fn save_with_expiration(
        &self,
        cookies: &Cookies,
        session: &mut Session,
        expiration: Duration,
    ) -> Result<()> {
        let id = match self.cookies.read(cookies) {
            Some(id) => id,
            None => self.mint_id()?,
        };

        let expires_at = self.storage_expiry(expiration, Utc::now())?;
        let expiry = CookieExpiry::from_expiration(expiration, OffsetDateTime::now_utc())?;
        let (private_id, data) = self.codec.encode(id.as_bytes(), &*session)?;

        self.store
            .save_session(self.record(private_id, data, session, expires_at))
            .await?;

        self.cookies.write(cookies, id.clone(), expiry);
        session.id = id;

        Ok(())
    }

    async fn regenerate(&self, cookies: &Cookies, session: &mut Session, expiration: Duration) -> Result<()> {
        let Some(old_id) = self.cookies.read(cookies) else {
            return self.save_with_expiration(cookies, session, expiration).await;
        };

        let expires_at = self.storage_expiry(expiration, Utc::now())?;
        let expiry = CookieExpiry::from_expiration(expiration, OffsetDateTime::now_utc())?;

        let new_id = self.mint_id()?;
        let old_private_id = self.codec.encode_session_id(old_id.as_bytes());
        let (new_private_id, data) = self.codec.encode(new_id.as_bytes(), &*session)?;

        self.store
            .regenerate_session(
                &old_private_id,
                &new_private_id,
                &session.public_id,
                &session.internal_id,
                expires_at,
            )
            .await?;
        self.store
            .save_session(self.record(new_private_id, data, session, expires_at))
            .await?;

        self.cookies.write(cookies, new_id.clone(), expiry);
        session.id = new_id;

        tracing::debug!("Session {} regenerated", session.public_id);
        Ok(())
    }

    async fn destroy(&self, cookies: &Cookies, session: &Session) -> Result<()> {
        let id = if session.id.is_empty() {
            self.cookies.read(cookies)
        } else {
            Some(session.id.clone())
        };
        let private_id = id
            .map(|id| self.codec.encode_session_id(id.as_bytes()))
            .unwrap_or_default();

        self.store
            .destroy_session(&private_id, &session.public_id, &session.internal_id)
            .await?;
        self.cookies.delete(cookies);

        tracing::debug!("Session {} destroyed", session.public_id);
        Ok(())
    }

    fn delete_cookie(&self, cookies: &Cookies) {
        self.cookies.delete(cookies);
    }

    async fn session_by_public_id(&self, public_id: &str) -> Result<Option<Session>> {
        let sealed = self.store.get_session_by_public_id(public_id).await?;
        Ok(sealed.and_then(|sealed| self.open(&sealed)))
    }

    async fn session_by_internal_id(&self, internal_id: &str) -> Result<Option<Session>> {
        let sealed = self.store.get_session_by_internal_id(internal_id).await?;
        Ok(sealed.and_then(|sealed| self.open(&sealed)))
    }

    async fn sessions_by_username(&self, username: &str) -> Result<Vec<SessionKeys>> {
        Ok(self.store.get_session_ids_by_username(username).await?)
    }

    async fn destroy_keys(&self, keys: &SessionKeys) -> Result<()> {
        self.store
            .destroy_session(&keys.private_id, &keys.public_id, &keys.internal_id)
            .await?;
        Ok(())
    }

    async fn count_sessions(&self) -> Result<usize> {
        Ok(self.store.count_sessions().await?)
    }

    fn start(&self) -> bool {
        self.gc.start()
    }

    async fn shutdown(&self) {
        self.gc.stop().await;
    }
}
