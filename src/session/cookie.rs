use chrono::Duration;
use tower_cookies::cookie::time::{Duration as CookieDuration, OffsetDateTime};
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

use crate::crypto::random::CHARSET_ALPHANUMERIC;
use crate::error::{Result, SessionError};

/// Length of a minted session ID.
pub const SESSION_ID_LENGTH: usize = 32;

/// Alphabet session IDs are drawn from.
pub const SESSION_ID_CHARSET: &[u8] = CHARSET_ALPHANUMERIC;

/// Parses a configured same-site policy.
///
/// Matching is case-insensitive. Anything other than `strict`, `lax` or
/// `none` yields `Lax`.
pub fn parse_same_site(value: &str) -> SameSite {
    match value.trim().to_ascii_lowercase().as_str() {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        "lax" => SameSite::Lax,
        other => {
            tracing::warn!("Unknown same-site policy '{}', using Lax", other);
            SameSite::Lax
        }
    }
}

/// How long the user agent should keep a session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieExpiry {
    /// Dropped when the user agent closes.
    Browser,
    /// Kept indefinitely. Rendered without a finite `Expires` date.
    Unlimited,
    /// Expires at a fixed instant.
    At(OffsetDateTime),
}

impl CookieExpiry {
    /// Maps a signed expiration onto cookie semantics: negative is a
    /// browser-session cookie, zero is unlimited, positive expires at
    /// `now + expiration`.
    ///
    /// Fails with a configuration error when the expiry instant is out of
    /// range.
    pub fn from_expiration(expiration: Duration, now: OffsetDateTime) -> Result<Self> {
        if expiration < Duration::zero() {
            Ok(CookieExpiry::Browser)
        } else if expiration.is_zero() {
            Ok(CookieExpiry::Unlimited)
        } else {
            now.checked_add(CookieDuration::milliseconds(expiration.num_milliseconds()))
                .map(CookieExpiry::At)
                .ok_or_else(|| SessionError::Config(format!("cookie expiration {} is out of range", expiration)))
        }
    }
}

/// The immutable attributes shared by every session cookie.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    /// The cookie name.
    pub name: String,
    /// The cookie domain.
    pub domain: String,
    /// The resolved same-site policy.
    pub same_site: SameSite,
}

impl CookiePolicy {
    /// Builds the session cookie carrying the raw session ID.
    pub fn session_cookie(&self, id: String, expiry: CookieExpiry) -> Cookie<'static> {
        let mut cookie = self.base(id);

        if let CookieExpiry::At(at) = expiry {
            cookie.set_expires(at);
        }

        cookie
    }

    /// Builds an empty cookie dated in the past, forcing user-agent eviction.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.base(String::new());
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie.set_max_age(CookieDuration::ZERO);
        cookie
    }

    fn base(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .domain(self.domain.clone())
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(self.same_site)
            .build()
    }

    /// Reads the session ID from the request.
    ///
    /// Absent, empty and malformed values all read as `None`.
    pub fn read(&self, cookies: &Cookies) -> Option<String> {
        let cookie = cookies.get(&self.name)?;
        let value = cookie.value();

        if value.is_empty() {
            return None;
        }

        if value.len() != SESSION_ID_LENGTH || !value.bytes().all(|b| SESSION_ID_CHARSET.contains(&b)) {
            tracing::debug!("Ignoring malformed session cookie ({} bytes)", value.len());
            return None;
        }

        Some(value.to_string())
    }

    /// Writes or refreshes the session cookie on the response.
    pub fn write(&self, cookies: &Cookies, id: String, expiry: CookieExpiry) {
        cookies.add(self.session_cookie(id, expiry));
    }

    /// Drops the cookie from the request view and sends an explicit
    /// expired replacement.
    pub fn delete(&self, cookies: &Cookies) {
        cookies.remove(self.base(String::new()));
        cookies.add(self.removal_cookie());
    }
}
