use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::session::provider::ProviderConfig;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The name of the session cookie.
    pub cookie_name: String,
    /// The domain the session cookie is scoped to.
    pub domain: String,
    /// The raw `SameSite` policy.
    pub same_site: String,
    /// The inactivity window in seconds.
    pub expiration_secs: i64,
    /// How long "remember me" sessions are kept, in seconds.
    pub remember_me_secs: i64,
    /// Session encryption key material.
    pub encryption_key: Zeroizing<Vec<u8>>,
    /// Key for the session ID hash.
    pub secret: Zeroizing<Vec<u8>>,
    /// The URL of the Redis server. Sessions stay in memory without it.
    pub redis_url: Option<String>,
    /// The address the server listens on.
    pub listen_addr: SocketAddr,
}

fn secret_var(name: &str) -> Result<Zeroizing<Vec<u8>>> {
    let value = Zeroizing::new(env::var(name).with_context(|| format!("{} must be set", name))?);
    if value.is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    Ok(Zeroizing::new(value.as_bytes().to_vec()))
}

fn seconds_var(name: &str, default: i64) -> Result<i64> {
    let secs: i64 = env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))?;
    if secs <= 0 {
        anyhow::bail!("{} must be positive", name);
    }
    let span = chrono::Duration::try_seconds(secs).with_context(|| format!("{} is out of range", name))?;
    if chrono::Utc::now().checked_add_signed(span).is_none() {
        anyhow::bail!("{} is out of range", name);
    }
    Ok(secs)
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cookie_name: env::var("SESSION_COOKIE_NAME").unwrap_or_else(|_| "warden_session".to_string()),
            domain: env::var("SESSION_DOMAIN").context("SESSION_DOMAIN must be set")?,
            same_site: env::var("SESSION_SAME_SITE").unwrap_or_else(|_| "lax".to_string()),
            expiration_secs: seconds_var("SESSION_EXPIRATION_SECS", 3600)?,
            remember_me_secs: seconds_var("SESSION_REMEMBER_ME_SECS", 2_592_000)?,
            encryption_key: secret_var("SESSION_ENCRYPTION_KEY")?,
            secret: secret_var("SESSION_SECRET")?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            listen_addr: env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid LISTEN_ADDR")?,
        })
    }

    /// The session provider settings carried by this configuration.
    ///
    /// Out-of-range lifetimes map to zero, which the provider rejects.
    pub fn provider(&self) -> ProviderConfig {
        let seconds = |secs| chrono::Duration::try_seconds(secs).unwrap_or_else(chrono::Duration::zero);
        ProviderConfig {
            cookie_name: self.cookie_name.clone(),
            domain: self.domain.clone(),
            same_site: self.same_site.clone(),
            expiration: seconds(self.expiration_secs),
            remember_me: seconds(self.remember_me_secs),
            encryption_key: self.encryption_key.clone(),
            secret: self.secret.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [(&str, Option<&str>); 3] = [
        ("SESSION_DOMAIN", Some("example.com")),
        ("SESSION_ENCRYPTION_KEY", Some("a very secret key")),
        ("SESSION_SECRET", Some("another secret")),
    ];

    const OPTIONAL: [&str; 6] = [
        "SESSION_COOKIE_NAME",
        "SESSION_SAME_SITE",
        "SESSION_EXPIRATION_SECS",
        "SESSION_REMEMBER_ME_SECS",
        "REDIS_URL",
        "LISTEN_ADDR",
    ];

    fn with_env<F: FnOnce()>(overrides: &[(&str, Option<&str>)], f: F) {
        let mut vars: Vec<(&str, Option<&str>)> = REQUIRED.to_vec();
        vars.extend(OPTIONAL.iter().map(|name| (*name, None)));
        for (name, value) in overrides {
            vars.retain(|(existing, _)| existing != name);
            vars.push((*name, *value));
        }
        temp_env::with_vars(vars, f);
    }

    #[test]
    fn test_defaults() {
        with_env(&[], || {
            let config = Config::from_env().unwrap();

            assert_eq!(config.cookie_name, "warden_session");
            assert_eq!(config.domain, "example.com");
            assert_eq!(config.same_site, "lax");
            assert_eq!(config.expiration_secs, 3600);
            assert_eq!(config.remember_me_secs, 2_592_000);
            assert_eq!(config.encryption_key.as_slice(), b"a very secret key");
            assert_eq!(config.redis_url, None);
            assert_eq!(config.listen_addr, "127.0.0.1:3000".parse().unwrap());

            let provider = config.provider();
            assert_eq!(provider.expiration, chrono::Duration::hours(1));
            assert_eq!(provider.remember_me, chrono::Duration::days(30));
        });
    }

    #[test]
    fn test_overrides() {
        with_env(
            &[
                ("SESSION_COOKIE_NAME", Some("portal")),
                ("SESSION_SAME_SITE", Some("Strict")),
                ("SESSION_EXPIRATION_SECS", Some("60")),
                ("REDIS_URL", Some("redis://127.0.0.1:6380/")),
                ("LISTEN_ADDR", Some("0.0.0.0:8080")),
            ],
            || {
                let config = Config::from_env().unwrap();

                assert_eq!(config.cookie_name, "portal");
                assert_eq!(config.same_site, "Strict");
                assert_eq!(config.expiration_secs, 60);
                assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6380/"));
                assert_eq!(config.listen_addr.port(), 8080);
            },
        );
    }

    #[test]
    fn test_missing_or_empty_secrets_are_rejected() {
        for name in ["SESSION_DOMAIN", "SESSION_ENCRYPTION_KEY", "SESSION_SECRET"] {
            with_env(&[(name, None)], || {
                let err = Config::from_env().err().unwrap();
                assert!(err.to_string().contains(name));
            });
        }

        with_env(&[("SESSION_SECRET", Some(""))], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn test_invalid_durations_are_rejected() {
        for value in ["abc", "0", "-5"] {
            with_env(&[("SESSION_EXPIRATION_SECS", Some(value))], || {
                assert!(Config::from_env().is_err());
            });
        }
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        for value in ["9223372036854775807", "100000000000000"] {
            with_env(&[("SESSION_REMEMBER_ME_SECS", Some(value))], || {
                let err = Config::from_env().err().unwrap();
                assert!(err.to_string().contains("SESSION_REMEMBER_ME_SECS"));
            });
        }
    }

    #[test]
    fn test_out_of_range_fields_fail_provider_construction() {
        with_env(&[], || {
            let mut config = Config::from_env().unwrap();
            config.remember_me_secs = i64::MAX;

            let provider = config.provider();
            assert_eq!(provider.remember_me, chrono::Duration::zero());

            let built = crate::session::provider::ProductionProvider::new(
                &provider,
                std::sync::Arc::new(crate::crypto::random::CryptoRandom),
                std::sync::Arc::new(crate::store::MemoryStore::new()),
            );
            assert!(built.is_err());
        });
    }

    #[test]
    fn test_empty_redis_url_means_memory() {
        with_env(&[("REDIS_URL", Some(""))], || {
            assert_eq!(Config::from_env().unwrap().redis_url, None);
        });
    }
}
