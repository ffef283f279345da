//! Per-client request ceilings for the credential endpoints, and the hardened
//! response headers applied to every route.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue};
use axum::Router;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::audit::ClientContext;
use crate::config::env_or;
use crate::errors::AppError;

/// Idle keys are dropped once the table grows past this.
const MAX_TRACKED_CLIENTS: usize = 10_000;

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub max: u32,
    pub window: Duration,
}

impl RateRule {
    pub const fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    fn quota(&self, name: &str) -> Result<Quota, AppError> {
        let burst = NonZeroU32::new(self.max)
            .ok_or_else(|| AppError::configuration(format!("{name} limit must be at least 1")))?;
        Quota::with_period(self.window / self.max)
            .map(|quota| quota.allow_burst(burst))
            .ok_or_else(|| AppError::configuration(format!("{name} window must be positive")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRateLimits {
    pub login: RateRule,
    pub register: RateRule,
}

impl Default for AuthRateLimits {
    fn default() -> Self {
        Self {
            login: RateRule::new(5, Duration::from_secs(5 * 60)),
            register: RateRule::new(3, Duration::from_secs(15 * 60)),
        }
    }
}

impl AuthRateLimits {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        Ok(Self {
            login: RateRule::new(
                env_or("AUTH_LOGIN_MAX", defaults.login.max)?,
                Duration::from_secs(env_or("AUTH_LOGIN_WINDOW_SECS", defaults.login.window.as_secs())?),
            ),
            register: RateRule::new(
                env_or("AUTH_REGISTER_MAX", defaults.register.max)?,
                Duration::from_secs(env_or("AUTH_REGISTER_WINDOW_SECS", defaults.register.window.as_secs())?),
            ),
        })
    }
}

/// Keyed limiters for `/auth/login` and `/auth/register`, one bucket per client address.
#[derive(Clone)]
pub struct AuthThrottle {
    login: Arc<DefaultKeyedRateLimiter<String>>,
    register: Arc<DefaultKeyedRateLimiter<String>>,
}

impl AuthThrottle {
    pub fn new(limits: AuthRateLimits) -> Result<Self, AppError> {
        Ok(Self {
            login: Arc::new(RateLimiter::keyed(limits.login.quota("AUTH_LOGIN")?)),
            register: Arc::new(RateLimiter::keyed(limits.register.quota("AUTH_REGISTER")?)),
        })
    }

    pub fn check_login(&self, client: &ClientContext) -> Result<(), AppError> {
        check(&self.login, "login", client)
    }

    pub fn check_register(&self, client: &ClientContext) -> Result<(), AppError> {
        check(&self.register, "registration", client)
    }
}

fn check(limiter: &DefaultKeyedRateLimiter<String>, what: &str, client: &ClientContext) -> Result<(), AppError> {
    if limiter.len() > MAX_TRACKED_CLIENTS {
        limiter.retain_recent();
    }

    let key = client.ip.clone().unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    limiter.check_key(&key).map_err(|not_until| {
        let wait = not_until.wait_time_from(DefaultClock::default().now());
        tracing::warn!(client = %key, retry_after_secs = wait.as_secs(), "{what} attempts throttled");
        AppError::too_many_requests(format!("too many {what} attempts; retry in {}s", wait.as_secs().max(1)))
    })
}

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; img-src 'self' data:; \
     style-src 'self' 'unsafe-inline'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'";

/// Set the hardened headers on responses that do not carry their own.
pub fn security_headers(router: Router) -> Router {
    let headers = [
        (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
        (header::STRICT_TRANSPORT_SECURITY, "max-age=31536000; includeSubDomains"),
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::REFERRER_POLICY, "no-referrer"),
        (HeaderName::from_static("permissions-policy"), "camera=(), microphone=(), geolocation=()"),
    ];

    headers.into_iter().fold(router, |router, (name, value)| {
        router.layer(SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value)))
    })
}
