//! Per-scope request throttling with a sliding window.
//!
//! Entities that name a `throttle_scope` with a configured rate are limited by that scope alone;
//! all other requests fall under the `anon` or `user` rate. Buckets are keyed by scope and caller
//! (username when authenticated, else the socket peer, or the forwarded address behind a trusted proxy).

use crate::auth::Caller;
use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::settings::ThrottleSettings;
use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// `requests` per `window`, written as `30/hour`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rate {
    pub requests: u32,
    pub window: Duration,
}

impl Rate {
    pub fn per_hour(requests: u32) -> Self {
        Rate {
            requests,
            window: Duration::from_secs(3600),
        }
    }
}

impl FromStr for Rate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (n, period) = s
            .split_once('/')
            .ok_or_else(|| format!("rate '{}' must look like 30/hour", s))?;
        let requests: u32 = n
            .trim()
            .parse()
            .map_err(|_| format!("rate '{}' has an invalid request count", s))?;
        let secs = match period.trim().to_lowercase().as_str() {
            "s" | "sec" | "second" => 1,
            "m" | "min" | "minute" => 60,
            "h" | "hour" => 3600,
            "d" | "day" => 86_400,
            other => return Err(format!("unknown rate period '{}'", other)),
        };
        Ok(Rate {
            requests,
            window: Duration::from_secs(secs),
        })
    }
}

/// Socket peer and the first `X-Forwarded-For` hop, if any.
///
/// Which one keys a bucket is decided by the limiter: the forwarded hop is
/// client-controlled and only used when `trust_proxy` is set.
#[derive(Clone, Debug, Default)]
pub struct ClientAddr {
    pub peer: Option<String>,
    pub forwarded: Option<String>,
}

impl ClientAddr {
    pub fn peer(ip: impl Into<String>) -> Self {
        ClientAddr {
            peer: Some(ip.into()),
            forwarded: None,
        }
    }

    fn key(&self, trust_proxy: bool) -> &str {
        let forwarded = if trust_proxy { self.forwarded.as_deref() } else { None };
        forwarded.or(self.peer.as_deref()).unwrap_or("unknown")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        Ok(ClientAddr { peer, forwarded })
    }
}

const CLEANUP_INTERVAL: u64 = 256;

pub struct RateLimiter {
    settings: ThrottleSettings,
    history: Mutex<History>,
    request_count: AtomicU64,
}

impl RateLimiter {
    pub fn new(settings: ThrottleSettings) -> Self {
        RateLimiter {
            settings,
            history: Mutex::new(HashMap::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Scope name and rate that apply to this request.
    fn scope_for(&self, entity: Option<&ResolvedEntity>, caller: &Caller) -> (String, Rate) {
        if let Some(scope) = entity.and_then(|e| e.throttle_scope.as_deref()) {
            if let Some(rate) = self.settings.scopes.get(scope) {
                return (scope.to_string(), *rate);
            }
        }
        if caller.is_authenticated() {
            ("user".into(), self.settings.user)
        } else {
            ("anon".into(), self.settings.anon)
        }
    }

    /// Record a request against its bucket or reject it with `RateLimited`.
    pub fn check(&self, entity: Option<&ResolvedEntity>, caller: &Caller, client: &ClientAddr) -> Result<(), AppError> {
        self.check_at(entity, caller, client, Instant::now())
    }

    fn check_at(
        &self,
        entity: Option<&ResolvedEntity>,
        caller: &Caller,
        client: &ClientAddr,
        now: Instant,
    ) -> Result<(), AppError> {
        if !self.settings.enabled {
            return Ok(());
        }
        let (scope, rate) = self.scope_for(entity, caller);
        let ident = match caller.username() {
            Some(name) => format!("user:{}", name),
            None => format!("addr:{}", client.key(self.settings.trust_proxy)),
        };

        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let longest = self.longest_window();
        if count > 0 && count % CLEANUP_INTERVAL == 0 {
            evict_idle(&mut history, now, longest);
        }

        let key = (scope.clone(), ident);
        if !history.contains_key(&key) && history.len() >= self.settings.max_tracked_keys {
            evict_idle(&mut history, now, longest);
            if history.len() >= self.settings.max_tracked_keys {
                tracing::warn!(
                    scope = %scope,
                    tracked = history.len(),
                    "throttle key cap reached, rejecting new caller"
                );
                return Err(AppError::RateLimited {
                    scope,
                    retry_after: rate.window.as_secs().max(1),
                });
            }
        }

        let stamps = history.entry(key).or_default();
        while let Some(oldest) = stamps.front() {
            if now.duration_since(*oldest) >= rate.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= rate.requests as usize {
            let retry_after = stamps
                .front()
                .map(|oldest| rate.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(rate.window);
            tracing::warn!(scope = %scope, "request throttled");
            return Err(AppError::RateLimited {
                scope,
                retry_after: retry_after.as_secs().max(1),
            });
        }
        stamps.push_back(now);
        Ok(())
    }

    /// Number of buckets currently held.
    pub fn tracked_keys(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn longest_window(&self) -> Duration {
        self.settings
            .scopes
            .values()
            .map(|r| r.window)
            .chain([self.settings.anon.window, self.settings.user.window])
            .max()
            .unwrap_or(Duration::from_secs(3600))
    }
}

type History = HashMap<(String, String), VecDeque<Instant>>;

/// Drop buckets whose newest request has aged out of every window.
fn evict_idle(history: &mut History, now: Instant, longest: Duration) {
    history.retain(|_, stamps| stamps.back().map(|t| now.duration_since(*t) < longest).unwrap_or(false));
}
