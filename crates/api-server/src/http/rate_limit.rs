use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::client_meta::remote_ip;
use super::errors::too_many_requests_response;
use super::{AppState, AuthUser};

type Buckets = Arc<Mutex<HashMap<RateLimitBucketKey, VecDeque<Instant>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: usize,
    pub window_seconds: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_seconds: 60,
        }
    }
}

/// Sliding-window limiter shared by all chat routes, keyed by caller.
#[derive(Clone, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    entries: Buckets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateLimitDecision {
    Allowed,
    Denied { retry_after_seconds: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateLimitBucketKey {
    scope: &'static str,
    subject: String,
}

const CHAT_SCOPE: &str = "chat";

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            entries: Buckets::default(),
        }
    }

    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let window = Duration::from_secs(self.policy.window_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                prune_entries(&entries, window, Instant::now());
            }
        })
    }

    fn check(&self, subject: &str) -> RateLimitDecision {
        self.check_at(subject, Instant::now())
    }

    fn check_at(&self, subject: &str, now: Instant) -> RateLimitDecision {
        let window = Duration::from_secs(self.policy.window_seconds);
        let cutoff = now.checked_sub(window).unwrap_or(now);
        let bucket_key = RateLimitBucketKey {
            scope: CHAT_SCOPE,
            subject: subject.to_string(),
        };

        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        let bucket = entries.entry(bucket_key).or_default();
        prune_bucket(bucket, cutoff);

        if bucket.len() >= self.policy.max_requests {
            let retry_after_seconds = bucket
                .front()
                .map(|first_seen| {
                    let elapsed = now.saturating_duration_since(*first_seen);
                    window.saturating_sub(elapsed).as_secs().max(1)
                })
                .unwrap_or(self.policy.window_seconds);
            return RateLimitDecision::Denied {
                retry_after_seconds,
            };
        }

        bucket.push_back(now);

        RateLimitDecision::Allowed
    }
}

fn prune_entries(entries: &Buckets, window: Duration, now: Instant) {
    let cutoff = now.checked_sub(window).unwrap_or(now);
    let mut state = match entries.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    };

    state.retain(|_, bucket| {
        prune_bucket(bucket, cutoff);
        !bucket.is_empty()
    });
}

fn prune_bucket(bucket: &mut VecDeque<Instant>, cutoff: Instant) {
    while let Some(front) = bucket.front() {
        if *front <= cutoff {
            bucket.pop_front();
        } else {
            break;
        }
    }
}

pub(super) async fn chat_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let subject = request_subject(&req, &state);

    match state.rate_limiter.check(&subject) {
        RateLimitDecision::Allowed => next.run(req).await,
        RateLimitDecision::Denied {
            retry_after_seconds,
        } => {
            warn!(
                subject = %subject,
                retry_after_seconds, "chat request denied by rate limit",
            );
            too_many_requests_response(retry_after_seconds)
        }
    }
}

fn request_subject(req: &Request, state: &AppState) -> String {
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return format!("user:{}", user.user_id);
    }

    if let Some(ip) = remote_ip(req, &state.trusted_proxy_ips) {
        return format!("ip:{ip}");
    }

    "anonymous".to_string()
}
