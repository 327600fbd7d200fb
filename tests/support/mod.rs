#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;
use std::time::Duration;

use registry_mirror::{HttpClient, HttpSettings, RateLimiter, RetryPolicy};

/// Client with pacing disabled, for mock servers.
pub fn unpaced_client() -> HttpClient {
    HttpClient::new(&HttpSettings::default(), Arc::new(RateLimiter::disabled()))
        .expect("client builds")
}

/// Policy with `attempts` tries and no pause between them.
pub fn instant_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::ZERO)
}
