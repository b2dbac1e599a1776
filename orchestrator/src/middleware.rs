use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use warp::{Filter, Rejection};

use crate::error::ApiError;

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Content-Type",
            "Authorization",
            "Accept",
            "Cache-Control",
            "Content-Length",
        ])
        .allow_methods(vec!["POST", "GET", "OPTIONS"])
}

pub type SubmitLimiter = Arc<DefaultDirectRateLimiter>;

pub fn submit_limiter(per_second: u32) -> SubmitLimiter {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

/// Rejects with 429 once the process-wide submission quota is spent.
pub fn rate_limit(limiter: SubmitLimiter) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::any()
        .and_then(move || {
            let limiter = limiter.clone();
            async move {
                limiter
                    .check()
                    .map_err(|_| warp::reject::custom(ApiError::RateLimitExceeded))
            }
        })
        .untuple_one()
}
