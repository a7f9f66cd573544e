// Per-IP request rate limiting.
//
// Fixed one-minute windows per source IP. When a reverse proxy is in front,
// the client IP is the right-most X-Forwarded-For entry (the hop the proxy
// itself appended; anything left of it is client-controlled).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

const WINDOW: Duration = Duration::from_secs(60);

/// Entry cap; beyond it expired windows are purged eagerly.
const MAX_TRACKED_IPS: usize = 10_000;

pub struct RateLimiter {
    budget: u32,
    windows: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(budget: u32) -> Self {
        RateLimiter {
            budget,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a request. Err carries the Retry-After seconds.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() >= MAX_TRACKED_IPS {
            windows.retain(|_, (start, _)| now.duration_since(*start) < WINDOW);
        }

        let entry = windows.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) >= WINDOW {
            *entry = (now, 0);
        }
        if entry.1 >= self.budget {
            let retry_after = WINDOW
                .saturating_sub(now.duration_since(entry.0))
                .as_secs()
                .max(1);
            return Err(retry_after);
        }
        entry.1 += 1;
        Ok(())
    }
}

/// Client IP for rate limiting: right-most X-Forwarded-For entry when a
/// reverse proxy is present, otherwise the socket peer address.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit(',').next())
        .and_then(|entry| entry.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last])
    }

    #[test]
    fn test_budget_enforced_per_window() {
        let limiter = RateLimiter::new(3);
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_ok());
        assert!(limiter.check_at(ip(1), now).is_ok());
        assert!(limiter.check_at(ip(1), now).is_ok());
        let retry_after = limiter.check_at(ip(1), now).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[test]
    fn test_budget_is_per_ip() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_ok());
        assert!(limiter.check_at(ip(2), now).is_ok());
        assert!(limiter.check_at(ip(1), now).is_err());
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_ok());
        assert!(limiter.check_at(ip(1), now).is_err());
        assert!(limiter.check_at(ip(1), now + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn test_client_ip_prefers_rightmost_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1, 172.16.0.3".parse().unwrap(),
        );
        assert_eq!(client_ip(&headers, ip(9)), "172.16.0.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        assert_eq!(client_ip(&HeaderMap::new(), ip(9)), ip(9));

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(client_ip(&headers, ip(9)), ip(9));
    }
}
