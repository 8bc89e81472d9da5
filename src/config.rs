use std::time::Duration;

use crate::charts::Geometry;
use crate::client::ClientConfig;
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::toast::DEFAULT_TOAST_TTL;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved settings for one dashboard session.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub base_url: String,
    pub csrf_token: String,
    pub poll_interval: Duration,
    pub toast_ttl: Duration,
    pub request_timeout: Duration,
    pub chart_geometry: Geometry,
}

impl DashboardConfig {
    pub fn new(base_url: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        DashboardConfig {
            base_url: base_url.into(),
            csrf_token: csrf_token.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            toast_ttl: DEFAULT_TOAST_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chart_geometry: Geometry::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        // A zero period would make tokio's interval panic.
        self.poll_interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn with_toast_ttl(mut self, ttl: Duration) -> Self {
        self.toast_ttl = ttl;
        self
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            csrf_token: self.csrf_token.clone(),
            timeout: self.request_timeout,
        }
    }
}
