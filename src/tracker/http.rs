use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;

use super::error::TrackerError;
use super::response::{parse_announce_response, AnnounceRequest, AnnounceResponse};
use super::Announcer;
use crate::constants::{HTTP_TRACKER_TIMEOUT, TRACKER_DEFAULT_INTERVAL};

/// HTTP/HTTPS tracker client.
///
/// Tracks its own announce schedule: `should_announce` becomes true once
/// the interval the tracker last reported (or the default) has elapsed
/// since the last attempt.
pub struct HttpTracker {
    client: Client,
    url: String,
    schedule: Mutex<Schedule>,
}

struct Schedule {
    last_attempt: Option<Instant>,
    interval: Duration,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TRACKER_TIMEOUT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
            schedule: Mutex::new(Schedule {
                last_attempt: None,
                interval: TRACKER_DEFAULT_INTERVAL,
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_url(&self, request: &AnnounceRequest) -> String {
        let mut url = format!(
            "{}?info_hash={}&peer_id={}&ip={}&port={}&left={}&numwant={}&compact={}",
            self.url,
            url_encode(request.info_hash.as_bytes()),
            url_encode(request.peer_id.as_bytes()),
            request.ip.ip(),
            request.port,
            request.left,
            request.num_want,
            if request.compact { 1 } else { 0 },
        );

        let event = request.event.as_str();
        if !event.is_empty() {
            url.push_str("&event=");
            url.push_str(event);
        }

        url
    }
}

#[async_trait]
impl Announcer for HttpTracker {
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
        self.schedule.lock().last_attempt = Some(Instant::now());

        let url = self.build_url(request);
        let response = self.client.get(&url).send().await?;
        let bytes = response.bytes().await?;

        let parsed = parse_announce_response(&bytes)?;

        if let Some(interval) = parsed.interval {
            let mut schedule = self.schedule.lock();
            schedule.interval = match parsed.min_interval {
                Some(min) => interval.max(min),
                None => interval,
            };
        }

        Ok(parsed)
    }

    fn should_announce(&self) -> bool {
        let schedule = self.schedule.lock();
        match schedule.last_attempt {
            Some(at) => at.elapsed() >= schedule.interval,
            None => true,
        }
    }

    fn name(&self) -> &str {
        &self.url
    }
}

fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
                format!("{}", b as char)
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}
