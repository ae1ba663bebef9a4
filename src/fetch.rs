use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::error::CilError;

/// Reserved status marking permanent fetch failure after all attempts were
/// exhausted. Never a real HTTP status.
pub const FAILED_STATUS: u16 = 999;

/// Transport result of one fetch: where the body landed, the response headers as a
/// flat map, and the final HTTP status. All three are `None`/sentinel when every
/// attempt failed.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub local_file: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub status: u16,
}

impl FetchOutcome {
    fn failed() -> Self {
        Self {
            local_file: None,
            headers: None,
            status: FAILED_STATUS,
        }
    }
}

pub trait Fetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchOutcome, CilError>;

    /// Side-effecting landing-page GET, body discarded. Failures are logged and
    /// swallowed; the page hit only primes the remote host.
    fn load_page(&self, url: &str);
}

/// HTTP fetcher with bounded retries and synchronous backoff.
///
/// `num_retries` counts additional attempts after the first, so `num_retries + 1`
/// attempts total. A transport error and a non-200 response are both failed
/// attempts and both retried; the policy is applied uniformly.
pub struct RetryingFetcher {
    client: Client,
    num_retries: u32,
    retry_sleep: Duration,
}

impl RetryingFetcher {
    pub fn new(
        num_retries: u32,
        retry_sleep: Duration,
        timeout: Duration,
    ) -> Result<Self, CilError> {
        let client = Client::builder()
            .user_agent(format!("cildata-util/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| CilError::Http(err.to_string()))?;
        Ok(Self {
            client,
            num_retries,
            retry_sleep,
        })
    }

    fn attempt(&self, url: &str, dest: &Path) -> Result<FetchOutcome, String> {
        let response = self.client.get(url).send().map_err(|err| err.to_string())?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(format!("status {status} from {url}"));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|text| (name.as_str().to_string(), text.to_string()))
            })
            .collect::<BTreeMap<String, String>>();

        let mut response = response;
        let mut file = fs::File::create(dest).map_err(|err| err.to_string())?;
        io::copy(&mut response, &mut file).map_err(|err| err.to_string())?;

        Ok(FetchOutcome {
            local_file: dest
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            headers: Some(headers),
            status,
        })
    }
}

impl Fetcher for RetryingFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchOutcome, CilError> {
        let local_file = local_file_name(url);
        let dest = dest_dir.join(&local_file);

        for attempt in 0..=self.num_retries {
            match self.attempt(url, &dest) {
                Ok(outcome) => return Ok(outcome),
                Err(message) => {
                    warn!(url, attempt, "fetch attempt failed: {message}");
                    if attempt < self.num_retries {
                        thread::sleep(self.retry_sleep);
                    }
                }
            }
        }
        debug!(url, "all fetch attempts exhausted");
        Ok(FetchOutcome::failed())
    }

    fn load_page(&self, url: &str) {
        match self.client.get(url).send() {
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "loaded landing page");
            }
            Err(err) => {
                warn!(url, "landing page load failed: {err}");
            }
        }
    }
}

/// Final path segment of a URL, query string stripped.
pub fn local_file_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
        .to_string()
}

/// Case-insensitive header lookup. Live responses carry lowercase names while
/// batches persisted by earlier pipeline revisions kept the original casing.
pub fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
