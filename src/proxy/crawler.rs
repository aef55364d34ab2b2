//! Proxy crawler module for scraping candidates from public proxy lists
//!
//! This module provides functionality for:
//! - Fetching plain-text proxy lists from well known sources
//! - Keeping only lines shaped like `IPv4:port`
//! - Merging and de-duplicating candidates across sources

use crate::proxy::cycle::CandidateSource;
use crate::proxy::models::{Candidate, ProtocolFilter};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Attempts per source
const DEFAULT_ATTEMPTS: u32 = 2;

/// Pause between attempts on the same source in milliseconds
const RETRY_PAUSE_MS: u64 = 200;

/// Sources fetched at the same time
const DEFAULT_CONCURRENCY: usize = 16;

const HTTP_SOURCES: &[&str] = &[
    "https://openproxy.space/list/http",
    "https://raw.githubusercontent.com/jetkai/proxy-list/main/online-proxies/txt/proxies-http.txt",
    "https://raw.githubusercontent.com/jetkai/proxy-list/main/online-proxies/txt/proxies-https.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies_anonymous/http.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/https.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/HTTPS_RAW.txt",
    "https://raw.githubusercontent.com/proxy4parsing/proxy-list/main/http.txt",
    "https://www.proxy-list.download/api/v1/get?type=http",
    "https://www.proxy-list.download/api/v1/get?type=https",
    "https://raw.githubusercontent.com/mmpx12/proxy-list/master/http.txt",
    "https://raw.githubusercontent.com/mmpx12/proxy-list/master/https.txt",
    "https://raw.githubusercontent.com/mmpx12/proxy-list/master/proxies.txt",
    "https://api.openproxylist.xyz/http.txt",
    "http://pubproxy.com/api/proxy",
    "https://raw.githubusercontent.com/IshanSingla/proxy-list/main/proxys/http.txt",
    "https://raw.githubusercontent.com/IshanSingla/proxy-list/main/proxys/https.txt",
    "https://raw.githubusercontent.com/almroot/proxylist/master/list.txt",
    "https://raw.githubusercontent.com/sunny9577/proxy-scraper/master/proxies.txt",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/http.txt",
    "https://raw.githubusercontent.com/MuRongPIG/Proxy-Master/main/http.txt",
    "https://api.proxyscrape.com/v4/free-proxy-list/get?request=display_proxies&proxy_format=ipport&format=text&anonymity=Anonymous,Elite&timeout=619",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/all/data.txt",
];

const SOCKS4_SOURCES: &[&str] = &[
    "https://api.openproxylist.xyz/socks4.txt",
    "https://www.proxy-list.download/api/v1/get?type=socks4",
    "https://raw.githubusercontent.com/jetkai/proxy-list/main/online-proxies/txt/proxies-socks4.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks4.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
    "https://raw.githubusercontent.com/mmpx12/proxy-list/master/socks4.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks4.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies_anonymous/socks4.txt",
    "https://openproxy.space/list/socks4",
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=socks4&timeout=10000&country=all",
    "https://raw.githubusercontent.com/IshanSingla/proxy-list/main/proxys/socks4.txt",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/socks4.txt",
    "https://raw.githubusercontent.com/MuRongPIG/Proxy-Master/main/socks4.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/socks4/data.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS4_RAW.txt",
];

const SOCKS5_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/thespeedx/proxy-list/master/socks5.txt",
    "https://api.openproxylist.xyz/socks5.txt",
    "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
    "https://www.proxy-list.download/api/v1/get?type=socks5",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks5.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies_anonymous/socks5.txt",
    "https://openproxy.space/list/socks5",
    "https://raw.githubusercontent.com/mmpx12/proxy-list/master/socks5.txt",
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=socks5&timeout=10000&country=all",
    "https://raw.githubusercontent.com/jetkai/proxy-list/main/online-proxies/txt/proxies-socks5.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks5.txt",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/socks5.txt",
    "https://raw.githubusercontent.com/MuRongPIG/Proxy-Master/main/socks5.txt",
    "https://sunny9577.github.io/proxy-scraper/generated/socks5_proxies.txt",
    "https://spys.me/socks.txt",
    "https://proxyspace.pro/socks5.txt",
    "https://raw.githubusercontent.com/ErcinDedeoglu/proxies/main/proxies/socks5.txt",
    "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/socks5/data.txt",
    "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS5_RAW.txt",
    "https://raw.githubusercontent.com/zevtyardt/proxy-list/main/socks5.txt",
    "https://raw.githubusercontent.com/vakhov/fresh-proxy-list/master/socks5.txt",
];

/// Configuration for the scraper
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// Attempts per source
    pub attempts: u32,
    /// Number of sources fetched concurrently
    pub concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            attempts: DEFAULT_ATTEMPTS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Proxy crawler for fetching candidate lists
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self { config, client })
    }

    /// Built-in list URLs for a protocol filter
    pub fn default_sources(filter: ProtocolFilter) -> Vec<String> {
        let lists: &[&[&str]] = match filter {
            ProtocolFilter::Http | ProtocolFilter::Https => &[HTTP_SOURCES],
            ProtocolFilter::Socks4 => &[SOCKS4_SOURCES],
            ProtocolFilter::Socks5 => &[SOCKS5_SOURCES],
            ProtocolFilter::All => &[HTTP_SOURCES, SOCKS4_SOURCES, SOCKS5_SOURCES],
        };

        let mut seen = BTreeSet::new();
        lists
            .iter()
            .flat_map(|list| list.iter())
            .filter(|url| seen.insert(**url))
            .map(|url| url.to_string())
            .collect()
    }

    /// Fetch one list within the attempt budget; `None` when every attempt failed
    pub async fn fetch(&self, url: &str) -> Option<String> {
        for attempt in 1..=self.config.attempts {
            match self.client.get(url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    match response.text().await {
                        Ok(body) => return Some(body),
                        Err(e) => debug!(url, attempt, error = %e, "failed to read body"),
                    }
                }
                Ok(response) => {
                    debug!(url, attempt, status = %response.status(), "unexpected status");
                }
                Err(e) => debug!(url, attempt, error = %e, "request failed"),
            }

            if attempt < self.config.attempts {
                tokio::time::sleep(Duration::from_millis(RETRY_PAUSE_MS)).await;
            }
        }
        None
    }

    /// Fetch all `urls` and merge the candidates they list
    pub async fn crawl(&self, urls: &[String]) -> Vec<Candidate> {
        let bodies: Vec<(String, Option<String>)> = stream::iter(urls.to_vec())
            .map(|url| async move {
                let body = self.fetch(&url).await;
                (url, body)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut merged = BTreeSet::new();
        for (url, body) in bodies {
            match body {
                Some(body) => {
                    let found = Self::extract_candidates(&body);
                    debug!(url = %url, found = found.len(), "source crawled");
                    merged.extend(found);
                }
                None => warn!(url = %url, "source unavailable, skipping"),
            }
        }

        merged.into_iter().collect()
    }

    /// Keep lines shaped like `IPv4:port`, skipping loopback entries
    pub fn extract_candidates(content: &str) -> BTreeSet<Candidate> {
        content
            .lines()
            .map(|line| Candidate::new(line.trim()))
            .filter(|candidate| candidate.has_endpoint_shape())
            .filter(|candidate| !candidate.as_str().starts_with("127"))
            .collect()
    }
}

/// Candidates scraped from public proxy lists
pub struct ScrapeSource {
    crawler: ProxyCrawler,
    urls: Vec<String>,
}

impl ScrapeSource {
    pub fn new(crawler: ProxyCrawler, urls: Vec<String>) -> Self {
        Self { crawler, urls }
    }

    /// Scrape the built-in sources for `filter`
    pub fn for_filter(filter: ProtocolFilter) -> Result<Self> {
        Ok(Self::new(
            ProxyCrawler::new()?,
            ProxyCrawler::default_sources(filter),
        ))
    }
}

#[async_trait]
impl CandidateSource for ScrapeSource {
    async fn candidates(&self) -> Result<Vec<Candidate>> {
        info!(sources = self.urls.len(), "scraping proxies");
        let candidates = self.crawler.crawl(&self.urls).await;
        info!(found = candidates.len(), "scraping finished");
        Ok(candidates)
    }

    fn describe(&self) -> String {
        format!("{} scraped sources", self.urls.len())
    }
}
