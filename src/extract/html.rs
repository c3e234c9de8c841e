use std::io::Read;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Node, Selector};

use crate::config::ExtractorConfig;
use crate::extract::{ExtractError, TextExtractor};
use crate::semantic::truncate_content;

const MAX_REDIRECTS: usize = 5;

/// Upper bound on the response body read from a job page
const MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;

/// Elements whose text never describes the page content
const SKIPPED_ELEMENTS: [&str; 8] = [
    "script", "style", "noscript", "nav", "header", "footer", "svg", "template",
];

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("Failed to parse title selector"));
static META: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta").expect("Failed to parse meta selector"));
static BODY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("Failed to parse body selector"));

fn is_ip_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_private_host(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return is_ip_private(&ip);
    }

    if let Ok(addrs) = (bare, 80).to_socket_addrs() {
        for addr in addrs {
            if is_ip_private(&addr.ip()) {
                return true;
            }
        }
    }

    false
}

/// Which URLs the extractor may fetch.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    pub allowed_schemes: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub block_private_ips: bool,
}

impl UrlPolicy {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            allowed_schemes: config.allowed_schemes.clone(),
            blocked_hosts: config.blocked_hosts.clone(),
            block_private_ips: config.block_private_ips,
        }
    }

    pub fn check(&self, url: &reqwest::Url) -> Result<(), ExtractError> {
        if !self.allowed_schemes.iter().any(|s| s == url.scheme()) {
            log::warn!("URL scheme '{}' not allowed", url.scheme());
            return Err(ExtractError::Blocked(format!(
                "scheme '{}' not allowed",
                url.scheme()
            )));
        }

        let host = url.host_str().unwrap_or_default();
        if host.is_empty() {
            return Err(ExtractError::InvalidUrl(url.to_string()));
        }

        if self.blocked_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
            log::warn!("Host '{}' is blocked", host);
            return Err(ExtractError::Blocked(format!("host '{host}' is blocked")));
        }

        if self.block_private_ips && is_private_host(host) {
            log::warn!("Host '{}' resolves to private IP (blocked by SSRF policy)", host);
            return Err(ExtractError::Blocked(format!(
                "host '{host}' resolves to a private address"
            )));
        }

        Ok(())
    }
}

/// Fetches a page and keeps its readable text.
pub struct HtmlExtractor {
    client: reqwest::blocking::Client,
    policy: UrlPolicy,
    max_chars: usize,
}

impl HtmlExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractError> {
        let policy = UrlPolicy::from_config(config);

        // every redirect hop goes through the same policy
        let redirect_policy = policy.clone();
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(ExtractError::Request("too many redirects".to_string()));
            }
            match redirect_policy.check(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        });

        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect)
            .build()
            .map_err(|e| ExtractError::Request(get_error(&e)))?;

        Ok(Self {
            client,
            policy,
            max_chars: config.max_chars,
        })
    }

    /// Fetch the raw HTML of `url`.
    pub fn fetch_html(&self, url: &str) -> Result<String, ExtractError> {
        let parsed =
            reqwest::Url::parse(url.trim()).map_err(|e| ExtractError::InvalidUrl(e.to_string()))?;
        self.policy.check(&parsed)?;

        let host = parsed.host_str().unwrap_or_default();
        let iden = format!("{host}{}", parsed.path());
        log::debug!("{iden}: requesting");

        let resp = self
            .client
            .get(parsed.clone())
            .send()
            .map_err(|e| ExtractError::Request(get_error(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            log::debug!("{iden}: status {status}");
            return Err(ExtractError::Status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.is_empty() && !is_html_content_type(&content_type) {
            return Err(ExtractError::NotHtml(content_type));
        }

        read_capped(resp, MAX_BODY_BYTES).map_err(|e| ExtractError::Request(e.to_string()))
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }
}

impl TextExtractor for HtmlExtractor {
    fn extract(&self, url: &str) -> Result<String, ExtractError> {
        let html = self.fetch_html(url)?;
        let text = page_text(&html, self.max_chars);

        if text.is_empty() {
            return Err(ExtractError::Empty);
        }

        log::debug!("extracted {} chars from {url}", text.chars().count());
        Ok(text)
    }
}

/// Read at most `limit` bytes and decode them lossily, so a body cut inside
/// a multi-byte character still yields text.
fn read_capped<R: Read>(reader: R, limit: u64) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.take(limit).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn is_html_content_type(content_type: &str) -> bool {
    content_type.starts_with("text/html") || content_type.starts_with("application/xhtml+xml")
}

fn get_error(error: &reqwest::Error) -> String {
    use std::error::Error;

    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

/// Readable text of an HTML page: title, meta description, then visible
/// body text, whitespace-collapsed and cut to `max_chars`.
pub fn page_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let mut parts = vec![];

    if let Some(title) = document.select(&TITLE).next() {
        parts.push(title.text().collect::<String>());
    }

    for element in document.select(&META) {
        let meta_key = element
            .attr("name")
            .or_else(|| element.attr("property"))
            .unwrap_or_default()
            .to_lowercase();

        if meta_key == "description" || meta_key == "og:description" {
            parts.push(element.attr("content").unwrap_or_default().to_string());
            break;
        }
    }

    if let Some(body) = document.select(&BODY).next() {
        for node in body.descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };

            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
            });
            if !hidden {
                let text: &str = text;
                parts.push(text.to_string());
            }
        }
    }

    let joined = parts.join(" ");
    let collapsed = WHITESPACE.replace_all(joined.trim(), " ");

    truncate_content(&collapsed, max_chars)
}
