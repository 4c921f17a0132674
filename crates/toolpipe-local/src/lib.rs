use std::io::Cursor;
use std::time::Duration;
use toolpipe_core::{Error, Result};

pub mod engines;
pub mod registry;
pub mod session;
pub mod web_search;

pub(crate) const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Hard cap on extracted page text, to keep downstream consumers bounded.
pub const CONTENT_MAX_CHARS: usize = 10_000;

const CONTENT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared client used by engine adapters and the content fetcher.
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        // Safety defaults: avoid "hang forever" on DNS/TLS/body stalls.
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}

/// Fetches a result page and reduces it to bounded plain text.
///
/// Every failure mode (network error, non-2xx, empty extraction) collapses to
/// `None`: enrichment is best-effort per hit and must never fail a sibling hit
/// or the overall response.
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_chars: usize,
}

impl ContentFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: CONTENT_FETCH_TIMEOUT,
            max_chars: CONTENT_MAX_CHARS,
        }
    }

    /// Per-fetch timeout; one slow page must not stall the whole fan-in.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn fetch_page_text(&self, url: &str) -> Option<String> {
        let resp = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url, error = %e, "content fetch failed");
                return None;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "content fetch returned non-success");
            return None;
        }
        let body = resp.text().await.ok()?;
        let text = extract_page_text(&body, self.max_chars);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Convert an HTML page into whitespace-collapsed plain text, dropping
/// non-content regions and capping the result at `max_chars`.
pub fn extract_page_text(html: &str, max_chars: usize) -> String {
    let mut stripped = html.to_string();
    for tag in ["script", "style", "noscript", "nav", "header", "footer"] {
        stripped = strip_tag_blocks(&stripped, tag);
    }
    let text = html2text::from_read(Cursor::new(stripped.as_bytes()), 200)
        .unwrap_or_else(|_| stripped.clone());
    let collapsed = collapse_ws(&text);
    collapsed.chars().take(max_chars).collect()
}

/// Remove every `<tag ...>...</tag>` region, case-insensitively.
///
/// Good enough for boilerplate stripping: it does not handle nesting of the
/// same tag, which the tags we strip do not legitimately do.
fn strip_tag_blocks(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(html.len());
    let mut i = 0usize;
    while let Some(rel) = lower[i..].find(&open) {
        let start = i + rel;
        let after = lower.as_bytes().get(start + open.len()).copied();
        // Require a delimiter after the name so "<nav" does not match "<navigator-x>".
        let is_tag = match after {
            Some(b'>') | Some(b'/') => true,
            Some(b) => b.is_ascii_whitespace(),
            // Open tag cut off at end of input: treat as an unterminated block.
            None => true,
        };
        if !is_tag {
            out.push_str(&html[i..start + open.len()]);
            i = start + open.len();
            continue;
        }
        out.push_str(&html[i..start]);
        match lower[start..].find(&close) {
            Some(rel_close) => i = start + rel_close + close.len(),
            // Unterminated block: drop the rest of the document.
            None => {
                i = lower.len();
                break;
            }
        }
    }
    out.push_str(&html[i..]);
    out
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
