//! HTML-scraping search engine adapters.
//!
//! Each adapter owns its provider's pagination and markup quirks. Per-item
//! extraction is defensive: a malformed result is skipped, never fatal to the
//! whole call. Absence of results, not an error, is the adapter-level failure
//! signal the orchestrator acts on.

use html_scraper::{Html, Selector};
use toolpipe_core::{Error, Result, SearchEngine, SearchItem};
use url::Url;

const DESCRIPTION_MAX_CHARS: usize = 300;

const BING_HOST_URL: &str = "https://www.bing.com";
const BING_SEARCH_URL: &str = "https://www.bing.com/search";
const BAIDU_SEARCH_URL: &str = "https://www.baidu.com/s";

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn sel(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn text_of(el: html_scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn get_html(client: &reqwest::Client, url: &str, referer: &str) -> Result<String> {
    let resp = client
        .get(url)
        .header(reqwest::header::REFERER, referer)
        .send()
        .await
        .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::EngineUnavailable(format!("search HTTP {status}")));
    }
    resp.text()
        .await
        .map_err(|e| Error::EngineUnavailable(e.to_string()))
}

/// Parse one Bing result page. Returns items plus the next-page href, if any.
///
/// `start` is the number of items already collected; it only feeds the
/// "Bing Result N" placeholder titles.
fn parse_bing_page(html: &str, start: usize) -> (Vec<SearchItem>, Option<String>) {
    let doc = Html::parse_document(html);
    let (Some(li_sel), Some(h2_sel), Some(a_sel), Some(p_sel), Some(next_sel)) = (
        sel("ol#b_results li.b_algo"),
        sel("h2"),
        sel("a"),
        sel("p"),
        sel(r#"a[title="Next Page"]"#),
    ) else {
        return (Vec::new(), None);
    };

    let mut items = Vec::new();
    let mut rank = start;
    for li in doc.select(&li_sel) {
        let mut title = String::new();
        let mut href = String::new();
        if let Some(h2) = li.select(&h2_sel).next() {
            if let Some(a) = h2.select(&a_sel).next() {
                title = text_of(a);
                href = a.value().attr("href").unwrap_or("").trim().to_string();
            }
        }
        if href.is_empty() {
            // Malformed item: skip, never fail the page.
            continue;
        }
        let description = li.select(&p_sel).next().map(text_of).unwrap_or_default();
        rank += 1;
        items.push(SearchItem {
            title: if title.is_empty() {
                format!("Bing Result {rank}")
            } else {
                title
            },
            url: href,
            description: if description.is_empty() {
                None
            } else {
                Some(truncate_chars(&description, DESCRIPTION_MAX_CHARS))
            },
        });
    }

    let next = doc
        .select(&next_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.to_string());
    (items, next)
}

/// Parse one Baidu result page. Returns items plus the next-page href, if any.
fn parse_baidu_page(html: &str, start: usize) -> (Vec<SearchItem>, Option<String>) {
    let doc = Html::parse_document(html);
    let (Some(div_sel), Some(h3_sel), Some(a_sel), Some(abstract_sel), Some(span_sel), Some(next_sel)) = (
        sel("div#content_left div.result"),
        sel("h3"),
        sel("a"),
        sel("div.c-abstract"),
        sel("span"),
        sel("a.n"),
    ) else {
        return (Vec::new(), None);
    };

    let mut items = Vec::new();
    let mut rank = start;
    for div in doc.select(&div_sel) {
        let mut title = String::new();
        let mut href = String::new();
        if let Some(h3) = div.select(&h3_sel).next() {
            if let Some(a) = h3.select(&a_sel).next() {
                title = text_of(a);
                href = a.value().attr("href").unwrap_or("").trim().to_string();
            }
        }
        if href.is_empty() {
            continue;
        }
        let description = div
            .select(&abstract_sel)
            .next()
            .or_else(|| div.select(&span_sel).next())
            .map(text_of)
            .unwrap_or_default();
        rank += 1;
        items.push(SearchItem {
            title: if title.is_empty() {
                format!("Baidu Result {rank}")
            } else {
                title
            },
            url: href,
            description: if description.is_empty() {
                None
            } else {
                Some(truncate_chars(&description, DESCRIPTION_MAX_CHARS))
            },
        });
    }

    // Baidu renders "prev" and "next" with the same class; next is last.
    let next = doc
        .select(&next_sel)
        .last()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.to_string());
    (items, next)
}

fn search_url(endpoint: &str, param: &str, query: &str) -> Result<Url> {
    let mut url =
        Url::parse(endpoint).map_err(|e| Error::EngineUnavailable(e.to_string()))?;
    url.query_pairs_mut().append_pair(param, query);
    Ok(url)
}

/// Paginate until `num_results` items are collected or no next page exists.
async fn paginate(
    client: &reqwest::Client,
    first: Url,
    referer: &str,
    num_results: usize,
    parse: impl Fn(&str, usize) -> (Vec<SearchItem>, Option<String>),
) -> Result<Vec<SearchItem>> {
    let mut items: Vec<SearchItem> = Vec::new();
    let mut current = first;
    while items.len() < num_results {
        let body = get_html(client, current.as_str(), referer).await?;
        let (page_items, next) = parse(&body, items.len());
        if page_items.is_empty() {
            break;
        }
        items.extend(page_items);
        match next {
            Some(href) => {
                current = current
                    .join(&href)
                    .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
            }
            None => break,
        }
    }
    items.truncate(num_results);
    Ok(items)
}

#[derive(Debug, Clone)]
pub struct BingEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl BingEngine {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: BING_SEARCH_URL.to_string(),
        }
    }

    /// Point the adapter at a different endpoint (fixture servers in tests).
    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl SearchEngine for BingEngine {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn perform_search(&self, query: &str, num_results: usize) -> Result<Vec<SearchItem>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let first = search_url(&self.endpoint, "q", query)?;
        paginate(&self.client, first, BING_HOST_URL, num_results, parse_bing_page).await
    }
}

#[derive(Debug, Clone)]
pub struct BaiduEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl BaiduEngine {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: BAIDU_SEARCH_URL.to_string(),
        }
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl SearchEngine for BaiduEngine {
    fn name(&self) -> &'static str {
        "baidu"
    }

    async fn perform_search(&self, query: &str, num_results: usize) -> Result<Vec<SearchItem>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let first = search_url(&self.endpoint, "wd", query)?;
        paginate(
            &self.client,
            first,
            "https://www.baidu.com",
            num_results,
            parse_baidu_page,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    fn bing_page(items: &[(&str, &str, &str)], next_href: Option<&str>) -> String {
        let mut lis = String::new();
        for (title, url, desc) in items {
            lis.push_str(&format!(
                r#"<li class="b_algo"><h2><a href="{url}">{title}</a></h2><p>{desc}</p></li>"#
            ));
        }
        let next = next_href
            .map(|h| format!(r#"<a title="Next Page" href="{h}">&gt;</a>"#))
            .unwrap_or_default();
        format!(r#"<html><body><ol id="b_results">{lis}</ol>{next}</body></html>"#)
    }

    #[test]
    fn parse_bing_page_extracts_ordered_items() {
        let html = bing_page(
            &[
                ("First", "https://a.example", "alpha"),
                ("Second", "https://b.example", "beta"),
            ],
            None,
        );
        let (items, next) = parse_bing_page(&html, 0);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First");
        assert_eq!(items[0].url, "https://a.example");
        assert_eq!(items[0].description.as_deref(), Some("alpha"));
        assert_eq!(items[1].title, "Second");
        assert_eq!(next, None);
    }

    #[test]
    fn parse_bing_page_skips_malformed_items_and_fills_placeholder_titles() {
        let html = r#"<html><body><ol id="b_results">
            <li class="b_algo"><p>no link at all</p></li>
            <li class="b_algo"><h2><a href="https://ok.example"></a></h2></li>
        </ol></body></html>"#;
        let (items, _) = parse_bing_page(html, 3);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Bing Result 4");
        assert_eq!(items[0].url, "https://ok.example");
        assert_eq!(items[0].description, None);
    }

    #[test]
    fn parse_bing_page_truncates_long_descriptions() {
        let long = "d".repeat(500);
        let html = bing_page(&[("T", "https://x.example", &long)], None);
        let (items, _) = parse_bing_page(&html, 0);
        assert_eq!(
            items[0].description.as_ref().unwrap().chars().count(),
            DESCRIPTION_MAX_CHARS
        );
    }

    #[test]
    fn parse_bing_page_without_results_container_yields_nothing() {
        let (items, next) = parse_bing_page("<html><body>captcha wall</body></html>", 0);
        assert!(items.is_empty());
        assert_eq!(next, None);
    }

    #[test]
    fn parse_baidu_page_extracts_items_and_next_link() {
        let html = r#"<html><body><div id="content_left">
            <div class="result"><h3><a href="https://a.example">One</a></h3><div class="c-abstract">summary</div></div>
            <div class="result"><h3><a href="https://b.example">Two</a></h3><span>snippet</span></div>
        </div><a class="n" href="/s?wd=q&pn=10">next</a></body></html>"#;
        let (items, next) = parse_baidu_page(html, 0);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description.as_deref(), Some("summary"));
        assert_eq!(items[1].description.as_deref(), Some("snippet"));
        assert_eq!(next.as_deref(), Some("/s?wd=q&pn=10"));
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn bing_engine_paginates_until_enough_results() {
        let app = Router::new().route(
            "/search",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let page = params.get("page").map(String::as_str).unwrap_or("1");
                let html = if page == "1" {
                    bing_page(
                        &[
                            ("A", "https://a.example", "one"),
                            ("B", "https://b.example", "two"),
                        ],
                        Some("/search?page=2"),
                    )
                } else {
                    bing_page(&[("C", "https://c.example", "three")], None)
                };
                axum::response::Html(html)
            }),
        );
        let addr = serve(app).await;

        let engine =
            BingEngine::with_endpoint(reqwest::Client::new(), format!("http://{addr}/search"));
        let items = engine.perform_search("rust", 3).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].title, "C");
    }

    #[tokio::test]
    async fn bing_engine_stops_at_requested_count() {
        let app = Router::new().route(
            "/search",
            get(|| async {
                axum::response::Html(bing_page(
                    &[
                        ("A", "https://a.example", "one"),
                        ("B", "https://b.example", "two"),
                        ("C", "https://c.example", "three"),
                    ],
                    Some("/search?page=2"),
                ))
            }),
        );
        let addr = serve(app).await;

        let engine =
            BingEngine::with_endpoint(reqwest::Client::new(), format!("http://{addr}/search"));
        let items = engine.perform_search("rust", 2).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn engine_surfaces_http_failures_as_engine_unavailable() {
        let app = Router::new().route(
            "/search",
            get(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
        );
        let addr = serve(app).await;

        let engine =
            BingEngine::with_endpoint(reqwest::Client::new(), format!("http://{addr}/search"));
        let err = engine.perform_search("rust", 2).await.unwrap_err();
        assert!(matches!(err, Error::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_query_short_circuits_to_empty_list() {
        let engine = BingEngine::with_endpoint(reqwest::Client::new(), "http://127.0.0.1:1/none");
        let items = engine.perform_search("   ", 5).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn baidu_engine_parses_fixture_results() {
        let app = Router::new().route(
            "/s",
            get(|| async {
                axum::response::Html(
                    r#"<html><body><div id="content_left">
                        <div class="result"><h3><a href="https://a.example">Hit</a></h3><div class="c-abstract">text</div></div>
                    </div></body></html>"#
                        .to_string(),
                )
            }),
        );
        let addr = serve(app).await;

        let engine =
            BaiduEngine::with_endpoint(reqwest::Client::new(), format!("http://{addr}/s"));
        let items = engine.perform_search("rust", 5).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Hit");
    }
}
