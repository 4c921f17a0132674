//! Multi-engine web search: ordered fallback, bounded per-engine retry with
//! exponential backoff, whole-cycle retry with a fixed delay, and optional
//! concurrent page-content enrichment.

use crate::engines::{BaiduEngine, BingEngine};
use crate::{default_client, ContentFetcher};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use toolpipe_core::{
    Error, Result, SearchEngine, SearchHit, SearchItem, SearchMetadata, SearchRequest,
    SearchResponse, Tool, ToolResult,
};

/// Immutable orchestrator configuration, passed in at construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Preferred engine, tried first when registered.
    pub engine: String,
    /// Fallback engines in order; remaining registered engines follow.
    pub fallback_engines: Vec<String>,
    /// Delay between full cycles after every engine came up empty.
    pub retry_delay_ms: u64,
    /// Extra full cycles after the first.
    pub max_retries: usize,
    /// Attempts per engine within one cycle.
    pub engine_attempts: usize,
    /// Base backoff between attempts; doubles per attempt up to the cap.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Defaults reported in response metadata when the request has no hint.
    pub lang: String,
    pub country: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            engine: "bing".to_string(),
            fallback_engines: vec!["baidu".to_string()],
            retry_delay_ms: 60_000,
            max_retries: 3,
            engine_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 10_000,
            lang: "en".to_string(),
            country: "us".to_string(),
        }
    }
}

const WEB_SEARCH_DESCRIPTION: &str = "Search the web for real-time information about any topic.
This tool returns comprehensive search results with relevant information, URLs, titles, and descriptions.
If the primary search engine fails, it automatically falls back to alternative engines.";

/// The `web_search` tool and its fallback orchestrator.
///
/// The engine map is read-only after construction; concurrent independent
/// searches share no mutable state and are safe.
pub struct WebSearch {
    engines: BTreeMap<String, Arc<dyn SearchEngine>>,
    settings: SearchSettings,
    fetcher: ContentFetcher,
}

impl WebSearch {
    /// Orchestrator over the default engines (`bing`, `baidu`).
    pub fn new(settings: SearchSettings) -> Result<Self> {
        let client = default_client()?;
        let mut engines: BTreeMap<String, Arc<dyn SearchEngine>> = BTreeMap::new();
        engines.insert(
            "bing".to_string(),
            Arc::new(BingEngine::new(client.clone())),
        );
        engines.insert(
            "baidu".to_string(),
            Arc::new(BaiduEngine::new(client.clone())),
        );
        Ok(Self {
            engines,
            settings,
            fetcher: ContentFetcher::new(client),
        })
    }

    /// Orchestrator over an arbitrary engine map (tests, custom deployments).
    pub fn with_engines(
        settings: SearchSettings,
        engines: BTreeMap<String, Arc<dyn SearchEngine>>,
        fetcher: ContentFetcher,
    ) -> Self {
        Self {
            engines,
            settings,
            fetcher,
        }
    }

    /// Preferred engine first, then configured fallbacks, then every other
    /// registered engine: a cycle is only exhausted once all were tried.
    fn engine_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        let preferred = self.settings.engine.to_ascii_lowercase();
        if self.engines.contains_key(&preferred) {
            order.push(preferred);
        }
        for name in &self.settings.fallback_engines {
            let name = name.to_ascii_lowercase();
            if self.engines.contains_key(&name) && !order.contains(&name) {
                order.push(name);
            }
        }
        for name in self.engines.keys() {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    /// One engine's full attempt budget. `Err` and an empty list both count as
    /// a failed attempt; the outcome after the budget is whatever came last.
    async fn try_engine(
        &self,
        name: &str,
        engine: &Arc<dyn SearchEngine>,
        query: &str,
        num_results: usize,
    ) -> Vec<SearchItem> {
        let mut backoff = Duration::from_millis(self.settings.backoff_base_ms);
        let cap = Duration::from_millis(self.settings.backoff_cap_ms);
        for attempt in 1..=self.settings.engine_attempts {
            match engine.perform_search(query, num_results).await {
                Ok(items) if !items.is_empty() => return items,
                Ok(_) => {
                    tracing::debug!(engine = name, attempt, "engine returned no results");
                }
                Err(e) => {
                    tracing::warn!(engine = name, attempt, error = %e, "engine attempt failed");
                }
            }
            if attempt < self.settings.engine_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(cap);
            }
        }
        Vec::new()
    }

    /// One cycle through the engine order; stops at the first non-empty list.
    async fn try_all_engines(
        &self,
        query: &str,
        num_results: usize,
    ) -> Option<(String, Vec<SearchItem>)> {
        for name in self.engine_order() {
            let Some(engine) = self.engines.get(&name) else {
                continue;
            };
            let items = self.try_engine(&name, engine, query, num_results).await;
            if !items.is_empty() {
                return Some((name, items));
            }
        }
        None
    }

    async fn attach_content(&self, hits: &mut [SearchHit]) {
        // Fan-out one fetch per hit; reassemble by index, not completion order.
        let fetches = hits.iter().map(|hit| self.fetcher.fetch_page_text(&hit.url));
        let texts = futures_util::future::join_all(fetches).await;
        for (hit, text) in hits.iter_mut().zip(texts) {
            hit.raw_content = text;
        }
    }

    pub async fn search(&self, req: &SearchRequest) -> SearchResponse {
        let num_results = req.num_results.max(1);
        for cycle in 0..=self.settings.max_retries {
            if let Some((source, items)) = self.try_all_engines(&req.query, num_results).await {
                let mut hits = rank_items(items, &source);
                if req.fetch_content {
                    self.attach_content(&mut hits).await;
                }
                let metadata = SearchMetadata {
                    total_results: hits.len(),
                    language: req
                        .language
                        .clone()
                        .unwrap_or_else(|| self.settings.lang.clone()),
                    country: req
                        .country
                        .clone()
                        .unwrap_or_else(|| self.settings.country.clone()),
                };
                return SearchResponse {
                    query: req.query.clone(),
                    results: hits,
                    metadata: Some(metadata),
                    error: None,
                };
            }
            if cycle < self.settings.max_retries {
                tracing::warn!(
                    query = %req.query,
                    cycle,
                    "all engines returned no results; retrying after delay"
                );
                tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
            }
        }
        SearchResponse::failure(
            req.query.clone(),
            Error::AllEnginesExhausted(req.query.clone()).to_string(),
        )
    }
}

fn rank_items(items: Vec<SearchItem>, source: &str) -> Vec<SearchHit> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| SearchHit {
            position: i + 1,
            url: item.url,
            title: item.title,
            description: item.description.unwrap_or_default(),
            source: source.to_string(),
            raw_content: None,
        })
        .collect()
}

#[async_trait::async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        WEB_SEARCH_DESCRIPTION
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "(required) The search query to submit to the search engine.",
                },
                "num_results": {
                    "type": "integer",
                    "description": "(optional) The number of search results to return. Default is 5.",
                    "default": 5,
                },
                "lang": {
                    "type": "string",
                    "description": "(optional) Language code for search results (default: en).",
                },
                "country": {
                    "type": "string",
                    "description": "(optional) Country code for search results (default: us).",
                },
                "fetch_content": {
                    "type": "boolean",
                    "description": "(optional) Whether to fetch full content from result pages. Default is false.",
                    "default": false,
                },
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult> {
        let req: SearchRequest =
            serde_json::from_value(args).map_err(|e| Error::InvalidParams(e.to_string()))?;
        Ok(self.search(&req).await.into_tool_result())
    }
}
