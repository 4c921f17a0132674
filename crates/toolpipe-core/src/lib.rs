use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("session has not been started")]
    SessionNotStarted,
    #[error("timed out: command did not finish within {0} seconds and the session must be restarted")]
    SessionTimeout(u64),
    #[error("session process exited with code {0}")]
    ProcessExited(i32),
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("all search engines failed to return results for query: {0}")]
    AllEnginesExhausted(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Raw item as produced by a single search engine adapter.
///
/// Ephemeral: the orchestrator normalizes these into ranked [`SearchHit`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
}

impl SearchItem {
    pub fn title_and_url(&self) -> String {
        format!("{} - {}", self.title, self.url)
    }
}

fn default_num_results() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_num_results")]
    pub num_results: usize,
    /// Language hint (e.g. "en", "zh"); falls back to the orchestrator settings.
    #[serde(default, alias = "lang")]
    pub language: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// If true, fetch page text for every hit (concurrent, best-effort).
    #[serde(default)]
    pub fetch_content: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            num_results: default_num_results(),
            language: None,
            country: None,
            fetch_content: false,
        }
    }
}

/// Normalized, orchestrator-level search record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based rank within the returned set.
    pub position: usize,
    pub url: String,
    pub title: String,
    pub description: String,
    /// Name of the engine that produced this hit.
    pub source: String,
    /// Page text attached by enrichment; `None` when not requested or when the
    /// fetch for this one hit failed.
    pub raw_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub total_results: usize,
    pub language: String,
    pub country: String,
}

/// Terminal artifact of one search invocation.
///
/// `error` and non-empty `results` are mutually exclusive: a failed search
/// carries an empty result list and a human-readable error string, never a
/// propagated error value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub metadata: Option<SearchMetadata>,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn failure(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            results: Vec::new(),
            metadata: None,
            error: Some(error.into()),
        }
    }

    /// Render the numbered plain-text block consumed by LLM-facing callers.
    pub fn render_output(&self) -> String {
        let mut lines = vec![format!("Search results for '{}':", self.query)];
        for hit in &self.results {
            let title = hit.title.trim();
            let title = if title.is_empty() { "No title" } else { title };
            lines.push(format!("\n{}. {}", hit.position, title));
            lines.push(format!("   URL: {}", hit.url));
            if !hit.description.trim().is_empty() {
                lines.push(format!("   Description: {}", hit.description));
            }
            if let Some(content) = &hit.raw_content {
                let mut preview: String = content
                    .chars()
                    .take(1000)
                    .collect::<String>()
                    .replace('\n', " ")
                    .trim()
                    .to_string();
                if content.chars().count() > 1000 {
                    preview.push_str("...");
                }
                lines.push(format!("   Content: {preview}"));
            }
        }
        if let Some(meta) = &self.metadata {
            lines.push("\nMetadata:".to_string());
            lines.push(format!("- Total results: {}", meta.total_results));
            lines.push(format!("- Language: {}", meta.language));
            lines.push(format!("- Country: {}", meta.country));
        }
        lines.join("\n")
    }

    pub fn into_tool_result(self) -> ToolResult {
        match self.error {
            Some(e) => ToolResult::failure(e),
            None => ToolResult::success(self.render_output()),
        }
    }
}

/// Structured outcome of one tool invocation.
///
/// Exactly one of `output`/`error` is meaningful per invocation. `system`
/// carries out-of-band session notices ("session has been restarted").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: Option<String>,
    pub error: Option<String>,
    pub system: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// One search provider. Adapters are polymorphic only through this capability;
/// pagination and parsing quirks stay inside each implementation.
#[async_trait::async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Collect up to `num_results` items, in upstream rank order.
    ///
    /// Transport-level failures may surface as `Err`; the orchestrator treats
    /// `Err` and an empty list identically (retry, then fall back).
    async fn perform_search(&self, query: &str, num_results: usize) -> Result<Vec<SearchItem>>;
}

/// An executable capability exposed through the dispatch contract.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-schema-shaped parameter description for the calling agent.
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult>;

    /// Function-call envelope consumed by LLM-facing callers.
    fn to_param(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            },
        })
    }
}
