//! LLM-as-judge reranking.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use retrieval_core::{
    LlmJudgeConfig, Ranking, RerankDocument, RerankScore, Reranker, Result, RetrievalError,
};

/// Score assumed when the judge omits one.
const DEFAULT_JUDGE_SCORE: f64 = 0.5;

/// A chat completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name used in logs.
    fn name(&self) -> &str;

    /// Send a single user message and return the reply text (possibly empty).
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_completion_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_completion_tokens: u32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmJudgeConfig, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::provider("llm_judge", format!("client error: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            max_completion_tokens: config.max_completion_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_completion_tokens: self.max_completion_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::provider("llm_judge", format!("HTTP error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::provider(
                "llm_judge",
                format!("API returned {status}: {body}"),
            ));
        }

        let resp: ChatResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::provider("llm_judge", format!("JSON parse error: {e}")))?;

        Ok(resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Reranker that asks a chat model to score candidates.
///
/// The judge sees at most `max_candidates` candidates, each cut to
/// `preview_chars` characters, and must answer with
/// `{"results": [{"index": int, "score": float}]}`. Replies that are empty or
/// contain no usable JSON yield [`Ranking::KeepOriginal`].
pub struct LlmJudgeReranker {
    model: Arc<dyn ChatModel>,
    max_candidates: usize,
    preview_chars: usize,
}

impl LlmJudgeReranker {
    pub fn new(model: Arc<dyn ChatModel>, config: &LlmJudgeConfig) -> Self {
        Self {
            model,
            max_candidates: config.max_candidates,
            preview_chars: config.preview_chars,
        }
    }

    fn build_prompt(&self, query: &str, documents: &[RerankDocument], top_k: usize) -> String {
        let mut documents_text = String::new();
        for doc in documents.iter().take(self.max_candidates) {
            let preview: String = doc
                .text
                .chars()
                .take(self.preview_chars)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            documents_text.push_str(&format!("\n[{}] {}...", doc.index, preview));
        }

        format!(
            r#"You are a document ranking expert. Evaluate and rank documents based on their relevance to the query.

Query: "{query}"

Documents:
{documents_text}

Task: Score each document from 0.0 to 1.0 based on relevance to the query.
Select only the top {top_k} most relevant documents.

IMPORTANT: Respond ONLY with valid JSON in this exact format:
{{"results": [{{"index": 0, "score": 0.95}}, {{"index": 2, "score": 0.8}}, {{"index": 1, "score": 0.6}}]}}

Do not include any other text, explanation, or formatting. Only the JSON object."#
        )
    }
}

#[async_trait]
impl Reranker for LlmJudgeReranker {
    fn name(&self) -> &str {
        "llm_judge"
    }

    async fn score(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_k: usize,
    ) -> Result<Ranking> {
        let prompt = self.build_prompt(query, documents, top_k);
        debug!(
            "Requesting {} judgement for {} documents",
            self.model.name(),
            documents.len()
        );

        let reply = self.model.complete(&prompt).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            warn!("{} returned empty response", self.model.name());
            return Ok(Ranking::KeepOriginal);
        }

        let Some(judgement) = parse_judgement(reply) else {
            let err = RetrievalError::parse("no JSON object in judge reply");
            warn!(
                "{}: {}",
                err,
                reply.chars().take(500).collect::<String>()
            );
            return Ok(Ranking::KeepOriginal);
        };

        let scores = judged_scores(&judgement, documents, top_k);
        if scores.is_empty() {
            return Ok(Ranking::KeepOriginal);
        }

        info!(
            "{} judged {} -> {} results",
            self.model.name(),
            documents.len(),
            scores.len()
        );
        Ok(Ranking::Scored(scores))
    }
}

/// Parse a judge reply: the whole body first, then the first balanced
/// `{...}` span inside it.
fn parse_judgement(reply: &str) -> Option<Value> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(reply) {
        return Some(value);
    }

    let span = extract_json_object(reply)?;
    match serde_json::from_str::<Value>(span) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Find the first top-level `{...}` span, honoring JSON string escapes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Turn judged items into scores: first `top_k` items, missing index reads
/// as 0, missing score as 0.5, scores clamped to [0, 1], out-of-range
/// indices dropped, repeated indices keep their first judgement, sorted
/// best first.
fn judged_scores(judgement: &Value, documents: &[RerankDocument], top_k: usize) -> Vec<RerankScore> {
    let Some(items) = judgement.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut scores: Vec<RerankScore> = items
        .iter()
        .take(top_k)
        .filter_map(|item| {
            let index = match item.get("index") {
                None => 0,
                Some(v) => usize::try_from(v.as_i64()?).ok()?,
            };
            let score = match item.get("score") {
                None => DEFAULT_JUDGE_SCORE,
                Some(Value::String(s)) => s.trim().parse::<f64>().ok()?,
                Some(v) => v.as_f64()?,
            };
            let doc = documents.get(index)?;
            if !seen.insert(doc.index) {
                return None;
            }
            Some(RerankScore {
                index: doc.index,
                relevance_score: score.clamp(0.0, 1.0) as f32,
            })
        })
        .collect();

    scores.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    scores
}
