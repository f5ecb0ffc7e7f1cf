//! Deep research: a single LLM-backed call used in place of multi-source
//! fan-out for interrogative queries.
//!
//! Talks to an OpenAI-compatible chat completions endpoint. A missing API
//! key disables only this path; startup is unaffected.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ResearchConfig;
use crate::models::{CandidateItem, ResearchArtifact};
use crate::services::cost_ledger::CostLedger;
use crate::services::sources::SourceError;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s\)\]>]+").expect("valid url regex"));

/// Instruction per research depth level (1 = brief ... 6 = exhaustive)
const DEPTH_INSTRUCTIONS: [&str; 6] = [
    "Provide a brief overview suitable for a general audience. Keep it concise and accessible.",
    "Provide a clear explanation with key facts and context. Suitable for a general audience.",
    "Provide comprehensive information with historical context and multiple perspectives. \
     Include specific examples.",
    "Provide detailed analysis with historical context, multiple perspectives, and expert \
     insights.",
    "Provide expert-level investigation with academic rigor. Explore complex relationships \
     and nuances.",
    "Provide exhaustive expert-level research with academic rigor, complex relationships, \
     and scholarly depth.",
];

pub struct DeepResearchService {
    http_client: Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    cost_per_call: f64,
    ledger: Arc<CostLedger>,
}

impl DeepResearchService {
    pub fn new(config: &ResearchConfig, ledger: Arc<CostLedger>) -> Self {
        let api_key = std::env::var(&config.key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "Deep research disabled: env var {} is not set",
                config.key_env
            );
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            cost_per_call: 0.005,
            ledger,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn cost_per_call(&self) -> f64 {
        self.cost_per_call
    }

    /// Run one research call and parse the structured artifact.
    pub async fn research_question(
        &self,
        question: &str,
        depth_level: u8,
        focus_areas: &[String],
        owner_id: Option<i64>,
    ) -> Result<ResearchArtifact, SourceError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| SourceError::AuthFailure("research API key not configured".into()))?;

        let prompt = build_research_prompt(question, depth_level, focus_areas);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a meticulous research assistant. Structure your answer \
                              with an Overview section, a Key Findings list, a detailed \
                              explanation, and a Conclusion. Cite sources with URLs."
                        .to_string(),
                },
                ChatMessage { role: "user".to_string(), content: prompt },
            ],
            temperature: Some(0.2),
        };

        let url = format!("{}/chat/completions", self.api_base);
        tracing::debug!("Deep research call: {} model={}", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Transport(format!(
                        "research timeout after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    SourceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(SourceError::RateLimitedUpstream(retry_after));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SourceError::AuthFailure(format!("HTTP {}", status.as_u16())));
        }
        if status.is_server_error() {
            self.ledger.track("deep_research", self.cost_per_call, owner_id, "question", false);
            return Err(SourceError::Upstream(status.as_u16()));
        }
        if !status.is_success() {
            return Err(SourceError::Rejected(status.as_u16()));
        }

        // The upstream answered; the call is paid regardless of parse outcome
        self.ledger.track("deep_research", self.cost_per_call, owner_id, "question", true);

        let chat: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| SourceError::ParseFailure(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| SourceError::ParseFailure("empty research response".to_string()))?;

        Ok(parse_research_response(content))
    }

    /// Wrap the artifact as a single candidate for normal scoring.
    pub fn to_candidate(&self, question: &str, artifact: &ResearchArtifact) -> CandidateItem {
        let description = if artifact.overview.is_empty() {
            artifact.detailed_body.chars().take(600).collect()
        } else {
            artifact.overview.clone()
        };

        CandidateItem {
            fingerprint: CandidateItem::compute_fingerprint(question, "deep_research", None),
            title: question.to_string(),
            description: Some(description),
            source_name: "deep_research".to_string(),
            source_authority: "research".to_string(),
            media: Vec::new(),
            url: artifact.sources.first().cloned(),
            date: None,
            location: None,
            topics: Vec::new(),
            raw: serde_json::to_value(artifact).unwrap_or(serde_json::Value::Null),
        }
    }
}

fn build_research_prompt(question: &str, depth_level: u8, focus_areas: &[String]) -> String {
    let depth = depth_level.clamp(1, 6);
    let instruction = DEPTH_INSTRUCTIONS[(depth - 1) as usize];

    let mut prompt = format!("Research question: {}\n\n{}", question, instruction);
    if !focus_areas.is_empty() {
        prompt.push_str(&format!("\n\nFocus particularly on: {}.", focus_areas.join(", ")));
    }
    prompt
}

/// Split the free-form answer into the structured artifact by section
/// headings; everything stays available through `detailed_body`.
fn parse_research_response(content: &str) -> ResearchArtifact {
    let mut overview = String::new();
    let mut key_findings = Vec::new();
    let mut conclusion = String::new();

    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Overview,
        Findings,
        Body,
        Conclusion,
    }
    let mut section = Section::Preamble;

    for line in content.lines() {
        let trimmed = line.trim();
        let heading = trimmed.trim_start_matches(['#', '*', ' ']).trim_end_matches([':', '*']);

        match heading.to_lowercase().as_str() {
            "overview" | "introduction" | "summary" => {
                section = Section::Overview;
                continue;
            },
            "key findings" | "findings" | "highlights" => {
                section = Section::Findings;
                continue;
            },
            "conclusion" | "in conclusion" => {
                section = Section::Conclusion;
                continue;
            },
            "details" | "detailed explanation" | "analysis" | "background" => {
                section = Section::Body;
                continue;
            },
            _ => {},
        }

        if trimmed.is_empty() {
            continue;
        }

        match section {
            Section::Preamble => {
                // First prose paragraph doubles as the overview
                if overview.is_empty() {
                    overview = trimmed.to_string();
                }
            },
            Section::Overview => {
                if !overview.is_empty() {
                    overview.push(' ');
                }
                overview.push_str(trimmed);
            },
            Section::Findings => {
                let finding = trimmed.trim_start_matches(['-', '*', '•', ' ']).trim();
                let finding = finding
                    .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                    .trim();
                if !finding.is_empty() {
                    key_findings.push(finding.to_string());
                }
            },
            Section::Conclusion => {
                if !conclusion.is_empty() {
                    conclusion.push(' ');
                }
                conclusion.push_str(trimmed);
            },
            Section::Body => {},
        }
    }

    let sources = extract_citations(content);
    let confidence = research_confidence(content, sources.len());

    ResearchArtifact {
        overview,
        key_findings,
        detailed_body: content.to_string(),
        conclusion,
        sources,
        confidence,
    }
}

fn extract_citations(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    URL_RE
        .find_iter(content)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .filter(|url| seen.insert(url.clone()))
        .take(20)
        .collect()
}

/// Confidence from answer length and citation count, in [0.3, 0.95].
fn research_confidence(content: &str, source_count: usize) -> f64 {
    let mut confidence: f64 = 0.5;
    if content.len() > 2000 {
        confidence += 0.15;
    } else if content.len() > 800 {
        confidence += 0.1;
    } else if content.len() < 200 {
        confidence -= 0.2;
    }
    confidence += (source_count as f64 * 0.05).min(0.3);
    confidence.clamp(0.3, 0.95)
}

// ============================================================================
// Chat API request/response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
