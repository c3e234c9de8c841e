use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::extract::html::HtmlExtractor;
use crate::extract::{ExtractError, TextExtractor};

const SYSTEM_PROMPT: &str =
    "You turn job postings into short search queries for an assessment catalog. Reply with plain text only.";

/// Condenses a job page into a search query with an OpenAI-compatible
/// chat-completions endpoint.
pub struct LlmExtractor {
    page: HtmlExtractor,
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl LlmExtractor {
    pub fn new(config: &ExtractorConfig, api_key: String) -> Result<Self, ExtractError> {
        let page = HtmlExtractor::new(config)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(4)))
            .build()
            .map_err(|e| ExtractError::Llm(e.to_string()))?;

        Ok(Self {
            page,
            client,
            endpoint: completions_endpoint(&config.llm.base_url),
            model: config.llm.model.clone(),
            api_key,
        })
    }

    fn complete(&self, prompt: &str) -> Result<String, ExtractError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        let auth = HeaderValue::from_str(&auth)
            .map_err(|_| ExtractError::Llm("invalid API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = chat_request(&self.model, prompt);
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|e| ExtractError::Llm(format!("failed to call chat completions: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ExtractError::Llm(format!("endpoint returned {status}: {text}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| ExtractError::Llm(format!("failed to parse response: {e}")))?;
        completion_text(parsed)
    }
}

impl TextExtractor for LlmExtractor {
    fn extract(&self, url: &str) -> Result<String, ExtractError> {
        let page = self.page.extract(url)?;

        log::debug!("asking {} to condense {url}", self.model);
        let query = self.complete(&query_prompt(url, &page))?;

        if query.is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(query)
    }
}

fn completions_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn query_prompt(url: &str, page: &str) -> String {
    format!(
        "Read this job posting from {url}:\n\n{page}\n\n\
         Write a natural language search query as if someone is trying to find the best \
         assessments for this role. Include the job title, key skills (technical and \
         cognitive if any), the level of the role and any time constraint mentioned. \
         Use at most 2 sentences of plain text."
    )
}

fn chat_request<'a>(model: &'a str, prompt: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        temperature: 0.0,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
    }
}

fn completion_text(response: ChatResponse) -> Result<String, ExtractError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .ok_or_else(|| ExtractError::Llm("response has no choices".to_string()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}
