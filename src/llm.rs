//! Answer synthesis through an OpenAI-compatible chat completions endpoint.

use reqwest::{blocking::Client, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    http,
};

pub const MAX_ANSWER_TOKENS: usize = 1000;
pub const ANSWER_TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = "You are a knowledgeable assistant for a university, \
familiar with campus life, academics, and student services.

Write answers that are:
- detailed, usually 200 to 400 words
- organized into short sections when that helps
- specific, quoting names, numbers, and places from the context
- friendly but professional

Base every claim on the provided context and say so when the context is thin \
or may be out of date.";

/// Produces an answer from a question and retrieved context.
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    fn try_generate(&self, query: &str, context: &str) -> Result<String>;

    /// Never fails: upstream errors become a short message naming the cause.
    fn generate(&self, query: &str, context: &str) -> String {
        match self.try_generate(query, context) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("answer generation failed: {e}");
                format!("Error generating answer: {e}")
            }
        }
    }
}

/// The user turn sent alongside [`SYSTEM_PROMPT`].
pub fn user_prompt(query: &str, context: &str) -> String {
    format!(
        "Answer the question below using the context, which comes from \
university web pages and student forums.

Context:
{context}

Question: {query}

Structure the answer as:
1. A direct answer to the question
2. Supporting details and examples drawn from the context
3. Practical next steps, where they apply
4. Caveats, including information that may be stale

Answer:"
    )
}

pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl OpenAiChat {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_openai_key()?;
        let bearer = format!("Bearer {}", api_key.trim());
        Ok(Self {
            client: http::build_client(config.request_timeout, Some((AUTHORIZATION, &bearer)))?,
            endpoint: http::endpoint(&config.openai_base_url, "chat/completions"),
            model: config.llm_model.clone(),
            max_retries: config.max_retries,
        })
    }
}

impl AnswerGenerator for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn try_generate(&self, query: &str, context: &str) -> Result<String> {
        let prompt = user_prompt(query, context);
        let body = ChatRequest {
            model: &self.model,
            temperature: ANSWER_TEMPERATURE,
            max_tokens: MAX_ANSWER_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };
        let resp = http::send_with_retry("chat", self.max_retries, || {
            self.client.post(&self.endpoint).json(&body)
        })?;
        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| Error::Generation(format!("malformed chat response: {e}")))?;
        first_answer(parsed)
    }
}

fn first_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| Error::Generation("model returned no answer".to_string()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
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
    content: Option<String>,
}
