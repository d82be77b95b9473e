//! Question sourcing: AI generation with the bank as mandatory fallback.
//!
//! Generation talks to a chat-completions endpoint with a JSON-only prompt,
//! rotating across configured models and excluding recently served prompts.
//! Any failure, from transport to schema, falls back to the built-in bank.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::bank::{QuestionBank, DEFAULT_ENABLED_CATEGORIES};
use super::{Question, QuestionCategory};

const RECENT_PROMPT_MEMORY: usize = 10;
const GENERATION_MAX_TOKENS: u32 = 150;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub ai_enabled: bool,
    pub endpoint: String,
    pub models: Vec<String>,
    pub request_timeout: Duration,
    pub enabled_categories: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            models: vec![
                "meta-llama/llama-3.3-70b-instruct".to_string(),
                "google/gemini-2.0-flash-001".to_string(),
            ],
            request_timeout: Duration::from_secs(15),
            enabled_categories: DEFAULT_ENABLED_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

pub struct QuestionProvider {
    client: reqwest::Client,
    config: GeneratorConfig,
    bank: Mutex<QuestionBank>,
    recent_prompts: Mutex<VecDeque<String>>,
}

impl QuestionProvider {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            bank: Mutex::new(QuestionBank::new()),
            recent_prompts: Mutex::new(VecDeque::new()),
        }
    }

    /// Next question to pose. Never fails: generation errors degrade to the
    /// bank, and an empty category selection degrades to the defaults.
    pub async fn next_question(&self) -> Question {
        if self.config.ai_enabled {
            match self.generate().await {
                Ok(question) => return question,
                Err(err) => {
                    log::warn!("question generation failed, using bank: {err:#}");
                }
            }
        }
        self.from_bank()
    }

    pub fn from_bank(&self) -> Question {
        let mut bank = self.bank.lock().unwrap();
        if let Some(q) = bank.pick(&self.config.enabled_categories) {
            return q;
        }
        let defaults: Vec<String> = DEFAULT_ENABLED_CATEGORIES
            .iter()
            .map(|c| c.to_string())
            .collect();
        bank.pick(&defaults)
            .unwrap_or_else(|| fallback_question())
    }

    async fn generate(&self) -> Result<Question> {
        let category = self
            .pick_category()
            .ok_or_else(|| anyhow!("no category enabled for generation"))?;
        let model = self
            .config
            .models
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| anyhow!("no generation model configured"))?
            .clone();

        let prompt = self.build_prompt(&category);
        let payload = json!({
            "model": model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a question generator. Respond only with valid JSON. \
                                No markdown, no explanations, no extra text.",
                },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": GENERATION_MAX_TOKENS,
            "temperature": 0.9,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.request_timeout)
            .json(&payload)
            .send()
            .await
            .context("question generation request failed")?
            .error_for_status()
            .context("question generation returned an error status")?;

        let body: ChatCompletion = response
            .json()
            .await
            .context("question generation response was not valid JSON")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("question generation returned no choices"))?;

        let question = parse_generated(content, &category.id)?;
        self.remember_prompt(&question.prompt);
        Ok(question)
    }

    fn pick_category(&self) -> Option<QuestionCategory> {
        let enabled: Vec<QuestionCategory> = super::bank::categories()
            .into_iter()
            .filter(|c| self.config.enabled_categories.iter().any(|e| *e == c.id))
            .collect();
        enabled.choose(&mut rand::thread_rng()).cloned()
    }

    fn build_prompt(&self, category: &QuestionCategory) -> String {
        let recent = self.recent_prompts.lock().unwrap();
        let exclusions = if recent.is_empty() {
            String::new()
        } else {
            let listed: Vec<String> = recent.iter().map(|p| format!("- {p}")).collect();
            format!(
                "\nAvoid creating questions similar to these recent ones:\n{}\n",
                listed.join("\n")
            )
        };
        format!(
            "Create an intermediate-level multiple-choice question about {}: {}.\n\n\
             Requirements:\n\
             - Educational and factual\n\
             - Clear, unambiguous question\n\
             - Exactly 4 distinct options\n\
             - Only one correct answer\n\
             - Must be different from recent questions{exclusions}\n\
             Response format: ONLY valid JSON, no markdown, no explanation:\n\n\
             {{\"question\":\"What is the capital of France?\",\
             \"options\":[\"London\",\"Paris\",\"Berlin\",\"Madrid\"],\
             \"correct_answer\":\"Paris\"}}",
            category.name, category.description
        )
    }

    fn remember_prompt(&self, prompt: &str) {
        let mut recent = self.recent_prompts.lock().unwrap();
        recent.push_back(prompt.to_string());
        while recent.len() > RECENT_PROMPT_MEMORY {
            recent.pop_front();
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct GeneratedQuestion {
    question: String,
    options: Vec<String>,
    correct_answer: String,
}

/// Strips incidental markdown code fencing the model may wrap around its
/// JSON-only reply.
pub(crate) fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn parse_generated(content: &str, category_id: &str) -> Result<Question> {
    let cleaned = strip_code_fences(content);
    let generated: GeneratedQuestion =
        serde_json::from_str(&cleaned).context("generated question was not the expected JSON")?;

    if generated.options.len() != 4 {
        bail!("generated question had {} options", generated.options.len());
    }
    let distinct: std::collections::HashSet<&String> = generated.options.iter().collect();
    if distinct.len() != generated.options.len() {
        bail!("generated question had duplicate options");
    }
    if !generated
        .options
        .iter()
        .any(|o| o.trim().eq_ignore_ascii_case(generated.correct_answer.trim()))
    {
        bail!("generated correct answer was not among the options");
    }

    Ok(Question {
        id: format!("ai_{category_id}_{}", Uuid::new_v4()),
        category_id: category_id.to_string(),
        prompt: generated.question,
        options: generated.options,
        correct_answer: generated.correct_answer,
    })
}

fn fallback_question() -> Question {
    Question {
        id: "fallback".into(),
        category_id: "gk".into(),
        prompt: "Which planet is known as the Red Planet?".into(),
        options: vec!["Venus".into(), "Mars".into(), "Jupiter".into(), "Saturn".into()],
        correct_answer: "Mars".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_generation_output() {
        let content = "```json\n{\"question\":\"Q?\",\
                       \"options\":[\"a\",\"b\",\"c\",\"d\"],\
                       \"correct_answer\":\"b\"}\n```";
        let q = parse_generated(content, "gk").unwrap();
        assert_eq!(q.prompt, "Q?");
        assert!(q.is_correct("b"));
        assert_eq!(q.category_id, "gk");
    }

    #[test]
    fn rejects_wrong_option_counts_and_missing_answer() {
        let missing = "{\"question\":\"Q?\",\"options\":[\"a\",\"b\",\"c\",\"d\"],\
                       \"correct_answer\":\"e\"}";
        assert!(parse_generated(missing, "gk").is_err());

        let short = "{\"question\":\"Q?\",\"options\":[\"a\",\"b\"],\"correct_answer\":\"a\"}";
        assert!(parse_generated(short, "gk").is_err());

        let dupes = "{\"question\":\"Q?\",\"options\":[\"a\",\"a\",\"c\",\"d\"],\
                     \"correct_answer\":\"a\"}";
        assert!(parse_generated(dupes, "gk").is_err());
    }

    #[tokio::test]
    async fn disabled_generation_serves_from_bank() {
        let provider = QuestionProvider::new(GeneratorConfig {
            ai_enabled: false,
            endpoint: "http://unused.invalid".into(),
            models: vec![],
            request_timeout: Duration::from_secs(1),
            enabled_categories: vec!["maths".into()],
        });
        let q = provider.next_question().await;
        assert_eq!(q.category_id, "maths");
    }

    #[tokio::test]
    async fn empty_category_selection_degrades_to_defaults() {
        let provider = QuestionProvider::new(GeneratorConfig {
            ai_enabled: false,
            endpoint: "http://unused.invalid".into(),
            models: vec![],
            request_timeout: Duration::from_secs(1),
            enabled_categories: vec![],
        });
        let q = provider.next_question().await;
        assert!(!q.prompt.is_empty());
    }
}
