//! Confirmation classifiers.
//!
//! The engine only needs a two-valued answer to "did the user just confirm
//! this intent?". Anything that is not an unambiguous confirmation, including
//! errors from a remote classifier, is folded into `Decision::NotConfirmed`.

use crate::intent::Intent;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Outcome of classifying one utterance against an expected intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Confirmed,
    NotConfirmed,
}

/// Maps free text to a confirmation decision for a given intent.
///
/// `question` is the prompt the user is answering: the intent's confirmation
/// prompt, or its offer prompt when the user is replying to the clarifying
/// question.
///
/// Implementations must never fail: ambiguity and internal errors both
/// resolve to `Decision::NotConfirmed`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UtteranceClassifier: Send + Sync {
    async fn classify(&self, utterance: &str, intent: &Intent, question: &str) -> Decision;
}

/// Phrases accepted by `KeywordClassifier` when none are configured.
pub const DEFAULT_CONFIRMATIONS: &[&str] = &[
    "yes",
    "yes please",
    "go ahead",
    "proceed",
    "that's correct",
];

/// Deterministic classifier that accepts a fixed set of confirmation phrases.
///
/// Comparison is case-insensitive, ignores surrounding whitespace and
/// trailing punctuation, and treats runs of whitespace as a single space.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    phrases: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATIONS.iter().copied())
    }
}

impl KeywordClassifier {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| canonical(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_confirmation(&self, utterance: &str) -> bool {
        let text = canonical(utterance);
        !text.is_empty() && self.phrases.iter().any(|p| *p == text)
    }
}

#[async_trait]
impl UtteranceClassifier for KeywordClassifier {
    async fn classify(&self, utterance: &str, _intent: &Intent, _question: &str) -> Decision {
        if self.is_confirmation(utterance) {
            Decision::Confirmed
        } else {
            Decision::NotConfirmed
        }
    }
}

fn canonical(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace('\u{2019}', "'")
}

/// System prompt used by `LLMClassifier` when no template is supplied.
///
/// `{intent}` and `{question}` are substituted before the request is sent.
pub const DEFAULT_CLASSIFIER_PROMPT: &str = "\
You decide whether the user explicitly confirmed that they want you to {intent}.
The user was just asked: \"{question}\"
Accept only explicit confirmations like \"yes\", \"yes please\", \"go ahead\", \"proceed\", or \"that's correct\".
Anything that is not an unambiguous confirmation is NOT a confirmation.
Answer with exactly one word: CONFIRMED or NOT_CONFIRMED.";

/// Classifier backed by an OpenAI-compatible chat completion API.
pub struct LLMClassifier {
    client: Client<OpenAIConfig>,
    model: String,
    prompt_template: String,
}

impl LLMClassifier {
    /// Creates a classifier for the given model.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the OpenAI-compatible service.
    /// * `model` - Model identifier used for the completion (e.g. "gpt-4o").
    /// * `prompt_template` - System prompt; falls back to `DEFAULT_CLASSIFIER_PROMPT`.
    pub fn new(config: OpenAIConfig, model: String, prompt_template: Option<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompt_template: prompt_template
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_PROMPT.to_string()),
        }
    }

    fn system_prompt(&self, intent: &Intent, question: &str) -> String {
        self.prompt_template
            .replace("{intent}", &intent.description)
            .replace("{question}", question)
    }

    async fn ask(&self, utterance: &str, intent: &Intent, question: &str) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0_f32)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.system_prompt(intent, question))
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(utterance.to_string())
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let answer = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No content in LLM response"))?;
        Ok(answer)
    }
}

/// Interprets a model answer; only a leading `CONFIRMED` counts.
pub fn parse_decision(answer: &str) -> Decision {
    let answer = answer.trim().trim_matches(['"', '\'', '`', '.']).to_uppercase();
    if answer.starts_with("CONFIRMED") {
        Decision::Confirmed
    } else {
        Decision::NotConfirmed
    }
}

#[async_trait]
impl UtteranceClassifier for LLMClassifier {
    async fn classify(&self, utterance: &str, intent: &Intent, question: &str) -> Decision {
        if utterance.trim().is_empty() {
            return Decision::NotConfirmed;
        }
        match self.ask(utterance, intent, question).await {
            Ok(answer) => {
                let decision = parse_decision(&answer);
                debug!(intent = %intent.id, ?decision, "LLM classified utterance");
                decision
            }
            Err(e) => {
                warn!(intent = %intent.id, error = ?e, "LLM classification failed; treating as not confirmed");
                Decision::NotConfirmed
            }
        }
    }
}
