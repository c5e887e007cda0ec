//! Answer generation - grounds a language model on retrieved chunks
//!
//! Provides:
//! - The context prompt used for every question
//! - An OpenAI-compatible chat completion provider
//! - A deterministic offline provider
//! - [`AnswerGenerator`], which applies the retry policy and never returns
//!   an empty or partial answer

use crate::config::GenerationConfig;
use crate::errors::{parse_retry_after, AppError, Result, Service};
use crate::metrics;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// System message sent with every question
pub const SYSTEM_PROMPT: &str = "You answer questions using only the provided context.";

/// A chat prompt ready to be sent to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Build the grounding prompt from the question and context texts
    pub fn grounded(question: &str, contexts: &[String]) -> Self {
        let context_block = contexts
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!(
            "Use the following context to answer the question.\n\n\
             Context:\n{}\n\n\
             Question: {}\n\
             Answer concisely using the context above.",
            context_block, question
        );

        Self {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

/// Sampling options passed with each completion
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// A single completion request against a language model
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &Prompt, options: &CompletionOptions) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// OpenAI chat completions client
pub struct OpenAIChatProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAIChatProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAIChatProvider {
    async fn complete(&self, prompt: &Prompt, options: &CompletionOptions) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::from_transport(Service::Generation, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::from_status(Service::Generation, status, retry_after, &body));
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::AnswerGeneration {
                message: format!("Failed to parse LLM response: {}", e),
                retryable: false,
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::AnswerGeneration {
                message: "Empty response from LLM".to_string(),
                retryable: true,
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline provider that answers from the first context line
pub struct MockCompletionProvider;

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(&self, prompt: &Prompt, _options: &CompletionOptions) -> Result<String> {
        let first_context = prompt
            .user
            .lines()
            .find_map(|line| line.strip_prefix("- "))
            .unwrap_or("no context");
        let question = prompt
            .user
            .lines()
            .find_map(|line| line.strip_prefix("Question: "))
            .unwrap_or_default();

        Ok(format!(
            "Regarding \"{}\": {} [offline answer - no language model configured]",
            question, first_context
        ))
    }

    fn model_name(&self) -> &str {
        "mock-completion"
    }
}

/// Retried answer generation
#[derive(Clone)]
pub struct AnswerGenerator {
    provider: Arc<dyn CompletionProvider>,
    options: CompletionOptions,
    retry: RetryPolicy,
}

impl AnswerGenerator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        options: CompletionOptions,
        retry: RetryPolicy,
    ) -> Self {
        Self { provider, options, retry }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Generate an answer to `question` grounded on `contexts`
    ///
    /// Blank completions count as a transient failure; once the retry budget
    /// is spent the error is always `AnswerGeneration`.
    pub async fn generate(&self, question: &str, contexts: &[String]) -> Result<String> {
        let prompt = Prompt::grounded(question, contexts);
        let start = Instant::now();

        let answer = self
            .retry
            .run("generate", || async {
                let text = self.provider.complete(&prompt, &self.options).await?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(AppError::AnswerGeneration {
                        message: "Language model returned an empty answer".to_string(),
                        retryable: true,
                    });
                }
                Ok(text.to_string())
            })
            .await
            .map_err(|e| match e.into_service_error(Service::Generation) {
                err @ AppError::AnswerGeneration { .. } => err,
                other => AppError::AnswerGeneration {
                    message: other.to_string(),
                    retryable: false,
                },
            })?;

        metrics::record_generation(start.elapsed().as_secs_f64(), self.model_name());
        Ok(answer)
    }
}

/// Create an answer generator based on configuration
pub fn create_generator(config: &GenerationConfig, retry: RetryPolicy) -> Result<AnswerGenerator> {
    let provider: Arc<dyn CompletionProvider> = match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "generation.api_key is required for the openai provider".to_string(),
            })?;
            Arc::new(OpenAIChatProvider::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                retry.call_timeout(),
            )?)
        }
        "mock" => Arc::new(MockCompletionProvider),
        other => {
            return Err(AppError::Configuration {
                message: format!("unknown generation provider '{}'", other),
            })
        }
    };

    let options = CompletionOptions {
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    };
    Ok(AnswerGenerator::new(provider, options, retry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_secs(1),
        )
    }

    /// Replies with the queued answers, one per call
    struct ScriptedProvider {
        replies: Vec<Result<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self { replies, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, _prompt: &Prompt, _options: &CompletionOptions) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(call) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(_)) | None => Err(AppError::AnswerGeneration {
                    message: "upstream 503".to_string(),
                    retryable: true,
                }),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_prompt_lists_contexts() {
        let prompt = Prompt::grounded(
            "Who wrote it?",
            &["Alice wrote it.".to_string(), "Bob edited it.".to_string()],
        );
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.user.contains("- Alice wrote it.\n\n- Bob edited it."));
        assert!(prompt.user.contains("Question: Who wrote it?\n"));
        assert!(prompt.user.ends_with("Answer concisely using the context above."));
    }

    #[tokio::test]
    async fn test_blank_answer_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("   ".to_string()),
            Ok(" Alice wrote it. ".to_string()),
        ]));
        let generator = AnswerGenerator::new(provider.clone(), CompletionOptions::default(), fast_retry());

        let answer = generator.generate("Who wrote it?", &["Alice wrote it.".to_string()]).await.unwrap();
        assert_eq!(answer, "Alice wrote it.");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_generation_has_no_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let generator = AnswerGenerator::new(provider.clone(), CompletionOptions::default(), fast_retry());

        let err = generator.generate("q", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::AnswerGeneration { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_quotes_first_context() {
        let generator = AnswerGenerator::new(
            Arc::new(MockCompletionProvider),
            CompletionOptions::default(),
            fast_retry(),
        );
        let answer = generator
            .generate("What powers the station?", &["Solar panels power the station.".to_string()])
            .await
            .unwrap();
        assert!(answer.contains("Solar panels power the station."));
        assert!(answer.contains("What powers the station?"));
    }
}
