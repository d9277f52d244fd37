use std::sync::Arc;

use ideacat_core::ChatMessage;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::{Result, TokenError};

/// BPE encoding used by a model family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// GPT-4, GPT-3.5-turbo
    #[default]
    Cl100kBase,
    /// GPT-4o family
    O200kBase,
}

/// Chat-formatting overhead added on top of the raw content tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOverhead {
    #[serde(default = "default_per_message")]
    pub per_message: usize,
    #[serde(default = "default_per_key")]
    pub per_key: usize,
    /// Tokens priming the assistant reply
    #[serde(default = "default_reply_priming")]
    pub reply_priming: usize,
}

impl Default for MessageOverhead {
    fn default() -> Self {
        Self {
            per_message: default_per_message(),
            per_key: default_per_key(),
            reply_priming: default_reply_priming(),
        }
    }
}

fn default_per_message() -> usize {
    3
}

fn default_per_key() -> usize {
    1
}

fn default_reply_priming() -> usize {
    3
}

/// Linear model of the classifier's response size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEstimate {
    #[serde(default = "default_base_tokens")]
    pub base_tokens: usize,
    #[serde(default = "default_tokens_per_item")]
    pub tokens_per_item: usize,
}

impl Default for ResponseEstimate {
    fn default() -> Self {
        Self {
            base_tokens: default_base_tokens(),
            tokens_per_item: default_tokens_per_item(),
        }
    }
}

fn default_base_tokens() -> usize {
    20
}

fn default_tokens_per_item() -> usize {
    25
}

/// Token estimator backed by tiktoken
pub struct TokenEstimator {
    bpe: Arc<CoreBPE>,
    overhead: MessageOverhead,
    response: ResponseEstimate,
}

impl TokenEstimator {
    pub fn new(encoding: Encoding) -> Result<Self> {
        let bpe = match encoding {
            Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            Encoding::O200kBase => tiktoken_rs::o200k_base(),
        }
        .map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(Self {
            bpe: Arc::new(bpe),
            overhead: MessageOverhead::default(),
            response: ResponseEstimate::default(),
        })
    }

    pub fn with_overhead(mut self, overhead: MessageOverhead) -> Self {
        self.overhead = overhead;
        self
    }

    pub fn with_response_estimate(mut self, response: ResponseEstimate) -> Self {
        self.response = response;
        self
    }

    /// Count tokens for a single string
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Prompt size of a chat request, including formatting overhead.
    ///
    /// Every message carries two keys (role and content).
    pub fn estimate_message_tokens(&self, messages: &[ChatMessage]) -> usize {
        let per_message: usize = messages
            .iter()
            .map(|message| {
                self.overhead.per_message
                    + self.count_tokens(message.role.as_str())
                    + self.count_tokens(&message.content)
                    + 2 * self.overhead.per_key
            })
            .sum();

        per_message + self.overhead.reply_priming
    }

    pub fn estimate_response_tokens(&self, item_count: usize) -> usize {
        self.response.base_tokens + item_count * self.response.tokens_per_item
    }
}
