//! Remote classifier clients and response handling
//!
//! - `Classifier`: the seam between the dispatcher and a provider
//! - `OpenAiClient`: OpenAI-compatible chat-completions client
//! - `TestDoubleClassifier`: deterministic offline stand-in with fault injection
//! - `prompt` / `parser`: request construction and response parsing

pub mod classifier;
pub mod error;
pub mod openai;
pub mod parser;
pub mod prompt;
pub mod test_double;

pub use classifier::{ClassifyAttempt, Classifier, Completion};
pub use error::{ClientError, ParseError};
pub use openai::{OpenAiClient, OpenAiSettings};
pub use parser::{parse_response, strip_code_fence};
pub use test_double::{CallRecord, Fault, FaultTrigger, TestDoubleClassifier};
