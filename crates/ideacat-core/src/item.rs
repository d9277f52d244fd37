//! Item and batch domain models

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// A free-text record to be categorized.
///
/// Input files in the wild use `_id`/`id` for the identifier and
/// `text`/`title` for the payload, so both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "_id", alias = "id", deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(alias = "title", default)]
    pub text: String,
}

impl Item {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Ids are opaque; numeric ids are kept as their decimal string.
fn opaque_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {}",
            other
        ))),
    }
}

/// One classifier label assigned to one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizedItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub category: String,
}

/// An ordered, non-empty group of items sent in one request.
///
/// `number` is 1-based and unique within a run; retry rounds keep counting
/// from where the previous round stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub number: u64,
    pub round: u32,
    pub items: Vec<Item>,
    pub estimated_prompt_tokens: usize,
    pub estimated_completion_tokens: usize,
}

impl Batch {
    pub fn new(number: u64, round: u32, items: Vec<Item>) -> Self {
        Self {
            number,
            round,
            items,
            estimated_prompt_tokens: 0,
            estimated_completion_tokens: 0,
        }
    }

    pub fn with_estimates(mut self, prompt_tokens: usize, completion_tokens: usize) -> Self {
        self.estimated_prompt_tokens = prompt_tokens;
        self.estimated_completion_tokens = completion_tokens;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn estimated_total_tokens(&self) -> usize {
        self.estimated_prompt_tokens + self.estimated_completion_tokens
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }
}

/// Reject inputs the dispatcher cannot reconcile by id
pub fn validate_items(items: &[Item]) -> Result<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        if item.id.is_empty() {
            return Err(Error::EmptyItemId(idx));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(Error::DuplicateItemId(item.id.clone()));
        }
    }
    Ok(())
}

pub fn validate_categories(categories: &[String]) -> Result<()> {
    if categories.iter().all(|c| c.trim().is_empty()) {
        return Err(Error::EmptyCategories);
    }
    Ok(())
}
