//! Categorization prompt construction

use ideacat_core::{ChatMessage, Item};
use serde_json::{Value, json};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for categorizing startup ideas.";

/// One item exactly as it appears inside the prompt
pub fn render_item(item: &Item) -> String {
    format!("{:#}", item_value(item))
}

pub fn render_batch(items: &[Item]) -> String {
    format!("{:#}", Value::Array(items.iter().map(item_value).collect()))
}

fn item_value(item: &Item) -> Value {
    json!({ "_id": item.id, "text": item.text })
}

/// System + user messages for one batch.
///
/// Called with an empty slice this yields the fixed prompt overhead.
pub fn build_messages(categories: &[String], items: &[Item]) -> Vec<ChatMessage> {
    let category_list = Value::Array(categories.iter().map(|c| json!(c)).collect());

    let user = format!(
        "You are an expert startup idea categorizer. \
         Categorize each of the following ideas into one of the given categories.\n\n\
         Categories: {}\n\n\
         Do not create additional categories outside of the given list. \
         For each idea, return an object with the original '_id', and an additional field \
         'category' indicating the chosen category. \
         Return your answer as a JSON array of objects with the following structure:\n\
         {{ \"_id\": original id, \"category\": chosen category }}\n\n\
         Here are the ideas:\n{}",
        category_list,
        render_batch(items)
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}
