//! JSON ingestion adapter
//!
//! Accepts either a flat array of messages or an object `{"messages": [...]}`
//! and groups messages into chains by their correlation key.

use crate::types::{Chain, Message};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum InputDocument {
    Flat(Vec<Message>),
    Wrapped { messages: Vec<Message> },
}

/// Load and group messages from a JSON file
pub fn load_chains(path: &Path) -> Result<Vec<Chain>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    parse_chains(&raw).with_context(|| format!("Failed to parse input file {}", path.display()))
}

pub fn parse_chains(raw: &str) -> Result<Vec<Chain>> {
    let document: InputDocument = serde_json::from_str(raw)?;
    let messages = match document {
        InputDocument::Flat(messages) | InputDocument::Wrapped { messages } => messages,
    };
    group_into_chains(messages)
}

/// Group by `chain_id`; message ids must be unique across the batch
pub fn group_into_chains(messages: Vec<Message>) -> Result<Vec<Chain>> {
    let mut seen = std::collections::HashSet::new();
    let mut grouped: BTreeMap<String, Vec<Message>> = BTreeMap::new();

    for message in messages {
        if message.message_id.trim().is_empty() {
            bail!("message with empty message_id in chain {:?}", message.chain_id);
        }
        if message.chain_id.trim().is_empty() {
            bail!("message {} has an empty chain_id", message.message_id);
        }
        if !seen.insert(message.message_id.clone()) {
            bail!("duplicate message_id {}", message.message_id);
        }
        grouped.entry(message.chain_id.clone()).or_default().push(message);
    }

    Ok(grouped
        .into_iter()
        .map(|(chain_id, messages)| Chain::new(chain_id, messages))
        .collect())
}
