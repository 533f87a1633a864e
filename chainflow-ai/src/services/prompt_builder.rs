//! Prompts for the generative phases

use crate::types::{Chain, ChainAssessment, Message, Phase, PhasePayload};

const RESPONSE_SCHEMA: &str = r#"{"classification": string, "category": string, "entities": [string], "confidence": number between 0 and 1, "risk_assessment": string, "action_items": [string], "rationale": string}"#;

/// Most recent chain messages included as Phase 3 context
const CONTEXT_MESSAGES: usize = 8;
const CONTEXT_CHARS_PER_MESSAGE: usize = 400;

/// Phase 2: enhance the rule-based result for one message
pub fn phase2_prompt(message: &Message, baseline: &PhasePayload) -> String {
    let mut prompt = String::with_capacity(1024 + message.content.len());
    prompt.push_str(
        "You analyze business correspondence. Improve the rule-based analysis of the message below.\n",
    );
    push_message(&mut prompt, message);
    push_baseline(&mut prompt, baseline);
    push_instructions(&mut prompt);
    prompt
}

/// Phase 3: deep analysis of a message in the context of its complete chain
pub fn phase3_prompt(
    message: &Message,
    chain: &Chain,
    assessment: &ChainAssessment,
    previous: &PhasePayload,
) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(
        "You analyze business correspondence. The conversation below is complete (opened, progressed and closed).\n",
    );
    prompt.push_str(&format!(
        "Conversation type: {}. Messages: {}. Completeness: {:.2}.\n\n",
        assessment.chain_type.as_str(),
        assessment.message_count,
        assessment.completeness_score
    ));

    prompt.push_str("Conversation history (oldest first):\n");
    let skip = chain.messages.len().saturating_sub(CONTEXT_MESSAGES);
    for m in chain.messages.iter().skip(skip) {
        let excerpt: String = m.content.chars().take(CONTEXT_CHARS_PER_MESSAGE).collect();
        prompt.push_str(&format!("- [{}] {}: {}\n", m.timestamp.to_rfc3339(), m.sender, excerpt));
    }
    prompt.push('\n');

    push_message(&mut prompt, message);
    push_baseline(&mut prompt, previous);
    prompt.push_str(
        "Assess risks and required actions for this message given how the conversation unfolded.\n",
    );
    push_instructions(&mut prompt);
    prompt
}

pub fn prompt_for(
    phase: Phase,
    message: &Message,
    chain: &Chain,
    assessment: &ChainAssessment,
    previous: &PhasePayload,
) -> String {
    match phase {
        Phase::Three => phase3_prompt(message, chain, assessment, previous),
        _ => phase2_prompt(message, previous),
    }
}

fn push_message(prompt: &mut String, message: &Message) {
    prompt.push_str(&format!(
        "Message from {} (subject: {}):\n\"\"\"\n{}\n\"\"\"\n\n",
        message.sender, message.subject, message.content
    ));
}

fn push_baseline(prompt: &mut String, baseline: &PhasePayload) {
    prompt.push_str(&format!(
        "Rule-based analysis: classification \"{}\", category \"{}\", entities [{}], high priority: {}.\n\n",
        baseline.classification,
        baseline.category,
        baseline.entities.join(", "),
        baseline.high_priority
    ));
}

fn push_instructions(prompt: &mut String) {
    prompt.push_str("Respond with a single JSON object and nothing else, matching:\n");
    prompt.push_str(RESPONSE_SCHEMA);
    prompt.push('\n');
}
