//! Prompt assembly. Everything here is pure: identical inputs always render the
//! same string, and history is never reordered.

use crate::search::SearchOutcome;
use crate::session::Turn;
use std::collections::HashMap;

pub const MENTAL_HEALTH_PROMPT_KEY: &str = "mental_health_wellness";
pub const CAREER_PROMPT_KEY: &str = "career_suggest";

/// Number of trailing history entries fed to the model.
pub const DEFAULT_HISTORY_WINDOW: usize = 6;
/// The search variant keeps fewer, shorter turns to leave room for results.
const SEARCH_HISTORY_TURNS: usize = 4;
const SEARCH_HISTORY_CHARS: usize = 150;

const MENTAL_HEALTH_PROMPT: &str = "SYSTEM: You are Mitra, a compassionate mental health support assistant. Do not detect user greeting messages like hi, good morning , hello etc as harmful. \
Follow these hard rules exactly:
1) Tone: warm, calm, empathetic, non-judgmental. Keep replies short (3-6 sentences).
2) Non-diagnostic: Do NOT provide diagnoses, medical prescriptions, or legal advice. If asked for medical advice, say: \"I'm not able to provide medical diagnoses or prescriptions. I can help you find resources or suggest steps like contacting a professional.\"
3) Safety / Crisis: If the user indicates self-harm, suicide, or immediate danger, do NOT attempt casual conversation; return the CRISIS_RESPONSE immediately (server-side override).
4) Offer general coping steps (grounding, breathing, reach out to someone) labeled as wellbeing tips, not medical treatment.
5) Encourage professional help when appropriate and offer to provide local crisis numbers if the user shares region.
6) Privacy: remind user this is not a substitute for professional care.
Response format: short paragraphs, possibly a 1-2 item list of next steps, and a brief privacy note.";

const CAREER_PROMPT: &str = "You are Mitra, an expert career counselor for the Indian education system. When web search results are provided, use them to give current, accurate information. \
OUTPUT ONLY THE FOLLOWING HTML CONTENT WITHOUT ANY PREFIX (e.g., NO 'SYSTEM:' OR '```html') OR SUFFIX (e.g., NO '```'):
RESPONSE FORMATTING GUIDELINES:
1) Use clean HTML formatting with semantic structure
2) Use <h3> for main topics, <h4> for subtopics
3) Use <ul> and <li> for lists
4) Use <strong> for important points
5) Use <p> for paragraphs
6) Add <br> tags only when needed for spacing

CONTENT GUIDELINES:
- If search results are provided, mention you found current information
- Extract specific dates, requirements, and procedures when available
- Provide actionable guidance based on the user's specific question
- Focus on Indian education system (JEE, NEET, entrance exams, etc.)
- Structure your response based on what the user actually asked
- Don't force information into preset categories

IMPORTANT: Adapt your response structure to match the user's query type. Not every response needs dates or key information sections. Respond naturally while maintaining helpful formatting.";

/// System prompts keyed by name. The mental-health prompt is always present
/// and is the fallback for unknown keys.
#[derive(Debug, Clone)]
pub struct SystemPrompts {
    prompts: HashMap<String, String>,
}

impl Default for SystemPrompts {
    fn default() -> Self {
        let prompts = HashMap::from([
            (MENTAL_HEALTH_PROMPT_KEY.to_string(), MENTAL_HEALTH_PROMPT.to_string()),
            (CAREER_PROMPT_KEY.to_string(), CAREER_PROMPT.to_string()),
        ]);
        Self { prompts }
    }
}

impl SystemPrompts {
    /// Built-in prompts with `overrides` merged on top.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let mut prompts = Self::default();
        prompts.prompts.extend(overrides);
        prompts
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prompts.get(key).map(String::as_str)
    }

    /// Looks up `key`, falling back to the mental-health prompt.
    pub fn get_or_default(&self, key: &str) -> &str {
        self.get(key)
            .or_else(|| self.get(MENTAL_HEALTH_PROMPT_KEY))
            .unwrap_or(MENTAL_HEALTH_PROMPT)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Returns the last `n` entries of `history`, in order.
pub fn trim_history(history: &[Turn], n: usize) -> &[Turn] {
    &history[history.len().saturating_sub(n)..]
}

fn render_history_line(turn: &Turn, max_chars: Option<usize>) -> String {
    let text: String = match max_chars {
        Some(limit) => turn.text.chars().take(limit).collect(),
        None => turn.text.clone(),
    };
    format!("{}: {}", turn.role.label(), text)
}

/// Plain prompt: system instructions, optional caller context, full provided
/// history, then the user cue.
pub fn build_prompt(system_prompt: &str, context: &str, history: &[Turn], user_message: &str) -> String {
    let mut parts = vec![format!("SYSTEM INSTRUCTIONS:\n{}", system_prompt.trim())];

    if !context.is_empty() {
        parts.push(format!("\nCONTEXT / FACTS:\n{}", context.trim()));
    }

    if !history.is_empty() {
        let mut block = String::from("CONVERSATION HISTORY (most recent last):");
        for turn in history {
            block.push('\n');
            block.push_str(&render_history_line(turn, None));
        }
        parts.push(block.trim().to_string());
    }

    parts.push(format!("\nUSER:\n{}", user_message.trim()));
    parts.push("\nASSISTANT:".to_string());
    parts.join("\n\n")
}

/// Search-augmented prompt. Only the last four turns are kept and each is cut
/// to 150 characters.
pub fn build_prompt_with_search_results(
    system_prompt: &str,
    search_context: &str,
    history: &[Turn],
    user_message: &str,
) -> String {
    let rule = "=".repeat(50);
    let mut parts = vec![format!("SYSTEM INSTRUCTIONS:\n{}", system_prompt.trim())];

    if !search_context.is_empty() {
        parts.push(format!("\n{rule}"));
        parts.push("WEB SEARCH RESULTS (USE THIS CURRENT INFORMATION):".to_string());
        parts.push(rule.clone());
        parts.push(search_context.trim().to_string());
        parts.push(rule.clone());
    }

    if !history.is_empty() {
        parts.push("\nRECENT CONVERSATION:".to_string());
        parts.extend(
            trim_history(history, SEARCH_HISTORY_TURNS)
                .iter()
                .map(|turn| render_history_line(turn, Some(SEARCH_HISTORY_CHARS))),
        );
    }

    parts.push(format!("\nCURRENT USER QUESTION: {}", user_message.trim()));

    if !search_context.is_empty() {
        parts.push(
            "\nIMPORTANT: Use the web search results above to provide current, accurate information. Start your response by acknowledging you searched the web."
                .to_string(),
        );
    }

    parts.join("\n\n")
}

/// Renders a search outcome into the text block embedded in the prompt.
pub fn render_search_context(query: &str, outcome: &SearchOutcome) -> String {
    if outcome.results.is_empty() {
        return "WEB SEARCH ATTEMPTED but no results found. Provide general guidance and suggest checking official websites.\n\n".to_string();
    }

    let mut block = format!(
        "SEARCH QUERY: '{query}'\nSOURCE: {}\n\n",
        outcome.source.label()
    );
    for (i, result) in outcome.results.iter().enumerate() {
        block.push_str(&format!("RESULT {}:\n", i + 1));
        block.push_str(&format!("Title: {}\n", result.title));
        block.push_str(&format!("Content: {}\n", result.snippet));
        let source = if result.source.is_empty() { "Web" } else { result.source.as_str() };
        block.push_str(&format!("Source: {source}\n"));
        if !result.link.is_empty() {
            block.push_str(&format!("URL: {}\n", result.link));
        }
        block.push('\n');
    }
    block
}
