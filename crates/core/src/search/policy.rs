//! Rule tables deciding when a career-guidance message needs a web search and
//! how to rewrite it into a focused query.
//!
//! All matching is case-insensitive substring matching. Tables are checked in
//! order and the first match wins; there is no scoring.

/// Terms tied to dates, deadlines and admissions cycles.
pub const TIME_SENSITIVE_TERMS: &[&str] = &[
    "date",
    "2025",
    "2024",
    "when",
    "cutoff",
    "admission",
    "latest",
    "current",
    "fees",
    "ranking",
    "eligibility",
    "notification",
    "result",
    "exam",
    "application",
    "form",
    "last date",
];

/// Entrance exams and institutions whose details change every cycle.
pub const EXAM_ACRONYMS: &[&str] = &[
    "jee", "neet", "clat", "gate", "cat", "mat", "xat", "iit", "nit", "iiit", "aiims", "jipmer",
];

pub const GUIDANCE_PHRASES: &[&str] = &[
    "career option",
    "what should i",
    "which course",
    "best college",
    "how to get",
    "admission process",
];

const SEARCH_TRIGGER_TABLES: &[(&str, &[&str])] = &[
    ("time_sensitive", TIME_SENSITIVE_TERMS),
    ("exam_acronym", EXAM_ACRONYMS),
    ("guidance_phrase", GUIDANCE_PHRASES),
];

/// Returns `true` when a career-mode message should be augmented with web
/// results. Always `false` outside career mode.
pub fn should_search(message: &str, career_mode: bool) -> bool {
    if !career_mode {
        return false;
    }

    let lowered = message.to_lowercase();
    match SEARCH_TRIGGER_TABLES
        .iter()
        .find_map(|(table, terms)| terms.iter().find(|t| lowered.contains(*t)).map(|t| (table, t)))
    {
        Some((table, term)) => {
            tracing::debug!(table, term, "Message triggers web search");
            true
        }
        None => false,
    }
}

/// How a matching [`QueryRule`] produces the search query.
#[derive(Debug, Clone, Copy)]
pub enum Rewrite {
    /// Replace the message with a fixed query.
    Fixed(&'static str),
    /// Prefix the raw message with a template.
    Prefix(&'static str),
}

/// A pattern → query rewrite. Every group in `all_of` must match, and a group
/// matches when any one of its terms is present.
#[derive(Debug, Clone, Copy)]
pub struct QueryRule {
    pub name: &'static str,
    pub all_of: &'static [&'static [&'static str]],
    pub rewrite: Rewrite,
}

impl QueryRule {
    fn matches(&self, lowered: &str) -> bool {
        self.all_of
            .iter()
            .all(|group| group.iter().any(|term| lowered.contains(term)))
    }

    fn apply(&self, message: &str) -> String {
        match self.rewrite {
            Rewrite::Fixed(query) => query.to_string(),
            Rewrite::Prefix(prefix) => format!("{prefix} {message}"),
        }
    }
}

/// Ordered by priority.
pub const QUERY_RULES: &[QueryRule] = &[
    QueryRule {
        name: "jee_schedule",
        all_of: &[&["jee"], &["2025", "date"]],
        rewrite: Rewrite::Fixed("JEE Main 2025 exam dates official NTA schedule"),
    },
    QueryRule {
        name: "neet_notification",
        all_of: &[&["neet"], &["2025", "date"]],
        rewrite: Rewrite::Fixed("NEET 2025 exam date official NTA notification"),
    },
    QueryRule {
        name: "after_10th",
        all_of: &[&["after 10th", "10th class"]],
        rewrite: Rewrite::Fixed("career options after 10th class India 2024 2025"),
    },
    QueryRule {
        name: "after_12th",
        all_of: &[&["after 12th", "12th class"]],
        rewrite: Rewrite::Fixed("career options after 12th India 2024 2025"),
    },
    QueryRule {
        name: "cutoff",
        all_of: &[&["cutoff"]],
        rewrite: Rewrite::Prefix("college cutoff 2024 India admission"),
    },
    QueryRule {
        name: "admission",
        all_of: &[&["admission"]],
        rewrite: Rewrite::Prefix("college admission process 2024 2025 India"),
    },
];

const FALLBACK_SUFFIX: &str = "India 2024 2025 official";

/// Rewrites a raw message into a targeted search query.
pub fn build_query(message: &str) -> String {
    let lowered = message.to_lowercase();
    QUERY_RULES
        .iter()
        .find(|rule| rule.matches(&lowered))
        .map(|rule| {
            tracing::debug!(rule = rule.name, "Query rewrite rule matched");
            rule.apply(message)
        })
        .unwrap_or_else(|| format!("{message} {FALLBACK_SUFFIX}"))
}
