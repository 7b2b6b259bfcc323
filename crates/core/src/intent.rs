//! Intent catalog and trigger matching.
//!
//! An intent describes one side-effecting action the agent can perform along
//! with every user-facing string the dialog needs for it. Matching a free-text
//! utterance against an intent's trigger phrases is deliberately simple: exact
//! phrase containment first, then a word-aligned fuzzy pass that tolerates
//! a few filler words and single-letter typos.

use crate::session::{IntentId, ToolValue, render_value};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use std::fmt;

/// Placeholder replaced by the tool value in `Intent::success_template`.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// A single action the user can ask for.
#[derive(Debug, Clone)]
pub struct Intent {
    pub id: IntentId,
    /// Short human description, also handed to LLM-backed classifiers.
    pub description: String,
    /// Phrases that express this intent.
    pub triggers: Vec<String>,
    /// Clarifying question used when the user has not expressed any intent.
    pub offer_prompt: String,
    /// Question asked before the tool is allowed to run.
    pub confirmation_prompt: String,
    /// Reply after a successful tool call; `{value}` is substituted.
    pub success_template: String,
    /// Fixed reply after a failed tool call.
    pub failure_message: String,
}

impl Intent {
    /// The user-ID lookup served by the REST value resource.
    pub fn user_id() -> Self {
        Self {
            id: IntentId::new("find_user_id"),
            description: "find the user's ID by looking up the value in the REST endpoint"
                .to_string(),
            triggers: [
                "user id",
                "userid",
                "find my id",
                "find the value",
                "find my value",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            offer_prompt: "Would you like to find your user ID?".to_string(),
            confirmation_prompt: "Would you like to find your user ID?".to_string(),
            success_template: "Your user ID is {value}.".to_string(),
            failure_message: "Your user ID could not be retrieved at this time.".to_string(),
        }
    }

    pub fn success_reply(&self, value: &ToolValue) -> String {
        self.success_template
            .replace(VALUE_PLACEHOLDER, &render_value(value))
    }
}

/// Error raised when building a catalog with no intents.
#[derive(Debug, thiserror::Error)]
#[error("intent catalog must contain at least one intent")]
pub struct EmptyCatalog;

/// Ordered, non-empty set of intents. The first entry is the primary intent,
/// offered to users who have not expressed anything recognizable.
#[derive(Debug, Clone)]
pub struct IntentCatalog {
    intents: Vec<Intent>,
}

impl IntentCatalog {
    pub fn new(intents: Vec<Intent>) -> Result<Self, EmptyCatalog> {
        if intents.is_empty() {
            return Err(EmptyCatalog);
        }
        Ok(Self { intents })
    }

    pub fn single(intent: Intent) -> Self {
        Self {
            intents: vec![intent],
        }
    }

    pub fn primary(&self) -> &Intent {
        &self.intents[0]
    }

    pub fn get(&self, id: &IntentId) -> Option<&Intent> {
        self.intents.iter().find(|i| &i.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intent> {
        self.intents.iter()
    }
}

impl Default for IntentCatalog {
    fn default() -> Self {
        Self::single(Intent::user_id())
    }
}

/// Most filler words tolerated between two consecutive trigger words.
pub const MAX_FILLER_WORDS: usize = 2;

/// Trigger words shorter than this must match exactly.
const MIN_FUZZY_WORD_LEN: usize = 3;

/// Decides whether an utterance expresses one of the catalog's intents.
///
/// The fuzzy pass works word by word: every trigger word must line up with a
/// whole utterance word, in order, with at most `MAX_FILLER_WORDS` in
/// between. Words of similar length may differ by a dropped or extra letter
/// when Skim V2 scores them above the per-character threshold.
pub struct TriggerMatcher {
    matcher: SkimMatcherV2,
    /// Minimum fuzzy score per matched character; `None` disables fuzzy matching.
    min_score_per_char: Option<i64>,
}

impl fmt::Debug for TriggerMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerMatcher")
            .field("min_score_per_char", &self.min_score_per_char)
            .finish()
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new(Some(12))
    }
}

impl TriggerMatcher {
    pub fn new(min_score_per_char: Option<i64>) -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
            min_score_per_char,
        }
    }

    /// Exact phrase matching only.
    pub fn exact() -> Self {
        Self::new(None)
    }

    /// Returns the first intent whose triggers match `utterance`.
    pub fn find<'a>(&self, catalog: &'a IntentCatalog, utterance: &str) -> Option<&'a Intent> {
        let text = normalize(utterance);
        if text.is_empty() {
            return None;
        }
        catalog.iter().find(|intent| {
            intent
                .triggers
                .iter()
                .any(|trigger| self.matches(&text, &normalize(trigger)))
        })
    }

    fn matches(&self, text: &str, trigger: &str) -> bool {
        if trigger.is_empty() {
            return false;
        }
        if format!(" {text} ").contains(&format!(" {trigger} ")) {
            return true;
        }
        let Some(per_char) = self.min_score_per_char else {
            return false;
        };

        let words: Vec<&str> = text.split(' ').collect();
        let pattern: Vec<&str> = trigger.split(' ').collect();
        (0..words.len()).any(|start| self.matches_from(&words[start..], &pattern, per_char))
    }

    /// Matches `pattern` against `words`, anchoring the first pattern word at
    /// `words[0]`.
    fn matches_from(&self, words: &[&str], pattern: &[&str], per_char: i64) -> bool {
        let Some((first, rest)) = pattern.split_first() else {
            return true;
        };
        if words.is_empty() || !self.word_matches(words[0], first, per_char) {
            return false;
        }
        let mut pos = 1;
        for expected in rest {
            let window_end = (pos + MAX_FILLER_WORDS + 1).min(words.len());
            let Some(offset) = words[pos..window_end]
                .iter()
                .position(|word| self.word_matches(word, expected, per_char))
            else {
                return false;
            };
            pos += offset + 1;
        }
        true
    }

    fn word_matches(&self, word: &str, expected: &str, per_char: i64) -> bool {
        if word == expected {
            return true;
        }
        let (word_len, expected_len) = (word.chars().count(), expected.chars().count());
        if expected_len < MIN_FUZZY_WORD_LEN || word_len.abs_diff(expected_len) > 1 {
            return false;
        }
        let (longer, shorter, shorter_len) = if word_len >= expected_len {
            (word, expected, expected_len)
        } else {
            (expected, word, word_len)
        };
        self.matcher
            .fuzzy_indices(longer, shorter)
            .is_some_and(|(score, indices)| {
                indices.first() == Some(&0) && score >= per_char * shorter_len as i64
            })
    }
}

/// Lowercases, turns punctuation into spaces and collapses whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
