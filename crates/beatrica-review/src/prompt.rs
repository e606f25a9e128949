//! Prompt templates for the four review stages and extraction of
//! structured fields from the free-text answers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use beatrica_core::{BeatricaError, PromptOverride};
use regex::Regex;

/// A stage of the review pipeline, each with its own prompt.
///
/// # Examples
///
/// ```
/// use beatrica_review::prompt::Stage;
///
/// let stage: Stage = "make_review".parse().unwrap();
/// assert_eq!(stage, Stage::MakeReview);
/// assert_eq!(stage.to_string(), "make_review");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Enumerate the changes in the indexed commits.
    GetChanges,
    /// Ask whether a change can be reviewed.
    CanReview,
    /// Produce review points for a change.
    MakeReview,
    /// Merge the points of one change into a single suggestion.
    AggregateReviewPoints,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::GetChanges,
        Stage::CanReview,
        Stage::MakeReview,
        Stage::AggregateReviewPoints,
    ];

    /// Name used in configuration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::GetChanges => "get_changes",
            Stage::CanReview => "can_review",
            Stage::MakeReview => "make_review",
            Stage::AggregateReviewPoints => "aggregate_review_points",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown prompt stage: {s} (expected get_changes, can_review, make_review or aggregate_review_points)"
                )
            })
    }
}

const GET_CHANGES_QUESTION: &str = "What are the changes in the following code? Write one change per unique commit hash please. ";
const GET_CHANGES_ANSWER: &str = "Write the answer in the following format: <xml><changes><change commit='commit_hash1'>change 1 for commit_hash1, change 2 for commit_hash1</change><change commit='commit_hash2'>change 1 for commit_hash2</change>...</changes></xml>";
const GET_CHANGES_PATTERN: &str = r"<change commit='(.*?)'>(.*?)</change>";

const CAN_REVIEW_QUESTION: &str = "Can you review and suggest points for improvement of the change in the following code? Answer only with number 1 if you can review the code or 0 if you cannot. The change is: ";
const CAN_REVIEW_ANSWER: &str =
    "Write the answer in the following format: <xml><review>1</review></xml>";
const CAN_REVIEW_PATTERN: &str = r"<review>(.*?)</review>";

const MAKE_REVIEW_QUESTION: &str = "You are code reviewer. Please review the following code change and suggest points for improvement. The change is: ";
const MAKE_REVIEW_ANSWER: &str = "Write the answer in the following format: <xml><review><point>point 1</point><point>point 2</point>...</review></xml>";
const MAKE_REVIEW_PATTERN: &str = r"<point>(.*?)</point>";

const AGGREGATE_QUESTION: &str = "Please aggregate the concrete review points for the concrete code change. The review points are: ";
const AGGREGATE_ANSWER: &str = "Write the answer in the following format: <xml><aggregated_review>Aggregated review text as a suggestion</aggregated_review></xml>";
const AGGREGATE_PATTERN: &str = r"<aggregated_review>(.*?)</aggregated_review>";

static BUILTIN: LazyLock<[PromptSpec; 4]> = LazyLock::new(|| {
    let spec = |question: &str, expected_answer: &str, pattern: &str| PromptSpec {
        question: question.to_string(),
        expected_answer: expected_answer.to_string(),
        pattern: compile(pattern).unwrap(),
    };
    [
        spec(GET_CHANGES_QUESTION, GET_CHANGES_ANSWER, GET_CHANGES_PATTERN),
        spec(CAN_REVIEW_QUESTION, CAN_REVIEW_ANSWER, CAN_REVIEW_PATTERN),
        spec(MAKE_REVIEW_QUESTION, MAKE_REVIEW_ANSWER, MAKE_REVIEW_PATTERN),
        spec(AGGREGATE_QUESTION, AGGREGATE_ANSWER, AGGREGATE_PATTERN),
    ]
});

/// Patterns match across lines.
fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?s){pattern}"))
}

/// Question prefix, answer-format instruction and extraction pattern of one stage.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    /// Text placed before the payload.
    pub question: String,
    /// Instruction describing the expected answer format.
    pub expected_answer: String,
    /// Compiled extraction pattern.
    pub pattern: Regex,
}

/// Turns a free-text LLM answer into structured captures for a stage.
///
/// Each match yields one inner vector holding its capture groups in order.
/// An answer with no match yields an empty vector.
pub trait Extractor: Send + Sync {
    /// Extract every non-overlapping match, left to right.
    fn extract(&self, stage: Stage, answer: &str) -> Vec<Vec<String>>;
}

/// The four stage prompts, built-in or overridden from configuration.
///
/// # Examples
///
/// ```
/// use beatrica_review::prompt::{Extractor, PromptCatalog, Stage};
///
/// let catalog = PromptCatalog::builtin();
/// let question = catalog.build(Stage::CanReview, "abc123: renamed foo");
/// assert!(question.contains("The change is: abc123: renamed foo\n"));
///
/// let captures = catalog.extract(Stage::CanReview, "<xml><review>1</review></xml>");
/// assert_eq!(captures, vec![vec!["1".to_string()]]);
/// ```
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    specs: [PromptSpec; 4],
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptCatalog {
    /// The built-in prompt texts.
    pub fn builtin() -> Self {
        Self {
            specs: BUILTIN.clone(),
        }
    }

    /// Built-in prompts with `[prompts.<stage>]` overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Config`] for an unknown stage name and
    /// [`BeatricaError::Prompt`] for a pattern that does not compile.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use beatrica_core::PromptOverride;
    /// use beatrica_review::prompt::{PromptCatalog, Stage};
    ///
    /// let mut overrides = HashMap::new();
    /// overrides.insert(
    ///     "make_review".to_string(),
    ///     PromptOverride {
    ///         question: Some("Review strictly: ".into()),
    ///         ..PromptOverride::default()
    ///     },
    /// );
    /// let catalog = PromptCatalog::with_overrides(&overrides).unwrap();
    /// assert!(catalog.build(Stage::MakeReview, "x").starts_with("Review strictly: x"));
    /// ```
    pub fn with_overrides(
        overrides: &HashMap<String, PromptOverride>,
    ) -> Result<Self, BeatricaError> {
        let mut catalog = Self::builtin();

        for (name, o) in overrides {
            let stage: Stage = name.parse().map_err(BeatricaError::Config)?;
            let spec = &mut catalog.specs[stage.index()];

            if let Some(question) = &o.question {
                spec.question = question.clone();
            }
            if let Some(expected_answer) = &o.expected_answer {
                spec.expected_answer = expected_answer.clone();
            }
            if let Some(pattern) = &o.expected_pattern {
                spec.pattern = compile(pattern).map_err(|e| {
                    BeatricaError::Prompt(format!("invalid pattern for {stage}: {e}"))
                })?;
            }
            tracing::debug!(%stage, "prompt override applied");
        }

        Ok(catalog)
    }

    /// Prompt texts and pattern of one stage.
    pub fn spec(&self, stage: Stage) -> &PromptSpec {
        &self.specs[stage.index()]
    }

    /// Full question: prefix, payload, a newline, then the format instruction.
    pub fn build(&self, stage: Stage, payload: &str) -> String {
        let spec = self.spec(stage);
        format!("{}{}\n{}", spec.question, payload, spec.expected_answer)
    }
}

impl Extractor for PromptCatalog {
    fn extract(&self, stage: Stage, answer: &str) -> Vec<Vec<String>> {
        let pattern = &self.spec(stage).pattern;

        if pattern.captures_len() == 1 {
            return pattern
                .find_iter(answer)
                .map(|m| vec![m.as_str().to_string()])
                .collect();
        }

        pattern
            .captures_iter(answer)
            .map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|group| group.map(|g| g.as_str().to_string()).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}
