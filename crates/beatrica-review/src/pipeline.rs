//! The four-stage review loop: enumerate changes, check reviewability,
//! collect review points, aggregate them per change.

use std::fmt;

use beatrica_core::{BeatricaError, LlmProvider, ReviewCandidate, ReviewItem};
use indexmap::IndexMap;
use serde::Serialize;

use crate::prompt::{Extractor, PromptCatalog, Stage};
use crate::rag::RetrievalEngine;

/// Review bodies keyed by change, in first-seen order.
pub type AggregatedReview = IndexMap<ReviewCandidate, ReviewBody>;

/// The review collected for one change.
///
/// # Examples
///
/// ```
/// use beatrica_review::pipeline::ReviewBody;
///
/// let raw = ReviewBody::Points(vec!["rename is fine".into(), "add docstring".into()]);
/// assert_eq!(raw.text(), "rename is fine add docstring");
///
/// let merged = ReviewBody::Aggregated("Consider adding a docstring.".into());
/// assert_eq!(merged.text(), "Consider adding a docstring.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewBody {
    /// Raw points, kept when aggregation produced nothing.
    Points(Vec<String>),
    /// Single text merged by the aggregation stage.
    Aggregated(String),
}

impl ReviewBody {
    /// Display text; raw points are joined with single spaces.
    pub fn text(&self) -> String {
        match self {
            ReviewBody::Points(points) => points.join(" "),
            ReviewBody::Aggregated(text) => text.clone(),
        }
    }
}

/// Values the orchestrator needs from the run configuration.
///
/// # Examples
///
/// ```
/// use beatrica_core::LlmProvider;
/// use beatrica_review::pipeline::ReviewSettings;
///
/// let settings = ReviewSettings::new("main", LlmProvider::OpenAi, "gpt-4-0125-preview");
/// assert_eq!(settings.model_label(), "openai gpt-4-0125-preview");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSettings {
    /// Branch the reviewed commits are compared against.
    pub base_branch: String,
    /// Provider answering the questions.
    pub provider: LlmProvider,
    /// Effective model name.
    pub model: String,
}

impl ReviewSettings {
    /// Build settings from their parts.
    pub fn new(base_branch: impl Into<String>, provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            base_branch: base_branch.into(),
            provider,
            model: model.into(),
        }
    }

    /// `"<provider> <model>"`, as shown to the user.
    pub fn model_label(&self) -> String {
        format!("{} {}", self.provider, self.model)
    }
}

/// Counters collected during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    /// Candidates left after dropping placeholder echoes.
    pub candidates: usize,
    /// Placeholder echoes dropped from the enumeration answer.
    pub placeholders_dropped: usize,
    /// Candidates the model agreed to review.
    pub reviewable: usize,
    /// Review points collected across all candidates.
    pub points: usize,
    /// Groups replaced by an aggregated text.
    pub aggregated: usize,
    /// Groups left with their raw points.
    pub fallbacks: usize,
    /// Questions sent to the retrieval engine.
    pub llm_calls: usize,
}

/// Result of a run that found something to review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewReport {
    /// Candidates that survived enumeration, in answer order.
    pub candidates: Vec<ReviewCandidate>,
    /// Every review point, in the order it was produced.
    pub items: Vec<ReviewItem>,
    /// Final review per change.
    pub reviews: AggregatedReview,
    /// Run counters.
    pub stats: ReviewStats,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The enumeration answer held no real change.
    NothingToReview {
        /// Counters up to the early exit.
        stats: ReviewStats,
    },
    /// The loop ran to completion.
    Reviewed(ReviewReport),
}

/// Coarse step of a run, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Stage 1.
    Enumerate,
    /// Stages 2 and 3, one item per candidate.
    Review,
    /// Stage 4, one item per change with points.
    Aggregate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Enumerate => write!(f, "Enumerating changes"),
            Phase::Review => write!(f, "Reviewing changes"),
            Phase::Aggregate => write!(f, "Aggregating reviews"),
        }
    }
}

/// Progress notification emitted by [`ReviewOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A phase starts with `total` work items.
    PhaseStarted {
        /// The phase.
        phase: Phase,
        /// Number of items it will process.
        total: usize,
    },
    /// One item of the phase is done.
    ItemFinished {
        /// The phase.
        phase: Phase,
    },
    /// The phase is done.
    PhaseFinished {
        /// The phase.
        phase: Phase,
    },
}

/// Receives [`ProgressEvent`]s, e.g. to drive progress bars.
pub trait ReviewObserver: Send {
    /// Called for every event, in order.
    fn on_event(&mut self, event: &ProgressEvent);
}

/// Runs the review loop against a [`RetrievalEngine`].
///
/// Questions are issued one at a time, in candidate order. Answers that do
/// not match the expected format contribute nothing; only engine errors
/// abort the run.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use beatrica_core::{BeatricaError, LlmProvider};
/// use beatrica_review::pipeline::{ReviewOrchestrator, ReviewOutcome, ReviewSettings};
/// use beatrica_review::prompt::PromptCatalog;
/// use beatrica_review::rag::{Answer, RetrievalEngine};
///
/// struct Silent;
///
/// #[async_trait]
/// impl RetrievalEngine for Silent {
///     async fn answer(&self, _question: &str) -> Result<Answer, BeatricaError> {
///         Ok(Answer::new("I don't know."))
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let catalog = PromptCatalog::builtin();
/// let settings = ReviewSettings::new("main", LlmProvider::OpenAi, "gpt-4-0125-preview");
/// let mut orchestrator = ReviewOrchestrator::new(&Silent, &catalog, settings);
/// let outcome = orchestrator.run().await.unwrap();
/// assert!(matches!(outcome, ReviewOutcome::NothingToReview { .. }));
/// # });
/// ```
pub struct ReviewOrchestrator<'a, E: RetrievalEngine + ?Sized> {
    engine: &'a E,
    prompts: &'a PromptCatalog,
    extractor: &'a dyn Extractor,
    settings: ReviewSettings,
    observer: Option<&'a mut dyn ReviewObserver>,
    stats: ReviewStats,
}

impl<'a, E: RetrievalEngine + ?Sized> ReviewOrchestrator<'a, E> {
    /// Create an orchestrator over `engine`. Questions are built from
    /// `prompts`, which also extracts the answers unless
    /// [`with_extractor`](Self::with_extractor) replaces it.
    pub fn new(engine: &'a E, prompts: &'a PromptCatalog, settings: ReviewSettings) -> Self {
        Self {
            engine,
            prompts,
            extractor: prompts,
            settings,
            observer: None,
            stats: ReviewStats::default(),
        }
    }

    /// Extract answers with `extractor` instead of the catalog patterns.
    pub fn with_extractor(mut self, extractor: &'a dyn Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Report progress to `observer`.
    pub fn with_observer(mut self, observer: &'a mut dyn ReviewObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The settings this orchestrator runs with.
    pub fn settings(&self) -> &ReviewSettings {
        &self.settings
    }

    /// Run all four stages.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the retrieval engine.
    pub async fn run(&mut self) -> Result<ReviewOutcome, BeatricaError> {
        let candidates = self.enumerate().await?;
        self.review(candidates).await
    }

    /// Reset the counters and run stage 1 as the enumeration phase.
    ///
    /// Callers that want to act on the candidates before reviewing them
    /// pass the result on to [`review`](Self::review).
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn enumerate(&mut self) -> Result<Vec<ReviewCandidate>, BeatricaError> {
        self.stats = ReviewStats::default();
        tracing::info!(
            base = %self.settings.base_branch,
            model = %self.settings.model_label(),
            "starting review"
        );

        self.emit(ProgressEvent::PhaseStarted {
            phase: Phase::Enumerate,
            total: 1,
        });
        let candidates = self.enumerate_changes().await?;
        self.emit(ProgressEvent::ItemFinished {
            phase: Phase::Enumerate,
        });
        self.emit(ProgressEvent::PhaseFinished {
            phase: Phase::Enumerate,
        });
        Ok(candidates)
    }

    /// Run stages 2 to 4 over `candidates`. No candidates means there is
    /// nothing to review.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn review(
        &mut self,
        candidates: Vec<ReviewCandidate>,
    ) -> Result<ReviewOutcome, BeatricaError> {
        if candidates.is_empty() {
            tracing::info!("no reviewable changes enumerated");
            return Ok(ReviewOutcome::NothingToReview {
                stats: self.stats.clone(),
            });
        }

        self.emit(ProgressEvent::PhaseStarted {
            phase: Phase::Review,
            total: candidates.len(),
        });
        let mut items = Vec::new();
        for candidate in &candidates {
            if self.is_reviewable(candidate).await? {
                self.stats.reviewable += 1;
                for point in self.review_points(candidate).await? {
                    items.push(ReviewItem {
                        change: candidate.clone(),
                        review: point,
                    });
                }
            }
            self.emit(ProgressEvent::ItemFinished {
                phase: Phase::Review,
            });
        }
        self.stats.points = items.len();
        self.emit(ProgressEvent::PhaseFinished {
            phase: Phase::Review,
        });

        let reviews = self.aggregate(&items).await?;

        Ok(ReviewOutcome::Reviewed(ReviewReport {
            candidates,
            items,
            reviews,
            stats: self.stats.clone(),
        }))
    }

    /// Stage 1: ask for the list of changes and drop placeholder echoes.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn enumerate_changes(&mut self) -> Result<Vec<ReviewCandidate>, BeatricaError> {
        let answer = self.ask(Stage::GetChanges, "").await?;

        let mut candidates = Vec::new();
        for capture in self.extractor.extract(Stage::GetChanges, &answer) {
            let mut fields = capture.into_iter();
            let candidate = ReviewCandidate::new(
                fields.next().unwrap_or_default(),
                fields.next().unwrap_or_default(),
            );
            if candidate.is_placeholder() {
                tracing::debug!(commit = %candidate.commit_id, "dropping placeholder change");
                self.stats.placeholders_dropped += 1;
                continue;
            }
            candidates.push(candidate);
        }

        self.stats.candidates = candidates.len();
        tracing::debug!(count = candidates.len(), "changes enumerated");
        Ok(candidates)
    }

    /// Stage 2: `true` only when the answer's first capture parses to 1.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn is_reviewable(&mut self, candidate: &ReviewCandidate) -> Result<bool, BeatricaError> {
        let answer = self.ask(Stage::CanReview, &candidate.payload()).await?;

        let Some(token) = first_capture(self.extractor.extract(Stage::CanReview, &answer)) else {
            tracing::debug!(commit = %candidate.commit_id, "no reviewability verdict in answer");
            return Ok(false);
        };

        match token.trim().parse::<i64>() {
            Ok(value) => Ok(value == 1),
            Err(_) => {
                tracing::debug!(commit = %candidate.commit_id, %token, "non-numeric reviewability verdict");
                Ok(false)
            }
        }
    }

    /// Stage 3: every review point for `candidate`, possibly none.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn review_points(
        &mut self,
        candidate: &ReviewCandidate,
    ) -> Result<Vec<String>, BeatricaError> {
        let answer = self.ask(Stage::MakeReview, &candidate.payload()).await?;

        let points: Vec<String> = self
            .extractor
            .extract(Stage::MakeReview, &answer)
            .into_iter()
            .filter_map(|capture| capture.into_iter().next())
            .collect();

        if points.is_empty() {
            tracing::debug!(commit = %candidate.commit_id, "no review points in answer");
        }
        Ok(points)
    }

    /// Stage 4: group points by change and ask for one merged text per group.
    ///
    /// Groups whose answer has no match keep their raw points. Only the
    /// first match is used when the answer holds several; later ones are
    /// ignored, which may hide part of a multi-part answer.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn aggregate(&mut self, items: &[ReviewItem]) -> Result<AggregatedReview, BeatricaError> {
        let mut groups: IndexMap<ReviewCandidate, Vec<String>> = IndexMap::new();
        for item in items {
            groups
                .entry(item.change.clone())
                .or_default()
                .push(item.review.clone());
        }

        self.emit(ProgressEvent::PhaseStarted {
            phase: Phase::Aggregate,
            total: groups.len(),
        });

        let mut reviews = AggregatedReview::with_capacity(groups.len());
        for (change, points) in groups {
            let payload: String = points.iter().map(|p| format!("\n{p}")).collect();
            let answer = self.ask(Stage::AggregateReviewPoints, &payload).await?;

            let body = match first_capture(
                self.extractor
                    .extract(Stage::AggregateReviewPoints, &answer),
            ) {
                Some(text) => {
                    self.stats.aggregated += 1;
                    ReviewBody::Aggregated(text)
                }
                None => {
                    tracing::debug!(commit = %change.commit_id, "aggregation produced nothing, keeping raw points");
                    self.stats.fallbacks += 1;
                    ReviewBody::Points(points)
                }
            };
            reviews.insert(change, body);

            self.emit(ProgressEvent::ItemFinished {
                phase: Phase::Aggregate,
            });
        }

        self.emit(ProgressEvent::PhaseFinished {
            phase: Phase::Aggregate,
        });
        Ok(reviews)
    }

    async fn ask(&mut self, stage: Stage, payload: &str) -> Result<String, BeatricaError> {
        let question = self.prompts.build(stage, payload);
        self.stats.llm_calls += 1;
        tracing::debug!(%stage, "asking retrieval engine");
        Ok(self.engine.answer(&question).await?.answer)
    }

    fn emit(&mut self, event: ProgressEvent) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.on_event(&event);
        }
    }
}

fn first_capture(captures: Vec<Vec<String>>) -> Option<String> {
    captures.into_iter().next()?.into_iter().next()
}
