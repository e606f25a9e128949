//! Integration tests: the full review loop against a scripted engine.

use std::sync::Mutex;

use async_trait::async_trait;
use beatrica_core::{BeatricaError, LlmProvider, OutputFormat, ReportRow, ReviewCandidate};
use beatrica_review::pipeline::{
    Phase, ProgressEvent, ReviewBody, ReviewObserver, ReviewOrchestrator, ReviewOutcome,
    ReviewSettings,
};
use beatrica_review::prompt::{Extractor, PromptCatalog, Stage};
use beatrica_review::rag::{Answer, RetrievalEngine};
use beatrica_review::report::{build_rows, render};
use pretty_assertions::assert_eq;

type Responder = Box<dyn Fn(Stage, &str) -> Result<String, BeatricaError> + Send + Sync>;

/// Answers each question by stage, recording everything it was asked.
struct ScriptedEngine {
    catalog: PromptCatalog,
    respond: Responder,
    questions: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new(
        respond: impl Fn(Stage, &str) -> Result<String, BeatricaError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            catalog: PromptCatalog::builtin(),
            respond: Box::new(respond),
            questions: Mutex::new(Vec::new()),
        }
    }

    fn stage_of(&self, question: &str) -> Stage {
        Stage::ALL
            .into_iter()
            .find(|stage| question.starts_with(&self.catalog.spec(*stage).question))
            .expect("question matches a stage prefix")
    }

    fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalEngine for ScriptedEngine {
    async fn answer(&self, question: &str) -> Result<Answer, BeatricaError> {
        self.questions.lock().unwrap().push(question.to_string());
        let stage = self.stage_of(question);
        (self.respond)(stage, question).map(Answer::new)
    }
}

#[derive(Default)]
struct Recorder {
    events: Vec<ProgressEvent>,
}

impl ReviewObserver for Recorder {
    fn on_event(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}

const CHANGES: &str = "<xml><changes>\
<change commit='commit_hash1'>change 1 for commit_hash1</change>\
<change commit='abc123'>renamed function foo to bar</change>\
</changes></xml>";
const REVIEWABLE: &str = "<xml><review>1</review></xml>";
const POINTS: &str =
    "<xml><review><point>rename is fine</point><point>add docstring</point></review></xml>";
const AGGREGATED: &str = "<xml><aggregated_review>Consider adding a docstring; rename looks good.</aggregated_review></xml>";

fn settings() -> ReviewSettings {
    ReviewSettings::new("main", LlmProvider::OpenAi, "gpt-4-0125-preview")
}

fn happy_path(stage: Stage, _question: &str) -> Result<String, BeatricaError> {
    Ok(match stage {
        Stage::GetChanges => CHANGES,
        Stage::CanReview => REVIEWABLE,
        Stage::MakeReview => POINTS,
        Stage::AggregateReviewPoints => AGGREGATED,
    }
    .to_string())
}

async fn run(engine: &ScriptedEngine) -> Result<ReviewOutcome, BeatricaError> {
    let catalog = PromptCatalog::builtin();
    ReviewOrchestrator::new(engine, &catalog, settings())
        .run()
        .await
}

fn reviewed(outcome: ReviewOutcome) -> beatrica_review::pipeline::ReviewReport {
    match outcome {
        ReviewOutcome::Reviewed(report) => report,
        ReviewOutcome::NothingToReview { stats } => {
            panic!("expected a review, got nothing to review: {stats:?}")
        }
    }
}

#[tokio::test]
async fn end_to_end_single_change() {
    let engine = ScriptedEngine::new(happy_path);
    let report = reviewed(run(&engine).await.unwrap());

    assert_eq!(
        report.candidates,
        vec![ReviewCandidate::new("abc123", "renamed function foo to bar")]
    );
    assert_eq!(report.items.len(), 2);
    assert_eq!(
        build_rows(&report.reviews),
        vec![ReportRow {
            commit_id: "abc123".into(),
            change_description: "renamed function foo to bar".into(),
            review: "Consider adding a docstring; rename looks good.".into(),
        }]
    );

    assert_eq!(report.stats.candidates, 1);
    assert_eq!(report.stats.placeholders_dropped, 1);
    assert_eq!(report.stats.reviewable, 1);
    assert_eq!(report.stats.points, 2);
    assert_eq!(report.stats.aggregated, 1);
    assert_eq!(report.stats.fallbacks, 0);
    assert_eq!(report.stats.llm_calls, 4);
}

#[tokio::test]
async fn questions_carry_payloads_in_order() {
    let engine = ScriptedEngine::new(happy_path);
    run(&engine).await.unwrap();

    let questions = engine.questions();
    assert_eq!(questions.len(), 4);
    assert!(questions[0].starts_with("What are the changes in the following code?"));
    assert!(questions[1].contains("The change is: abc123: renamed function foo to bar\nWrite"));
    assert!(questions[2].starts_with("You are code reviewer."));
    assert!(questions[2].contains("abc123: renamed function foo to bar"));
    assert!(questions[3]
        .contains("The review points are: \nrename is fine\nadd docstring\nWrite the answer"));
}

#[tokio::test]
async fn only_placeholders_ends_before_reviewability() {
    let engine = ScriptedEngine::new(|stage, _| match stage {
        Stage::GetChanges => Ok("<xml><changes>\
<change commit='commit_hash1'>change 1 for commit_hash1</change>\
<change commit='x'>commit\\_hash2 change</change>\
</changes></xml>"
            .to_string()),
        other => panic!("unexpected stage {other}"),
    });

    match run(&engine).await.unwrap() {
        ReviewOutcome::NothingToReview { stats } => {
            assert_eq!(stats.candidates, 0);
            assert_eq!(stats.placeholders_dropped, 2);
            assert_eq!(stats.llm_calls, 1);
        }
        other => panic!("expected nothing to review, got {other:?}"),
    }
    assert_eq!(engine.questions().len(), 1);
}

#[tokio::test]
async fn unparseable_enumeration_is_nothing_to_review() {
    let engine = ScriptedEngine::new(|_, _| Ok("These commits rename a function.".to_string()));
    let outcome = run(&engine).await.unwrap();
    assert!(matches!(outcome, ReviewOutcome::NothingToReview { .. }));
}

#[tokio::test]
async fn only_verdict_one_is_reviewed() {
    let engine = ScriptedEngine::new(|stage, question| {
        Ok(match stage {
            Stage::GetChanges => "<xml><changes>\
<change commit='a1'>first</change>\
<change commit='b2'>second</change>\
<change commit='c3'>third</change>\
<change commit='d4'>fourth</change>\
<change commit='e5'>fifth</change>\
</changes></xml>"
                .to_string(),
            Stage::CanReview => {
                let verdict = if question.contains("a1: first") {
                    "<review>0</review>"
                } else if question.contains("b2: second") {
                    "<review>yes</review>"
                } else if question.contains("c3: third") {
                    "<review> 1 </review>"
                } else if question.contains("d4: fourth") {
                    "I can review this."
                } else {
                    "<review>2</review>"
                };
                verdict.to_string()
            }
            Stage::MakeReview => "<point>looks fine</point>".to_string(),
            Stage::AggregateReviewPoints => {
                "<aggregated_review>Looks fine.</aggregated_review>".to_string()
            }
        })
    });

    let report = reviewed(run(&engine).await.unwrap());
    assert_eq!(report.stats.candidates, 5);
    assert_eq!(report.stats.reviewable, 1);
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].change.commit_id, "c3");
    // 1 enumeration + 5 verdicts + 1 review + 1 aggregation
    assert_eq!(report.stats.llm_calls, 8);
}

#[tokio::test]
async fn aggregation_without_match_keeps_raw_points() {
    let engine = ScriptedEngine::new(|stage, question| match stage {
        Stage::AggregateReviewPoints => Ok("I could not merge these.".to_string()),
        other => happy_path(other, question),
    });

    let report = reviewed(run(&engine).await.unwrap());
    let body = &report.reviews[&ReviewCandidate::new("abc123", "renamed function foo to bar")];
    assert_eq!(
        body,
        &ReviewBody::Points(vec!["rename is fine".into(), "add docstring".into()])
    );
    assert_eq!(build_rows(&report.reviews)[0].review, "rename is fine add docstring");
    assert_eq!(report.stats.fallbacks, 1);
    assert_eq!(report.stats.aggregated, 0);
}

#[tokio::test]
async fn aggregation_uses_first_match() {
    let engine = ScriptedEngine::new(|stage, question| match stage {
        Stage::AggregateReviewPoints => Ok("<aggregated_review>first</aggregated_review>\
<aggregated_review>second</aggregated_review>"
            .to_string()),
        other => happy_path(other, question),
    });

    let report = reviewed(run(&engine).await.unwrap());
    assert_eq!(build_rows(&report.reviews)[0].review, "first");
}

#[tokio::test]
async fn reviewable_change_without_points_yields_no_rows() {
    let engine = ScriptedEngine::new(|stage, question| match stage {
        Stage::MakeReview => Ok("Nothing to add.".to_string()),
        Stage::AggregateReviewPoints => panic!("no group should be aggregated"),
        other => happy_path(other, question),
    });

    let report = reviewed(run(&engine).await.unwrap());
    assert!(report.items.is_empty());
    assert!(report.reviews.is_empty());
    assert_eq!(report.stats.llm_calls, 3);

    let rows = build_rows(&report.reviews);
    let out = render(&rows, &report.reviews, OutputFormat::Text, false).unwrap();
    assert_eq!(out, "{}\nNo comments in the review\n");
}

#[tokio::test]
async fn points_for_same_change_are_grouped() {
    let engine = ScriptedEngine::new(|stage, question| match stage {
        Stage::GetChanges => Ok("<change commit='a1'>one</change>\
<change commit='b2'>two</change>\
<change commit='a1'>one</change>"
            .to_string()),
        other => happy_path(other, question),
    });

    let report = reviewed(run(&engine).await.unwrap());
    // The repeated candidate is reviewed twice and its points share a group.
    assert_eq!(report.stats.candidates, 3);
    assert_eq!(report.items.len(), 6);
    assert_eq!(report.reviews.len(), 2);
    let keys: Vec<&str> = report.reviews.keys().map(|c| c.commit_id.as_str()).collect();
    assert_eq!(keys, vec!["a1", "b2"]);

    let aggregate_question = engine
        .questions()
        .into_iter()
        .find(|q| q.starts_with("Please aggregate"))
        .unwrap();
    assert!(aggregate_question.contains(
        "\nrename is fine\nadd docstring\nrename is fine\nadd docstring\nWrite"
    ));
}

#[tokio::test]
async fn engine_errors_abort_the_run() {
    let engine = ScriptedEngine::new(|stage, question| match stage {
        Stage::MakeReview => Err(BeatricaError::Llm("rate limited".into())),
        other => happy_path(other, question),
    });

    let err = run(&engine).await.unwrap_err();
    assert!(matches!(err, BeatricaError::Llm(ref msg) if msg == "rate limited"));
    assert_eq!(engine.questions().len(), 3);
}

#[tokio::test]
async fn observer_sees_every_phase() {
    let engine = ScriptedEngine::new(happy_path);
    let catalog = PromptCatalog::builtin();
    let mut recorder = Recorder::default();

    ReviewOrchestrator::new(&engine, &catalog, settings())
        .with_observer(&mut recorder)
        .run()
        .await
        .unwrap();

    assert_eq!(
        recorder.events,
        vec![
            ProgressEvent::PhaseStarted {
                phase: Phase::Enumerate,
                total: 1
            },
            ProgressEvent::ItemFinished {
                phase: Phase::Enumerate
            },
            ProgressEvent::PhaseFinished {
                phase: Phase::Enumerate
            },
            ProgressEvent::PhaseStarted {
                phase: Phase::Review,
                total: 1
            },
            ProgressEvent::ItemFinished {
                phase: Phase::Review
            },
            ProgressEvent::PhaseFinished {
                phase: Phase::Review
            },
            ProgressEvent::PhaseStarted {
                phase: Phase::Aggregate,
                total: 1
            },
            ProgressEvent::ItemFinished {
                phase: Phase::Aggregate
            },
            ProgressEvent::PhaseFinished {
                phase: Phase::Aggregate
            },
        ]
    );
}

#[tokio::test]
async fn candidates_are_known_before_review_phase_starts() {
    let engine = ScriptedEngine::new(happy_path);
    let catalog = PromptCatalog::builtin();
    let mut recorder = Recorder::default();
    let mut orchestrator =
        ReviewOrchestrator::new(&engine, &catalog, settings()).with_observer(&mut recorder);

    let candidates = orchestrator.enumerate().await.unwrap();
    assert_eq!(
        candidates,
        vec![ReviewCandidate::new("abc123", "renamed function foo to bar")]
    );
    assert_eq!(engine.questions().len(), 1);

    let report = reviewed(orchestrator.review(candidates).await.unwrap());
    assert_eq!(report.stats.candidates, 1);
    assert_eq!(report.stats.llm_calls, 4);
    drop(orchestrator);

    let review_started = recorder
        .events
        .iter()
        .position(|e| matches!(e, ProgressEvent::PhaseStarted { phase: Phase::Review, .. }))
        .unwrap();
    assert_eq!(review_started, 3);
}

#[tokio::test]
async fn review_without_candidates_asks_nothing() {
    let engine = ScriptedEngine::new(happy_path);
    let catalog = PromptCatalog::builtin();
    let mut orchestrator = ReviewOrchestrator::new(&engine, &catalog, settings());

    let outcome = orchestrator.review(Vec::new()).await.unwrap();
    assert!(matches!(outcome, ReviewOutcome::NothingToReview { .. }));
    assert!(engine.questions().is_empty());
}

#[tokio::test]
async fn custom_extractor_replaces_patterns() {
    /// Reads one `id|description` pair per line and treats any answer as "1".
    struct LineExtractor;

    impl Extractor for LineExtractor {
        fn extract(&self, stage: Stage, answer: &str) -> Vec<Vec<String>> {
            match stage {
                Stage::GetChanges => answer
                    .lines()
                    .filter_map(|line| line.split_once('|'))
                    .map(|(id, desc)| vec![id.to_string(), desc.to_string()])
                    .collect(),
                Stage::CanReview => vec![vec!["1".to_string()]],
                _ => answer.lines().map(|l| vec![l.to_string()]).collect(),
            }
        }
    }

    let engine = ScriptedEngine::new(|stage, _| {
        Ok(match stage {
            Stage::GetChanges => "abc|renamed foo",
            Stage::CanReview => "sure",
            Stage::MakeReview => "add tests",
            Stage::AggregateReviewPoints => "Add tests.",
        }
        .to_string())
    });
    let catalog = PromptCatalog::builtin();
    let outcome = ReviewOrchestrator::new(&engine, &catalog, settings())
        .with_extractor(&LineExtractor)
        .run()
        .await
        .unwrap();

    let report = reviewed(outcome);
    assert_eq!(build_rows(&report.reviews)[0].review, "Add tests.");
}

#[test]
fn extraction_is_idempotent() {
    let catalog = PromptCatalog::builtin();
    for (stage, answer) in [
        (Stage::GetChanges, CHANGES),
        (Stage::CanReview, REVIEWABLE),
        (Stage::MakeReview, POINTS),
        (Stage::AggregateReviewPoints, AGGREGATED),
    ] {
        let first = catalog.extract(stage, answer);
        assert!(!first.is_empty(), "{stage} should match");
        assert_eq!(first, catalog.extract(stage, answer));
    }
}
