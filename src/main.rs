use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use beatrica_codelens::chunker::ChunkOptions;
use beatrica_codelens::embedding::EmbeddingClient;
use beatrica_core::{BeatricaConfig, LlmProvider, OutputFormat};
use beatrica_difftrack::DiffTracker;
use beatrica_review::llm::LlmClient;
use beatrica_review::pipeline::{
    ProgressEvent, ReviewObserver, ReviewOrchestrator, ReviewOutcome, ReviewSettings,
};
use beatrica_review::prompt::PromptCatalog;
use beatrica_review::rag::RetrievalChain;
use beatrica_review::report::{self, ReportTarget};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "beatrica",
    version,
    about = "LLM code review for the commits on your branch",
    long_about = "Beatrica reviews the commits your branch adds on top of a base branch.\n\n\
                   The changes are embedded into a local index, then a language model is asked\n\
                   to enumerate them, decide which can be reviewed, list review points and\n\
                   merge them into one suggestion per change.\n\n\
                   Examples:\n  \
                     beatrica review                         Review HEAD against main\n  \
                     beatrica review --base-branch develop   Review against another branch\n  \
                     beatrica review --llm-type mistralai    Use Mistral AI\n  \
                     beatrica review --output review.txt     Append the review to a file\n  \
                     beatrica doctor                         Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .beatrica.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for console results.\n\n\
                       Formats:\n  \
                         text      Human-readable table (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown table"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Review the commits on HEAD that are not on the base branch
    #[command(long_about = "Review the commits on HEAD that are not on the base branch.\n\n\
        Tracks the branch's commits, embeds their diffs into a local change index,\n\
        and runs the review loop against the configured language model.\n\
        Requires an API key: --api-key, llm.api_key, LLM_API_KEY or the provider variable.\n\n\
        Examples:\n  beatrica review\n  beatrica review --base-branch develop --model-name gpt-4o\n  beatrica review --output '' --format json")]
    Review {
        /// Branch to compare against (default: main)
        #[arg(long)]
        base_branch: Option<String>,
        /// Language model provider: openai or mistralai
        #[arg(long, value_name = "TYPE")]
        llm_type: Option<LlmProvider>,
        /// Model name (default depends on the provider)
        #[arg(long)]
        model_name: Option<String>,
        /// API key for the provider
        #[arg(
            long,
            long_help = "API key for the provider.\n\nFalls back to llm.api_key in .beatrica.toml,\nthen LLM_API_KEY, then OPENAI_API_KEY or MISTRAL_API_KEY."
        )]
        api_key: Option<String>,
        /// Maximum tokens per LLM response (default: 500)
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Where to write the review
        #[arg(
            long,
            long_help = "Where to write the review.\n\n\
                'console' (default) prints a table. Any other value is a file path the\n\
                rows are appended to. An empty value writes beatrica_review.txt in the\n\
                current directory."
        )]
        output: Option<String>,
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Retrieved chunks per question (default: 6)
        #[arg(long)]
        top_k: Option<usize>,
        /// Keep the change index after the run
        #[arg(long)]
        keep_cache: bool,
    },
    /// Create a default .beatrica.toml configuration file
    #[command(long_about = "Create a default .beatrica.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .beatrica.toml already exists.")]
    Init,
    /// Check your Beatrica setup and environment
    #[command(long_about = "Check your Beatrica setup and environment.\n\n\
        Runs diagnostics for the git repository, config file, API keys, base branch\n\
        and change index. Use --format json for machine-readable output.")]
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1m\x1b[35m◆\x1b[0m \x1b[1mbeatrica\x1b[0m v{version}: LLM review for the commits on your branch\n");

        println!("Quick start:");
        println!("  \x1b[36mbeatrica init\x1b[0m                 Create a .beatrica.toml config file");
        println!("  \x1b[36mbeatrica review\x1b[0m               Review HEAD against main\n");

        println!("All commands:");
        println!("  \x1b[32mreview\x1b[0m    Track, embed and review the branch's commits");
        println!("  \x1b[32mdoctor\x1b[0m    Check your setup and environment");
        println!("  \x1b[32minit\x1b[0m      Create default configuration\n");
    } else {
        println!("beatrica v{version}: LLM review for the commits on your branch\n");

        println!("Quick start:");
        println!("  beatrica init                 Create a .beatrica.toml config file");
        println!("  beatrica review               Review HEAD against main\n");

        println!("All commands:");
        println!("  review    Track, embed and review the branch's commits");
        println!("  doctor    Check your setup and environment");
        println!("  init      Create default configuration\n");
    }

    println!("Run 'beatrica <command> --help' for details.");
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("BEATRICA_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("beatrica=debug,beatrica_core=debug,beatrica_difftrack=debug,beatrica_codelens=debug,beatrica_review=debug,warn")
        } else {
            EnvFilter::new("warn")
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

fn run_doctor(
    config: &BeatricaConfig,
    config_path: &Path,
    format: OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();
    let cwd = std::env::current_dir().into_diagnostic()?;

    // 1. Git repository
    let repo = git2::Repository::discover(&cwd).ok();
    match repo.as_ref().and_then(|r| r.workdir()) {
        Some(root) => checks.push(CheckResult::pass(
            "git_repository",
            format!("detected at {}", root.display()),
        )),
        None => checks.push(CheckResult::fail(
            "git_repository",
            "not a git repository",
            "run beatrica from inside a git repository with a working tree",
        )),
    }

    // 2. Config file
    if config_path.exists() {
        let overrides = config.prompts.len();
        match PromptCatalog::with_overrides(&config.prompts) {
            Err(e) => checks.push(CheckResult::fail(
                "config_file",
                format!("{} has invalid prompt overrides: {e}", config_path.display()),
                "fix the [prompts.<stage>] tables; stages are get_changes, can_review, \
                 make_review and aggregate_review_points",
            )),
            Ok(_) if overrides > 0 => checks.push(CheckResult::pass(
                "config_file",
                format!("{} found ({overrides} prompt overrides)", config_path.display()),
            )),
            Ok(_) => checks.push(CheckResult::pass(
                "config_file",
                format!("{} found", config_path.display()),
            )),
        }
    } else {
        checks.push(CheckResult::info(
            "config_file",
            format!("{} not found, using defaults", config_path.display()),
        ));
    }

    // 3. LLM provider + API key
    let provider = config.llm.provider;
    checks.push(CheckResult::pass(
        "llm_provider",
        format!("{provider} (model: {})", config.llm.model_name()),
    ));
    if config.llm.resolve_api_key().is_some() {
        checks.push(CheckResult::pass("llm_api_key", "API key found"));
    } else {
        let env_var = provider.api_key_env();
        checks.push(CheckResult::fail(
            "llm_api_key",
            format!("LLM_API_KEY and {env_var} not set"),
            "export LLM_API_KEY=... or set api_key in .beatrica.toml [llm]",
        ));
    }

    // 4. Embedding model
    let embedding_model = config
        .embedding
        .model
        .as_deref()
        .unwrap_or_else(|| provider.default_embedding_model());
    checks.push(CheckResult::pass(
        "embedding_model",
        format!(
            "{embedding_model} at {}",
            config
                .embedding
                .base_url
                .as_deref()
                .unwrap_or_else(|| config.llm.base_url())
        ),
    ));

    // 5. Base branch
    let base = &config.review.base_branch;
    match &repo {
        Some(repo) => match repo.revparse_single(base) {
            Ok(obj) => {
                let short = obj.id().to_string();
                checks.push(CheckResult::pass(
                    "base_branch",
                    format!("{base} resolves to {}", &short[..short.len().min(8)]),
                ));
            }
            Err(_) => checks.push(CheckResult::fail(
                "base_branch",
                format!("{base} not found"),
                "pass --base-branch or set review.base_branch in .beatrica.toml",
            )),
        },
        None => checks.push(CheckResult::info("base_branch", "skipped (no repository)")),
    }

    // 6. Change index
    let index_root = repo
        .as_ref()
        .and_then(|r| r.workdir())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.clone());
    let index_path = index_root.join(&config.review.cache_dir).join("index.db");
    if index_path.exists() {
        checks.push(CheckResult::info(
            "change_index",
            format!("kept from a previous run at {}", index_path.display()),
        ));
    } else {
        checks.push(CheckResult::info("change_index", "not present (built on review)"));
    }

    // Output
    match format {
        OutputFormat::Json => {
            let version = env!("CARGO_PKG_VERSION");
            let json = serde_json::json!({
                "version": version,
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        _ => {
            let version = env!("CARGO_PKG_VERSION");
            println!("Beatrica v{version}: environment check\n");

            for check in &checks {
                let sym = if use_color {
                    check.colored_symbol()
                } else {
                    check.symbol().to_string()
                };
                let label = check.name.replace('_', " ");
                println!("  {sym} {label:<20} {}", check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }

            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            let info = checks.iter().filter(|c| c.status == "info").count();
            println!("\n{passed} checks passed, {failed} failed, {info} info");
        }
    }

    Ok(())
}

const DEFAULT_CONFIG_PATH: &str = ".beatrica.toml";

const DEFAULT_CONFIG: &str = r#"# Beatrica Configuration
# See: https://github.com/chigwell/beatrica

[llm]
# provider = "openai"        # or "mistralai"
# model = "gpt-4-0125-preview"
# api_key = "..."            # prefer LLM_API_KEY or OPENAI_API_KEY / MISTRAL_API_KEY
# base_url = "https://api.openai.com/v1"
# max_tokens = 500

[embedding]
# model = "text-embedding-3-small"
# api_key = "..."            # defaults to the [llm] key
# base_url = "https://api.openai.com/v1"
# chunk_lines = 40
# chunk_overlap = 5

[review]
# base_branch = "main"
# output = "console"         # or a file path; "" writes beatrica_review.txt
# top_k = 6
# cache_dir = ".beatrica"

# Prompt overrides, one table per stage:
# get_changes, can_review, make_review, aggregate_review_points
# [prompts.make_review]
# question = "You are a strict code reviewer. The change is: "
# expected_answer = "Write the answer in the following format: <point>...</point>"
# expected_pattern = "<point>(.*?)</point>"
"#;

/// Drives one progress bar per review phase on stderr.
struct ProgressReporter {
    enabled: bool,
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressReporter {
    fn new(enabled: bool) -> Self {
        Self { enabled, bar: None }
    }
}

impl ReviewObserver for ProgressReporter {
    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PhaseStarted { phase, total } => {
                if !self.enabled {
                    return;
                }
                let pb = indicatif::ProgressBar::new(*total as u64);
                if let Ok(style) = indicatif::ProgressStyle::with_template(
                    "{msg} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})",
                ) {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb.set_message(phase.to_string());
                self.bar = Some(pb);
            }
            ProgressEvent::ItemFinished { .. } => {
                if let Some(pb) = &self.bar {
                    pb.inc(1);
                }
            }
            ProgressEvent::PhaseFinished { .. } => {
                if let Some(pb) = self.bar.take() {
                    pb.finish_and_clear();
                }
            }
        }
    }
}

fn spinner(enabled: bool, message: &'static str) -> Option<indicatif::ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

#[allow(clippy::too_many_arguments)]
fn apply_review_flags(
    config: &mut BeatricaConfig,
    base_branch: Option<String>,
    llm_type: Option<LlmProvider>,
    model_name: Option<String>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    output: Option<String>,
    top_k: Option<usize>,
) -> Result<()> {
    if let Some(base_branch) = base_branch {
        config.review.base_branch = base_branch;
    }
    if let Some(provider) = llm_type {
        if provider != config.llm.provider {
            // Provider defaults apply unless the model and endpoint are given again.
            config.llm.base_url = None;
            if model_name.is_none() {
                config.llm.model = None;
            }
        }
        config.llm.provider = provider;
    }
    if let Some(model_name) = model_name.filter(|m| !m.is_empty()) {
        config.llm.model = Some(model_name);
    }
    if let Some(api_key) = api_key.filter(|k| !k.is_empty()) {
        config.llm.api_key = Some(api_key);
    }
    if let Some(max_tokens) = max_tokens {
        config.llm.max_tokens = max_tokens;
    }
    if let Some(output) = output {
        config.review.output = output;
    }
    if let Some(top_k) = top_k {
        config.review.top_k = top_k;
    }
    config.validate()?;
    Ok(())
}

struct ReviewRun<'a> {
    config: &'a BeatricaConfig,
    prompts: &'a PromptCatalog,
    repo: &'a Path,
    keep_cache: bool,
    format: OutputFormat,
    use_color: bool,
    verbose: bool,
}

async fn run_review(run: ReviewRun<'_>) -> Result<()> {
    let config = run.config;
    let base_branch = &config.review.base_branch;
    let show_progress = std::io::stderr().is_terminal();

    let mut tracker = DiffTracker::open(run.repo)?;
    tracker.analyze(base_branch)?;
    let changes = tracker.to_changes();
    if changes.is_empty() {
        eprintln!("No changes found. Exiting.");
        return Ok(());
    }
    eprintln!("\u{2705}  Changes tracked.");

    let llm = LlmClient::new(&config.llm)?;
    let embedding = EmbeddingClient::with_config(&config.embedding, &config.llm)?;
    let settings = ReviewSettings::new(base_branch.clone(), llm.provider(), llm.model());
    let target = ReportTarget::from_output(
        &config.review.output,
        &std::env::current_dir().into_diagnostic()?,
    );

    let root = tracker.workdir().unwrap_or(run.repo);
    let cache_path = root.join(&config.review.cache_dir).join("index.db");
    let chunk_options = ChunkOptions {
        max_lines: config.embedding.chunk_lines,
        overlap: config.embedding.chunk_overlap,
    };

    let pb = spinner(show_progress, "Generating embeddings...");
    let (chain, index_stats) = RetrievalChain::build(
        &changes,
        llm,
        embedding,
        &cache_path,
        config.review.top_k,
        chunk_options,
    )
    .await
    .inspect_err(|_e| {
        if let Some(pb) = &pb {
            pb.finish_with_message("Failed");
        }
    })?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    eprintln!("\u{2705}  Found {} change(s).", changes.len());
    tracing::debug!(
        chunks = index_stats.total_chunks,
        bytes = index_stats.index_size_bytes,
        "change index built"
    );

    let mut reporter = ProgressReporter::new(show_progress);
    let mut orchestrator = ReviewOrchestrator::new(&chain, run.prompts, settings.clone())
        .with_observer(&mut reporter);
    let outcome = match orchestrator.enumerate().await {
        Ok(candidates) => {
            if !candidates.is_empty() {
                eprintln!("\u{2705} {} change(s) found for review.", candidates.len());
            }
            orchestrator.review(candidates).await
        }
        Err(e) => Err(e),
    };

    if run.keep_cache {
        tracing::debug!(path = %cache_path.display(), "keeping change index");
    } else if let Err(e) = chain.delete_cache() {
        tracing::warn!(error = %e, "failed to delete change index");
    }

    let report = match outcome? {
        ReviewOutcome::NothingToReview { .. } => {
            eprintln!(
                "\u{26a0}\u{fe0f} Beatrica with {} cannot make a review. This is likely due to the changes being too small or not code changes. Please try again with a different branch or more changes.",
                settings.model_label()
            );
            return Ok(());
        }
        ReviewOutcome::Reviewed(report) => report,
    };

    if run.verbose {
        let stats = &report.stats;
        eprintln!("--- Review Stats ---");
        eprintln!(
            "Candidates: {} ({} placeholders dropped), reviewable: {}",
            stats.candidates, stats.placeholders_dropped, stats.reviewable
        );
        eprintln!(
            "Review points: {} ({} aggregated, {} kept raw)",
            stats.points, stats.aggregated, stats.fallbacks
        );
        eprintln!("LLM calls: {}", stats.llm_calls);
        eprintln!("--------------------");
    }

    let rows = report::build_rows(&report.reviews);
    match target {
        ReportTarget::Console => {
            let rendered = report::render(&rows, &report.reviews, run.format, run.use_color)?;
            print!("{rendered}");
        }
        ReportTarget::File(path) => {
            report::append_to_file(&path, &rows)?;
            eprintln!("\u{2705}  Reviews saved to {}", path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = if cli.config.is_some() || config_path.exists() {
        BeatricaConfig::from_file(&config_path)?
    } else {
        BeatricaConfig::default()
    };

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    if cli.verbose {
        eprintln!("format: {}", cli.format);
        if !config.prompts.is_empty() {
            let mut stages: Vec<&str> = config.prompts.keys().map(String::as_str).collect();
            stages.sort_unstable();
            eprintln!("Prompt overrides: {}", stages.join(", "));
        }
    }

    match cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Review {
            base_branch,
            llm_type,
            model_name,
            api_key,
            max_tokens,
            output,
            repo,
            top_k,
            keep_cache,
        }) => {
            apply_review_flags(
                &mut config,
                base_branch,
                llm_type,
                model_name,
                api_key,
                max_tokens,
                output,
                top_k,
            )?;
            let prompts = PromptCatalog::with_overrides(&config.prompts)?;
            run_review(ReviewRun {
                config: &config,
                prompts: &prompts,
                repo: &repo,
                keep_cache,
                format: cli.format,
                use_color,
                verbose: cli.verbose,
            })
            .await?;
        }
        Some(Command::Init) => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                miette::bail!(".beatrica.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .beatrica.toml with default configuration");
        }
        Some(Command::Doctor) => {
            run_doctor(&config, &config_path, cli.format, use_color)?;
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "beatrica", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_to_defaults() {
        let config = BeatricaConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.review.base_branch, "main");
        assert_eq!(config.review.output, "console");
        assert!(config.prompts.is_empty());
    }

    #[test]
    fn cli_parses_review_flags() {
        let cli = Cli::try_parse_from([
            "beatrica",
            "review",
            "--base-branch",
            "develop",
            "--llm-type",
            "mistralai",
            "--max-tokens",
            "800",
            "--output",
            "",
        ])
        .unwrap();

        match cli.command {
            Some(Command::Review {
                base_branch,
                llm_type,
                max_tokens,
                output,
                ..
            }) => {
                assert_eq!(base_branch.as_deref(), Some("develop"));
                assert_eq!(llm_type, Some(LlmProvider::MistralAi));
                assert_eq!(max_tokens, Some(800));
                assert_eq!(output.as_deref(), Some(""));
            }
            _ => panic!("expected review command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["beatrica", "review", "--llm-type", "anthropic"]).is_err());
    }

    #[test]
    fn switching_provider_resets_model_and_endpoint() {
        let mut config = BeatricaConfig::default();
        config.llm.model = Some("gpt-4o".into());
        config.llm.base_url = Some("https://proxy.local/v1".into());

        apply_review_flags(
            &mut config,
            None,
            Some(LlmProvider::MistralAi),
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();

        assert_eq!(config.llm.model_name(), "mistral-large-latest");
        assert_eq!(config.llm.base_url(), "https://api.mistral.ai/v1");
    }

    #[test]
    fn flags_override_config_values() {
        let mut config = BeatricaConfig::default();
        apply_review_flags(
            &mut config,
            Some("develop".into()),
            None,
            Some("gpt-4o".into()),
            Some("key".into()),
            Some(900),
            Some("out.txt".into()),
            Some(3),
        )
        .unwrap();

        assert_eq!(config.review.base_branch, "develop");
        assert_eq!(config.llm.model_name(), "gpt-4o");
        assert_eq!(config.llm.api_key.as_deref(), Some("key"));
        assert_eq!(config.llm.max_tokens, 900);
        assert_eq!(config.review.output, "out.txt");
        assert_eq!(config.review.top_k, 3);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let mut config = BeatricaConfig::default();
        let result = apply_review_flags(&mut config, None, None, None, None, None, None, Some(0));
        assert!(result.is_err());
    }
}
