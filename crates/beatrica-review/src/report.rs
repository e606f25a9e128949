//! Turns the aggregated review into display rows and renders them.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use beatrica_core::{
    BeatricaError, OutputFormat, ReportRow, CONSOLE_OUTPUT, DEFAULT_OUTPUT_FILE,
};
use regex::Regex;

use crate::pipeline::AggregatedReview;

/// Header written when the report file is created.
pub const FILE_HEADER: &str = "Commit ID,Change Description,Review\n";

/// Shown instead of an empty table.
pub const NO_COMMENTS: &str = "No comments in the review";

const MISSING_COMMIT_ID: &str = "N/A";
const COMMIT_WIDTH: usize = 20;
const REVIEW_WIDTH: usize = 50;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<]+?>").unwrap());

/// Where the report goes.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use beatrica_review::report::ReportTarget;
///
/// let cwd = Path::new("/work");
/// assert_eq!(ReportTarget::from_output("console", cwd), ReportTarget::Console);
/// assert_eq!(
///     ReportTarget::from_output("", cwd),
///     ReportTarget::File(PathBuf::from("/work/beatrica_review.txt"))
/// );
/// assert_eq!(
///     ReportTarget::from_output("out.txt", cwd),
///     ReportTarget::File(PathBuf::from("out.txt"))
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportTarget {
    /// Interactive display on stdout.
    Console,
    /// Append to a text file.
    File(PathBuf),
}

impl ReportTarget {
    /// Interpret the `output` setting. An empty value selects
    /// `beatrica_review.txt` in `cwd`.
    pub fn from_output(output: &str, cwd: &Path) -> Self {
        match output {
            CONSOLE_OUTPUT => ReportTarget::Console,
            "" => ReportTarget::File(cwd.join(DEFAULT_OUTPUT_FILE)),
            path => ReportTarget::File(PathBuf::from(path)),
        }
    }
}

/// Build display rows, one per change, in review order.
///
/// Empty commit ids become `"N/A"`, markup is stripped from descriptions,
/// leading whitespace is trimmed, raw points are joined with spaces.
///
/// # Examples
///
/// ```
/// use beatrica_core::ReviewCandidate;
/// use beatrica_review::pipeline::{AggregatedReview, ReviewBody};
/// use beatrica_review::report::build_rows;
///
/// let mut reviews = AggregatedReview::new();
/// reviews.insert(
///     ReviewCandidate::new("", "  <b>renamed</b> foo"),
///     ReviewBody::Points(vec!["ok".into(), "add docs".into()]),
/// );
/// let rows = build_rows(&reviews);
/// assert_eq!(rows[0].commit_id, "N/A");
/// assert_eq!(rows[0].change_description, "renamed foo");
/// assert_eq!(rows[0].review, "ok add docs");
/// ```
pub fn build_rows(reviews: &AggregatedReview) -> Vec<ReportRow> {
    reviews
        .iter()
        .map(|(change, body)| {
            let commit_id = if change.commit_id.is_empty() {
                MISSING_COMMIT_ID.to_string()
            } else {
                change.commit_id.clone()
            };
            let description = TAG_RE.replace_all(&change.change_description, "");

            ReportRow {
                commit_id,
                change_description: description.trim_start().to_string(),
                review: body.text().trim_start().to_string(),
            }
        })
        .collect()
}

/// Render rows for the console in the given format.
///
/// With no rows, text and markdown output show the (empty) review mapping
/// followed by [`NO_COMMENTS`]; JSON output is an empty array.
///
/// # Errors
///
/// Returns [`BeatricaError::Serialization`] if JSON encoding fails.
pub fn render(
    rows: &[ReportRow],
    reviews: &AggregatedReview,
    format: OutputFormat,
    use_color: bool,
) -> Result<String, BeatricaError> {
    if rows.is_empty() && format != OutputFormat::Json {
        return Ok(format!("{reviews:?}\n{NO_COMMENTS}\n"));
    }

    Ok(match format {
        OutputFormat::Text => render_table(rows, use_color),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(rows)?),
        OutputFormat::Markdown => render_markdown(rows),
    })
}

/// Three-column table: commit ids fold at 20 columns, reviews wrap at 50.
pub fn render_table(rows: &[ReportRow], use_color: bool) -> String {
    let paint = |code: &str, text: &str| {
        if use_color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    };

    let cells: Vec<[Vec<String>; 3]> = rows
        .iter()
        .map(|row| {
            [
                fold(&row.commit_id, COMMIT_WIDTH),
                row.change_description.lines().map(str::to_string).collect(),
                wrap(&row.review, REVIEW_WIDTH),
            ]
        })
        .collect();

    let headers = ["Commit ID", "Change Description", "Review"];
    let mut widths = [COMMIT_WIDTH, headers[1].len(), REVIEW_WIDTH];
    for row in &cells {
        for line in &row[1] {
            widths[1] = widths[1].max(line.chars().count());
        }
    }

    let border = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{left}{}{right}\n", segments.join(mid))
    };

    let mut out = String::new();
    out.push_str(&border("┌", "┬", "┐"));
    out.push('│');
    for (header, width) in headers.iter().zip(widths) {
        let _ = write!(out, " {} │", paint("1;35", &pad(header, width)));
    }
    out.push('\n');
    out.push_str(&border("├", "┼", "┤"));

    let styles = ["2", "36", "32"];
    for row in &cells {
        let height = row.iter().map(Vec::len).max().unwrap_or(0).max(1);
        for i in 0..height {
            out.push('│');
            for ((column, width), style) in row.iter().zip(widths).zip(styles) {
                let text = column.get(i).map(String::as_str).unwrap_or("");
                let _ = write!(out, " {} │", paint(style, &pad(text, width)));
            }
            out.push('\n');
        }
    }
    out.push_str(&border("└", "┴", "┘"));
    out
}

/// Markdown table; pipes are escaped and newlines become `<br>`.
pub fn render_markdown(rows: &[ReportRow]) -> String {
    let cell = |text: &str| text.replace('|', "\\|").replace('\n', "<br>");

    let mut out = String::from("| Commit ID | Change Description | Review |\n|---|---|---|\n");
    for row in rows {
        let _ = writeln!(
            out,
            "| {} | {} | {} |",
            cell(&row.commit_id),
            cell(&row.change_description),
            cell(&row.review)
        );
    }
    out
}

/// Append rows to `path`, writing [`FILE_HEADER`] first if the file does
/// not exist yet. Rows are written as tuple literals with no separator
/// between them.
///
/// # Errors
///
/// Returns [`BeatricaError::Io`] if the file cannot be created or written.
///
/// # Examples
///
/// ```
/// use beatrica_core::ReportRow;
/// use beatrica_review::report::append_to_file;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("review.txt");
/// let rows = vec![ReportRow {
///     commit_id: "abc123".into(),
///     change_description: "renamed foo".into(),
///     review: "looks good".into(),
/// }];
/// append_to_file(&path, &rows).unwrap();
/// let text = std::fs::read_to_string(&path).unwrap();
/// assert_eq!(
///     text,
///     "Commit ID,Change Description,Review\n('abc123', 'renamed foo', 'looks good')"
/// );
/// ```
pub fn append_to_file(path: &Path, rows: &[ReportRow]) -> Result<(), BeatricaError> {
    let is_new = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    if is_new {
        file.write_all(FILE_HEADER.as_bytes())?;
    }
    for row in rows {
        file.write_all(row_literal(row).as_bytes())?;
    }
    file.flush()?;
    Ok(())
}

/// `('<commit_id>', '<description>', '<review>')`
fn row_literal(row: &ReportRow) -> String {
    format!(
        "({}, {}, {})",
        quote(&row.commit_id),
        quote(&row.change_description),
        quote(&row.review)
    )
}

/// Single-quoted string literal, or double-quoted when the text holds a
/// single quote and no double quote.
fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    format!("{text}{}", " ".repeat(width.saturating_sub(len)))
}

/// Hard-fold every line at `width` characters.
fn fold(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
        }
        for piece in chars.chunks(width) {
            lines.push(piece.iter().collect());
        }
    }
    lines
}

/// Word-wrap at `width`, folding words longer than the width.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            for piece in fold(word, width) {
                let needed = if current.is_empty() {
                    piece.chars().count()
                } else {
                    current.chars().count() + 1 + piece.chars().count()
                };
                if needed > width && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&piece);
            }
        }
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReviewBody;
    use beatrica_core::ReviewCandidate;
    use pretty_assertions::assert_eq;

    fn row(commit: &str, description: &str, review: &str) -> ReportRow {
        ReportRow {
            commit_id: commit.into(),
            change_description: description.into(),
            review: review.into(),
        }
    }

    #[test]
    fn rows_follow_review_order_and_sanitize() {
        let mut reviews = AggregatedReview::new();
        reviews.insert(
            ReviewCandidate::new("b2", "\n  second <i>change</i>"),
            ReviewBody::Aggregated("  merged".into()),
        );
        reviews.insert(
            ReviewCandidate::new("a1", "first"),
            ReviewBody::Points(vec!["x".into(), "y".into()]),
        );

        assert_eq!(
            build_rows(&reviews),
            vec![row("b2", "second change", "merged"), row("a1", "first", "x y")]
        );
    }

    #[test]
    fn whitespace_commit_id_is_kept() {
        let mut reviews = AggregatedReview::new();
        reviews.insert(
            ReviewCandidate::new(" ", "d"),
            ReviewBody::Aggregated("r".into()),
        );
        assert_eq!(build_rows(&reviews)[0].commit_id, " ");
    }

    #[test]
    fn empty_report_prints_mapping_and_notice() {
        let reviews = AggregatedReview::new();
        let out = render(&[], &reviews, OutputFormat::Text, false).unwrap();
        assert_eq!(out, "{}\nNo comments in the review\n");

        let json = render(&[], &reviews, OutputFormat::Json, false).unwrap();
        assert_eq!(json.trim(), "[]");
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let rows = vec![row("abc", "desc", "rev")];
        let out = render(&rows, &AggregatedReview::new(), OutputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["commitId"], "abc");
        assert_eq!(value[0]["changeDescription"], "desc");
        assert_eq!(value[0]["review"], "rev");
    }

    #[test]
    fn markdown_escapes_cells() {
        let out = render_markdown(&[row("abc", "a | b", "line1\nline2")]);
        assert!(out.starts_with("| Commit ID | Change Description | Review |\n|---|---|---|\n"));
        assert!(out.contains("| abc | a \\| b | line1<br>line2 |"));
    }

    #[test]
    fn table_contains_headers_and_cells() {
        let out = render_table(&[row("abc123", "renamed foo", "looks good")], false);
        assert!(out.contains("Commit ID"));
        assert!(out.contains("Change Description"));
        assert!(out.contains("abc123"));
        assert!(out.contains("renamed foo"));
        assert!(out.contains("looks good"));
        assert!(!out.contains("\x1b["));
        let widths: Vec<usize> = out.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn table_folds_long_commit_and_wraps_review() {
        let commit = "a".repeat(40);
        let review = "word ".repeat(30);
        let out = render_table(&[row(&commit, "d", review.trim())], false);
        assert!(out.contains(&"a".repeat(20)));
        assert!(!out.contains(&"a".repeat(21)));
        assert!(out.lines().count() > 5);
    }

    #[test]
    fn colored_table_uses_ansi() {
        let out = render_table(&[row("abc", "d", "r")], true);
        assert!(out.contains("\x1b[1;35m"));
        assert!(out.contains("\x1b[32m"));
    }

    #[test]
    fn wrap_respects_width() {
        let lines = wrap("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        assert_eq!(wrap("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn quote_matches_tuple_literal_rules() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("it's \"x\""), "'it\\'s \"x\"'");
        assert_eq!(quote("a\nb\\c"), "'a\\nb\\\\c'");
        assert_eq!(quote("\u{1}"), "'\\x01'");
    }

    #[test]
    fn append_writes_header_once_and_no_row_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        append_to_file(&path, &[row("a", "b", "c")]).unwrap();
        append_to_file(&path, &[row("d", "e", "f"), row("g", "h", "i")]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Commit ID,Change Description,Review\n('a', 'b', 'c')('d', 'e', 'f')('g', 'h', 'i')"
        );
    }

    #[test]
    fn append_to_existing_file_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "previous run\n").unwrap();

        append_to_file(&path, &[row("a", "b", "c")]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "previous run\n('a', 'b', 'c')");
    }
}
