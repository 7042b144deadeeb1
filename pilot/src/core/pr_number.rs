//! Recover a pull request number from free-form agent output.
//!
//! The agent only talks to us through text, so we try an ordered list of
//! independent matchers, most specific first, and stop at the first hit. Each
//! later matcher is more permissive than the one before it; ordering is what
//! keeps incidental `#123` mentions in verbose narration from winning.

use std::sync::LazyLock;

use regex::Regex;

/// Which heuristic produced a PR number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `.../<owner>/<repo>/pull/<n>` on any host.
    Url,
    /// `PR Number: #<n>` with optional markdown emphasis.
    LabeledField,
    /// `PR #<n>` / `Pull Request #<n>` at the start of a line or heading.
    LineStart,
    /// `PR #<n>` anywhere, except right after the word `Found`.
    Mention,
    /// Any `PR` / `Pull Request` followed eventually by digits.
    Loose,
    /// Code host lookup of the open PR for the branch.
    BranchLookup,
}

impl Strategy {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Url => "PR URL",
            Self::LabeledField => "PR Number field",
            Self::LineStart => "PR # heading",
            Self::Mention => "PR # mention",
            Self::Loose => "loose PR mention",
            Self::BranchLookup => "open PR for branch",
        }
    }
}

/// A PR number and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrMatch {
    pub number: String,
    pub strategy: Strategy,
}

type Matcher = fn(&str) -> Option<String>;

/// Text matchers in the order they are tried.
pub const TEXT_MATCHERS: [(Strategy, Matcher); 5] = [
    (Strategy::Url, match_url),
    (Strategy::LabeledField, match_labeled_field),
    (Strategy::LineStart, match_line_start),
    (Strategy::Mention, match_mention),
    (Strategy::Loose, match_loose),
];

/// Run the text matchers in order, returning the first hit.
///
/// This does not consult the code host; see `pr::resolve_pr_number` for the
/// branch lookup fallback.
pub fn extract_from_text(text: &str) -> Option<PrMatch> {
    TEXT_MATCHERS.iter().find_map(|(strategy, matcher)| {
        matcher(text).map(|number| PrMatch {
            number,
            strategy: *strategy,
        })
    })
}

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/[^/\s]+/[^/\s]+/pull/(\d+)").unwrap());

static LABELED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)PR\s+Number\s*(?:\*\*)?\s*:\s*(?:\*\*)?#?(\d+)").unwrap()
});

static LINE_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]+|[-*+][ \t]+)?(?:\*\*)?(?:PR|Pull Request)(?:\*\*)?[:\s]+(?:\*\*)?#?(\d+)",
    )
    .unwrap()
});

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:PR|Pull Request)[:\s]+(?:\*\*)?#?(\d+)").unwrap()
});

static LOOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:PR|Pull Request)[^0-9]*#?(\d+)").unwrap());

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn match_url(text: &str) -> Option<String> {
    first_capture(&URL_RE, text)
}

pub fn match_labeled_field(text: &str) -> Option<String> {
    first_capture(&LABELED_RE, text)
}

pub fn match_line_start(text: &str) -> Option<String> {
    first_capture(&LINE_START_RE, text)
}

/// Like the line-start matcher but anywhere in the text, skipping mentions
/// that echo our own `Found PR #N` status line.
pub fn match_mention(text: &str) -> Option<String> {
    let mut start = 0;
    while start <= text.len() {
        let caps = MENTION_RE.captures_at(text, start)?;
        let whole = caps.get(0)?;
        if !preceded_by_found(text, whole.start()) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
        // Retry one char later so overlapping candidates are not skipped.
        start = next_char_boundary(text, whole.start());
    }
    None
}

pub fn match_loose(text: &str) -> Option<String> {
    first_capture(&LOOSE_RE, text)
}

/// True when `text[..at]` ends with `Found` followed by one whitespace char
/// (case-insensitive).
pub fn preceded_by_found(text: &str, at: usize) -> bool {
    let before = &text[..at];
    let mut chars = before.chars();
    match chars.next_back() {
        Some(c) if c.is_whitespace() => {}
        _ => return false,
    }
    let rest = chars.as_str();
    let tail_start = rest.len().saturating_sub("found".len());
    rest.is_char_boundary(tail_start) && rest[tail_start..].eq_ignore_ascii_case("found")
}

fn next_char_boundary(text: &str, at: usize) -> usize {
    text[at..]
        .chars()
        .next()
        .map(|c| at + c.len_utf8())
        .unwrap_or(text.len() + 1)
}
