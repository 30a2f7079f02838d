//! Text normalization for the guard pipeline.
//!
//! Produces one canonical form so detectors see what the recipient would
//! see, without letting attacker input amplify into resource exhaustion.
//!
//! ## Fixed order of operations
//!
//! 1. URL decode, at most two passes (double encoding), fixed-point aware
//! 2. HTML entity decode, gated by entity count and output length
//! 3. Unicode NFKC
//! 4. Obfuscation expansion (`[at]`/`(at)`/word `at` -> `@`, `dot` -> `.`)
//! 5. Zero-width character strip
//! 6. Control character strip (category C except `\n`, `\r`, `\t`)
//! 7. Newline normalization (CRLF -> LF)
//!
//! Each step appends a tag to [`NormalizationResult::steps`] only when it
//! actually mutated the text. A soft 100 ms wall budget is checked before
//! the HTML pass; overrunning it records an anomaly and skips that pass
//! while the remaining steps still run. Anomalies are diagnostics, never
//! errors - the pipeline continues with the partially-normalized text.

use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use unicode_normalization::{is_nfkc_quick, IsNormalized, UnicodeNormalization};

/// Soft wall-clock budget for one normalization run.
const TIME_BUDGET: Duration = Duration::from_millis(100);

/// Maximum URL-decode passes; deeper nesting is deliberately left as-is.
const URL_DECODE_MAX_PASSES: usize = 2;

/// Default HTML entity budget.
pub const DEFAULT_MAX_UNESCAPE: usize = 1000;

const ZERO_WIDTH_CHARS: [char; 7] = [
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{200E}', // left-to-right mark
    '\u{200F}', // right-to-left mark
    '\u{2060}', // word joiner
    '\u{FEFF}', // byte-order mark
];

static HTML_ENTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(?:[a-zA-Z]+|#x?[0-9a-fA-F]+);").unwrap());

static ENTITY_DECODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

static AT_OBFUSCATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[at\]|\(at\)|\{at\}|\bat\b").unwrap());

static DOT_OBFUSCATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[dot\]|\(dot\)|\{dot\}|\bdot\b").unwrap());

static WS_BEFORE_AT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+@").unwrap());
static WS_AFTER_AT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\s+").unwrap());
static WS_BEFORE_DOT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\.").unwrap());
static WS_AFTER_DOT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.\s+").unwrap());

/// Outcome of the normalization stage.
#[derive(Debug, Clone, Default)]
pub struct NormalizationResult {
    /// The canonical text all downstream stages operate on.
    pub text: String,

    /// Tags of the steps that mutated the text, in execution order.
    pub steps: Vec<String>,

    /// HTML entities counted before the decode pass (0 when skipped for
    /// time).
    pub entity_count: usize,

    /// Non-fatal anomalies observed during normalization.
    pub anomalies: Vec<String>,
}

/// Normalize with the default entity budget.
pub fn normalize(value: &str) -> NormalizationResult {
    normalize_text(value, DEFAULT_MAX_UNESCAPE)
}

/// Normalize `value` for downstream detectors.
///
/// `max_unescape` bounds both the number of HTML entities processed and
/// (doubled) the decoded output length.
pub fn normalize_text(value: &str, max_unescape: usize) -> NormalizationResult {
    let started = Instant::now();
    let mut steps: Vec<String> = Vec::new();
    let mut anomalies: Vec<String> = Vec::new();
    let mut entity_count = 0usize;

    // Step 1: URL decode
    let (decoded, mutated, mut url_anomalies) = safe_url_decode(value, URL_DECODE_MAX_PASSES);
    anomalies.append(&mut url_anomalies);
    if mutated {
        steps.push("url_decode".to_string());
    }
    let mut text = decoded;

    // Step 2: HTML entity decode, inside the time budget
    let elapsed = started.elapsed();
    if elapsed > TIME_BUDGET {
        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            "normalization time budget exceeded before html unescape"
        );
        anomalies.push(format!(
            "time_budget_exceeded_at_html_unescape: {:.3}s",
            elapsed.as_secs_f64()
        ));
    } else {
        entity_count = count_html_entities(&text);
        let (unescaped, mutated, mut html_anomalies) =
            html_unescape_limited(&text, max_unescape, max_unescape * 2);
        anomalies.append(&mut html_anomalies);
        if mutated {
            steps.push("html_unescape".to_string());
        }
        text = unescaped;
    }

    // Step 3: Unicode NFKC
    if is_nfkc_quick(text.chars()) != IsNormalized::Yes {
        let normalized: String = text.nfkc().collect();
        if normalized != text {
            steps.push("nfkc".to_string());
            text = normalized;
        }
    }

    // Step 4: Obfuscation expansion
    let (expanded, mutated) = expand_obfuscations(&text);
    if mutated {
        steps.push("expand_obfuscation".to_string());
        text = expanded;
    }

    // Step 5: Zero-width strip
    if text.chars().any(|c| ZERO_WIDTH_CHARS.contains(&c)) {
        text = text.chars().filter(|c| !ZERO_WIDTH_CHARS.contains(c)).collect();
        steps.push("strip_zero_width".to_string());
    }

    // Step 6: Control character strip
    if text.chars().any(is_stripped_control) {
        text = text.chars().filter(|c| !is_stripped_control(*c)).collect();
        steps.push("strip_control".to_string());
    }

    // Step 7: Newline normalization
    if text.contains("\r\n") {
        text = text.replace("\r\n", "\n");
        steps.push("normalize_newlines".to_string());
    }

    let elapsed = started.elapsed();
    if elapsed > TIME_BUDGET {
        anomalies.push(format!("total_time_exceeded: {:.3}s", elapsed.as_secs_f64()));
    }

    debug!(
        steps = ?steps,
        length = text.len(),
        entity_count,
        anomaly_count = anomalies.len(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "normalized text"
    );

    NormalizationResult {
        text,
        steps,
        entity_count,
        anomalies,
    }
}

/// URL decode with protection against excessive nested encoding.
///
/// Returns `(decoded, was_modified, anomalies)`. Percent sequences that do
/// not form valid UTF-8 decode lossily rather than failing.
fn safe_url_decode(value: &str, max_passes: usize) -> (String, bool, Vec<String>) {
    let mut anomalies = Vec::new();
    let mut current = value.to_string();
    let mut passes = 0usize;

    while passes < max_passes {
        let decoded = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
        passes += 1;
    }

    if passes >= max_passes {
        anomalies.push("url_decode_max_passes_reached".to_string());
    }

    let modified = current != value;
    (current, modified, anomalies)
}

fn count_html_entities(value: &str) -> usize {
    HTML_ENTITY_REGEX.find_iter(value).count()
}

/// HTML unescape bounded by entity count and output length.
///
/// Only standard named and numeric entities are processed; anything
/// unrecognized is left untouched. When either bound trips, the input is
/// returned unchanged and an anomaly is recorded.
fn html_unescape_limited(
    value: &str,
    max_entities: usize,
    max_output_len: usize,
) -> (String, bool, Vec<String>) {
    let mut anomalies = Vec::new();

    let entity_count = count_html_entities(value);
    if entity_count > max_entities {
        anomalies.push(format!(
            "html_entity_count_exceeded: {entity_count} > {max_entities}"
        ));
        warn!(entity_count, max_entities, "html unescape skipped");
        return (value.to_string(), false, anomalies);
    }

    let unescaped = decode_entities(value);
    if unescaped.chars().count() > max_output_len {
        anomalies.push(format!(
            "html_output_length_exceeded: {} > {max_output_len}",
            unescaped.chars().count()
        ));
        warn!(
            output_len = unescaped.chars().count(),
            max_output_len, "html unescape skipped"
        );
        return (value.to_string(), false, anomalies);
    }

    let changed = unescaped != value;
    if changed {
        let remaining = count_html_entities(&unescaped);
        if remaining > 0 && remaining < entity_count {
            anomalies.push(format!("double_encoding_detected: {remaining} entities remain"));
        }
    }

    (unescaped, changed, anomalies)
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    ENTITY_DECODE_REGEX
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let inner = &caps[1];
            if let Some(hex) = inner.strip_prefix("#x").or_else(|| inner.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map_or_else(|| caps[0].to_string(), |c| c.to_string())
            } else if let Some(dec) = inner.strip_prefix('#') {
                dec.parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map_or_else(|| caps[0].to_string(), |c| c.to_string())
            } else {
                named_entity(inner).map_or_else(|| caps[0].to_string(), str::to_string)
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "copy" => "\u{00A9}",
        "reg" => "\u{00AE}",
        "trade" => "\u{2122}",
        "euro" => "\u{20AC}",
        "pound" => "\u{00A3}",
        "yen" => "\u{00A5}",
        "cent" => "\u{00A2}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "laquo" => "\u{00AB}",
        "raquo" => "\u{00BB}",
        "hellip" => "\u{2026}",
        "bull" => "\u{2022}",
        "middot" => "\u{00B7}",
        _ => return None,
    })
}

/// Expand `[at]`/`(at)`/`{at}`/word `at` to `@` (same for `dot` -> `.`)
/// and collapse whitespace adjacent to `@` or `.`.
fn expand_obfuscations(value: &str) -> (String, bool) {
    let mut current = AT_OBFUSCATION_REGEX.replace_all(value, "@").into_owned();
    current = DOT_OBFUSCATION_REGEX.replace_all(&current, ".").into_owned();
    current = WS_BEFORE_AT_REGEX.replace_all(&current, "@").into_owned();
    current = WS_AFTER_AT_REGEX.replace_all(&current, "@").into_owned();
    current = WS_BEFORE_DOT_REGEX.replace_all(&current, ".").into_owned();
    current = WS_AFTER_DOT_REGEX.replace_all(&current, ".").into_owned();
    let changed = current != value;
    (current, changed)
}

/// True for characters the normalizer strips: general category C code
/// points (controls, format chars, private use) other than `\n`, `\r`,
/// `\t`. Zero-width characters are handled in their own step but are
/// covered here as well so the invariant holds regardless of ordering.
fn is_stripped_control(c: char) -> bool {
    if matches!(c, '\n' | '\r' | '\t') {
        return false;
    }
    if c.is_control() {
        return true;
    }
    matches!(
        c,
        // Format (Cf)
        '\u{00AD}'
        | '\u{0600}'..='\u{0605}'
        | '\u{061C}'
        | '\u{06DD}'
        | '\u{070F}'
        | '\u{08E2}'
        | '\u{180E}'
        | '\u{200B}'..='\u{200F}'
        | '\u{202A}'..='\u{202E}'
        | '\u{2060}'..='\u{2064}'
        | '\u{2066}'..='\u{206F}'
        | '\u{FEFF}'
        | '\u{FFF9}'..='\u{FFFB}'
        | '\u{110BD}'
        | '\u{110CD}'
        | '\u{13430}'..='\u{13438}'
        | '\u{1BCA0}'..='\u{1BCA3}'
        | '\u{1D173}'..='\u{1D17A}'
        | '\u{E0001}'
        | '\u{E0020}'..='\u{E007F}'
        // Private use (Co)
        | '\u{E000}'..='\u{F8FF}'
        | '\u{F0000}'..='\u{FFFFD}'
        | '\u{100000}'..='\u{10FFFD}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii_is_untouched() {
        let result = normalize("hello world");
        assert_eq!(result.text, "hello world");
        assert!(result.steps.is_empty());
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn single_url_encoding_is_decoded() {
        let result = normalize("a%20b");
        assert_eq!(result.text, "a b");
        assert!(result.steps.contains(&"url_decode".to_string()));
    }

    #[test]
    fn double_url_encoding_takes_two_passes() {
        let result = normalize("%2520");
        assert_eq!(result.text, " ");
    }

    #[test]
    fn triple_url_encoding_is_left_partially_decoded() {
        let result = normalize("%252520");
        assert_eq!(result.text, "%20");
        assert!(result
            .anomalies
            .contains(&"url_decode_max_passes_reached".to_string()));
    }

    #[test]
    fn html_entities_are_decoded() {
        let result = normalize("a &amp; b &lt;tag&gt;");
        assert_eq!(result.text, "a & b <tag>");
        assert!(result.steps.contains(&"html_unescape".to_string()));
        assert_eq!(result.entity_count, 3);
    }

    #[test]
    fn numeric_entities_decode_in_decimal_and_hex() {
        assert_eq!(normalize("&#105;gnore").text, "ignore");
        assert_eq!(normalize("&#x69;gnore").text, "ignore");
    }

    #[test]
    fn unknown_entities_are_preserved() {
        let result = normalize("&foobar; stays");
        assert_eq!(result.text, "&foobar; stays");
    }

    #[test]
    fn entity_flood_skips_the_html_pass() {
        let flood = "&amp;".repeat(2000);
        let result = normalize_text(&flood, 10);
        assert_eq!(result.text, flood);
        assert!(!result.steps.contains(&"html_unescape".to_string()));
        assert_eq!(result.entity_count, 2000);
        assert!(result
            .anomalies
            .iter()
            .any(|a| a.starts_with("html_entity_count_exceeded")));
    }

    #[test]
    fn double_encoded_entities_are_reported() {
        // &amp;lt; decodes to &lt; - one entity remains of two.
        let result = normalize("&amp;lt; and &amp;");
        assert!(result
            .anomalies
            .iter()
            .any(|a| a.starts_with("double_encoding_detected")));
    }

    #[test]
    fn nfkc_folds_fullwidth_letters() {
        let result = normalize("\u{FF21}\u{FF22}\u{FF23}");
        assert_eq!(result.text, "ABC");
        assert!(result.steps.contains(&"nfkc".to_string()));
    }

    #[test]
    fn obfuscated_email_is_expanded() {
        let result = normalize("john [at] example [dot] com");
        assert_eq!(result.text, "john@example.com");
        assert!(result.steps.contains(&"expand_obfuscation".to_string()));
    }

    #[test]
    fn word_at_and_dot_are_expanded() {
        let result = normalize("john at example dot com");
        assert_eq!(result.text, "john@example.com");
    }

    #[test]
    fn zero_width_characters_are_stripped() {
        let result = normalize("se\u{200B}cret\u{FEFF}");
        assert_eq!(result.text, "secret");
        assert!(result.steps.contains(&"strip_zero_width".to_string()));
    }

    #[test]
    fn control_characters_are_stripped_except_whitespace() {
        let result = normalize("a\u{0007}b\nc\td\re");
        assert_eq!(result.text, "ab\nc\td\re");
        assert!(result.steps.contains(&"strip_control".to_string()));
    }

    #[test]
    fn bidi_and_private_use_characters_are_stripped() {
        let result = normalize("x\u{202E}y\u{E123}z");
        assert_eq!(result.text, "xyz");
    }

    #[test]
    fn crlf_becomes_lf() {
        let result = normalize("line1\r\nline2");
        assert_eq!(result.text, "line1\nline2");
        assert!(result.steps.contains(&"normalize_newlines".to_string()));
    }

    #[test]
    fn output_never_contains_stripped_characters() {
        let nasty = "a\u{200B}b\u{200F}c\u{2060}d\u{FEFF}e\u{0001}f\u{202A}g";
        let result = normalize(nasty);
        for c in result.text.chars() {
            assert!(!ZERO_WIDTH_CHARS.contains(&c));
            assert!(!is_stripped_control(c), "kept {c:?}");
        }
    }

    #[test]
    fn canonical_text_is_a_fixed_point() {
        for input in [
            "plain text with no tricks",
            "john [at] example [dot] com",
            "a%20b &amp; c\r\nd\u{200B}",
        ] {
            let once = normalize(input);
            let twice = normalize(&once.text);
            assert_eq!(twice.text, once.text, "not a fixed point for {input:?}");
        }
    }

    #[test]
    fn empty_input_normalizes_to_empty() {
        let result = normalize("");
        assert_eq!(result.text, "");
        assert!(result.steps.is_empty());
    }
}
