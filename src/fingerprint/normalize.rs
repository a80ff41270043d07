//! Failure-text normalization.
//!
//! Replaces volatile, non-diagnostic substrings with fixed placeholder tokens
//! so two failures with the same root cause hash identically. Rules run in a
//! fixed order: more specific shapes (UUIDs, ISO timestamps, temp and
//! dependency-cache paths) are rewritten before the generic ones that would
//! otherwise swallow them.

use regex::Regex;
use std::sync::LazyLock;

pub const UUID_TOKEN: &str = "<UUID>";
pub const TIMESTAMP_TOKEN: &str = "<TIMESTAMP>";
pub const EPOCH_TOKEN: &str = "<EPOCH>";
pub const DATE_TOKEN: &str = "<DATE>";
pub const TIME_TOKEN: &str = "<TIME>";
pub const TMPDIR_TOKEN: &str = "<TMPDIR>";
pub const DEPCACHE_TOKEN: &str = "<DEPCACHE>";
pub const PATH_TOKEN: &str = "<PATH>";
pub const ADDR_TOKEN: &str = "<ADDR>";
pub const PID_TOKEN: &str = "<PID>";
pub const LINE_TOKEN: &str = "<LINE>";
pub const COL_TOKEN: &str = "<COL>";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("normalization pattern must compile")
}

static UUID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
});

static ISO_TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?")
});

// Temp directories: /tmp, /var/tmp, macOS /var/folders (optionally under /private),
// and Windows %TEMP%.
static TMPDIR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?i)(?:(?:/private)?/(?:tmp|var/tmp|var/folders)(?:/[^\s:'"()\[\],]+)*|[a-z]:\\(?:[^\\\s:*?"<>|]+\\)*?(?:temp|tmp)(?:\\[^\\\s:*?"<>|]+)*)"#,
    )
});

static DEPCACHE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?:~|[a-zA-Z]:|\.{1,2})?(?:[/\\][^\s/\\:'"()\[\],]+)*[/\\](?:node_modules|\.pnpm-store|\.npm|\.yarn|\.cargo[/\\]registry|\.cargo[/\\]git|\.rustup|site-packages|\.m2[/\\]repository|\.gradle[/\\]caches|go[/\\]pkg[/\\]mod|vendor[/\\]bundle)(?:[/\\][^\s/\\:'"()\[\],]+)*"#,
    )
});

static WINDOWS_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"\b[a-zA-Z]:\\(?:[^\\\s:*?"<>|]+\\)*[^\\\s:*?"<>|]*"#));

// Requires the leading slash to start the text or follow a delimiter so
// relative fragments like `and/or` stay intact.
static UNIX_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(^|[\s'"(\[=,:@])(~?(?:/[\w.@+~-]+)+/?)"#)
});

static EPOCH_MILLIS_REGEX: LazyLock<Regex> = LazyLock::new(|| compile(r"\b\d{13}\b"));

static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|\d{4}/\d{2}/\d{2})\b")
});

static TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b\d{1,2}:\d{2}:\d{2}(?:\.\d+)?(?:\s?[ap]m)?\b|\b\d{1,2}:\d{2}\s?[ap]m\b")
});

static ADDRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| compile(r"\b0x[0-9a-fA-F]{4,}\b"));

static PID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(pid|process id|process)(\s*[:=#]?\s*)\d+\b"));

static LINE_COL_REGEX: LazyLock<Regex> = LazyLock::new(|| compile(r":\d+:\d+\b"));

static PAREN_LINE_COL_REGEX: LazyLock<Regex> = LazyLock::new(|| compile(r"\(\d+,\s*\d+\)"));

static COLON_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| compile(r"([\w>)\]]):\d+\b"));

static BARE_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(line|ln|row)(\s*)\d+\b"));

static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));

/// Normalize failure text for fingerprinting.
///
/// The result is deterministic and idempotent: `normalize(normalize(x)) ==
/// normalize(x)`.
pub fn normalize_error(text: &str) -> String {
    let s = UUID_REGEX.replace_all(text, UUID_TOKEN);
    let s = ISO_TIMESTAMP_REGEX.replace_all(&s, TIMESTAMP_TOKEN);
    let s = TMPDIR_REGEX.replace_all(&s, TMPDIR_TOKEN);
    let s = DEPCACHE_REGEX.replace_all(&s, DEPCACHE_TOKEN);
    let s = WINDOWS_PATH_REGEX.replace_all(&s, PATH_TOKEN);
    let s = UNIX_PATH_REGEX.replace_all(&s, format!("${{1}}{}", PATH_TOKEN).as_str());
    let s = EPOCH_MILLIS_REGEX.replace_all(&s, EPOCH_TOKEN);
    let s = DATE_REGEX.replace_all(&s, DATE_TOKEN);
    let s = TIME_REGEX.replace_all(&s, TIME_TOKEN);
    let s = ADDRESS_REGEX.replace_all(&s, ADDR_TOKEN);
    let s = PID_REGEX.replace_all(&s, format!("${{1}}${{2}}{}", PID_TOKEN).as_str());
    let s = LINE_COL_REGEX.replace_all(&s, format!(":{}:{}", LINE_TOKEN, COL_TOKEN).as_str());
    let s = PAREN_LINE_COL_REGEX.replace_all(&s, format!("({},{})", LINE_TOKEN, COL_TOKEN).as_str());
    let s = COLON_LINE_REGEX.replace_all(&s, format!("${{1}}:{}", LINE_TOKEN).as_str());
    let s = BARE_LINE_REGEX.replace_all(&s, format!("${{1}}${{2}}{}", LINE_TOKEN).as_str());
    let s = WHITESPACE_REGEX.replace_all(&s, " ");
    s.trim().to_string()
}
