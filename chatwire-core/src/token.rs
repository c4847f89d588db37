//! Heuristic token estimation
//!
//! Nothing here runs a vendor tokenizer. Text goes through a segment-based
//! approximation; images and large files are estimated from their byte size.
//! The size constants are empirical and kept for parity with recorded usage.

use futures::future::join_all;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{error, warn};

use crate::error::Result;
use crate::file::{FileKind, FileReader, FileRef, KB, MB};
use crate::message::Message;

/// Files at or above this size are estimated without reading them.
pub const LARGE_FILE_THRESHOLD: u64 = 5 * MB;

/// Estimated tokens per KiB for large files. Unverified heuristic.
pub const LARGE_FILE_TOKENS_PER_KB: u64 = 180;

/// Bytes of image data per estimated token.
pub const IMAGE_BYTES_PER_TOKEN: u64 = 100;

/// Overlap between image accounting and prompt accounting, subtracted once
/// whenever any image tokens are present. Unverified heuristic.
pub const IMAGE_TOKEN_OVERLAP: u64 = 7;

const DEFAULT_CHARS_PER_TOKEN: f64 = 6.0;
const SHORT_SEGMENT_CHARS: usize = 3;

static SEGMENT_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+|[.,!?;(){}\[\]<>:/\\|@#$%^&*+=`~_\-]+").expect("valid segment regex")
});
static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:[.,]\d+)*$").expect("valid numeric regex"));
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.,!?;(){}\[\]<>:/\\|@#$%^&*+=`~_\-]").expect("valid punctuation regex")
});
static ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\u{C0}-\u{D6}\u{D8}-\u{F6}\u{F8}-\u{FF}]+$").expect("valid word regex")
});
static LANGUAGE_RATIOS: LazyLock<Vec<(Regex, f64)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)[äöüßẞ]").expect("valid german regex"), 3.0),
        (
            Regex::new(r"(?i)[éèêëàâîïôûùüÿçœæáíóúñ]").expect("valid romance regex"),
            3.0,
        ),
        (
            Regex::new(r"(?i)[ąćęłńóśźżěščřžýůúďťň]").expect("valid slavic regex"),
            3.5,
        ),
    ]
});

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x3000..=0x303F
        | 0xFF00..=0xFFEF
        | 0x30A0..=0x30FF
        | 0x2E80..=0x2EFF
        | 0x31C0..=0x31EF
        | 0x3200..=0x33FF
        | 0xAC00..=0xD7AF
        | 0x1100..=0x11FF
        | 0x3130..=0x318F
        | 0xA960..=0xA97F
        | 0xD7B0..=0xD7FF)
}

fn segment_tokens(segment: &str) -> u64 {
    if segment.trim().is_empty() {
        return 0;
    }
    let chars = segment.chars().count();
    if segment.chars().any(is_cjk) {
        return chars as u64;
    }
    if NUMERIC.is_match(segment) || chars <= SHORT_SEGMENT_CHARS {
        return 1;
    }
    if PUNCTUATION.is_match(segment) {
        return chars.div_ceil(2) as u64;
    }
    if ALPHANUMERIC.is_match(segment) {
        let ratio = LANGUAGE_RATIOS
            .iter()
            .find(|(pattern, _)| pattern.is_match(segment))
            .map_or(DEFAULT_CHARS_PER_TOKEN, |(_, ratio)| *ratio);
        return (chars as f64 / ratio).ceil() as u64;
    }
    chars as u64
}

/// Approximate token count of a string
///
/// Deterministic, never fails, and `0` for the empty string.
///
/// # Examples
///
/// ```
/// use chatwire_core::token::estimate_text_tokens;
///
/// assert_eq!(estimate_text_tokens(""), 0);
/// assert_eq!(estimate_text_tokens("Hello, world!"), 4);
/// ```
pub fn estimate_text_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let mut total = 0;
    let mut last = 0;
    for m in SEGMENT_SPLIT.find_iter(text) {
        total += segment_tokens(&text[last..m.start()]);
        total += segment_tokens(m.as_str());
        last = m.end();
    }
    total + segment_tokens(&text[last..])
}

/// `floor(size / 100)`
pub fn estimate_image_tokens(file: &FileRef) -> u64 {
    file.size / IMAGE_BYTES_PER_TOKEN
}

/// `floor((size / 1024) * 180)`, used for files too large to read
pub fn estimate_large_file_tokens(size: u64) -> u64 {
    // Exact in integers: floor(size * 180 / 1024).
    size.saturating_mul(LARGE_FILE_TOKENS_PER_KB) / KB
}

/// Removes the image/prompt overlap once when any image tokens are present
pub(crate) fn corrected_image_tokens(image_tokens: u64) -> u64 {
    if image_tokens > 0 {
        image_tokens.saturating_sub(IMAGE_TOKEN_OVERLAP)
    } else {
        0
    }
}

/// Estimates a text or document file
///
/// Files of 5 MiB or more are estimated from their size alone. Smaller files
/// are read (from `path` if given, otherwise from storage), trimmed and run
/// through the text estimator. Other kinds estimate to `0`.
pub async fn estimate_text_file_tokens(
    file: &FileRef,
    reader: &dyn FileReader,
    path: Option<&Path>,
) -> Result<u64> {
    if !file.kind.is_readable() {
        warn!("File {} is not a text file, estimating 0 tokens", file.id);
        return Ok(0);
    }
    if file.size >= LARGE_FILE_THRESHOLD {
        return Ok(estimate_large_file_tokens(file.size));
    }
    let content = match path {
        Some(path) => reader.read_path(path).await?,
        None => reader.read(file).await?,
    };
    Ok(estimate_text_tokens(content.trim()))
}

/// Same as [`estimate_text_file_tokens`], reading through the file's own path
pub async fn estimate_text_file_tokens_by_path(file: &FileRef, reader: &dyn FileReader) -> Result<u64> {
    estimate_text_file_tokens(file, reader, file.path.as_deref()).await
}

/// Token estimate for a file, image or text, without caching
pub async fn estimate_file_tokens(file: &FileRef, reader: &dyn FileReader) -> Result<u64> {
    match file.kind {
        FileKind::Image => Ok(estimate_image_tokens(file)),
        _ => estimate_text_file_tokens(file, reader, None).await,
    }
}

/// Sums text file tokens, preferring cached counts
///
/// Missing counts are computed concurrently. The inputs are not updated, and a
/// file that cannot be read contributes `0`.
pub async fn estimate_text_files_tokens(files: &[FileRef], reader: &dyn FileReader) -> u64 {
    let counts = join_all(files.iter().map(|file| async move {
        if let Some(tokens) = file.tokens {
            return tokens;
        }
        match estimate_text_file_tokens(file, reader, None).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Token count unavailable for {}: {}", file.id, e);
                0
            }
        }
    }))
    .await;
    counts.into_iter().sum()
}

/// Running token total for a conversation under a budget
///
/// # Examples
///
/// ```
/// use chatwire_core::TokenCounter;
///
/// let mut counter = TokenCounter::default();
/// counter.observe("Hello world");
/// assert_eq!(counter.total(), 2);
///
/// counter.subtract("Hello");
/// assert_eq!(counter.total(), 1);
///
/// assert!(counter.under_budget(10));
/// ```
#[derive(Default, Clone, Debug)]
pub struct TokenCounter {
    total: u64,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self { total: 0 }
    }

    /// Estimated tokens a message adds to a request
    ///
    /// Recorded usage wins; otherwise text, reasoning and images are estimated.
    pub fn message_tokens(message: &Message) -> u64 {
        match (&message.usage, message.role) {
            (Some(usage), crate::message::Role::User) => usage.total_tokens,
            (Some(usage), _) => usage.completion_tokens,
            (None, _) => crate::budget::estimate_message_usage(message).total_tokens,
        }
    }

    /// Adds the token count of the given text to the total
    pub fn observe(&mut self, text: &str) {
        self.total += estimate_text_tokens(text);
    }

    pub fn observe_message(&mut self, message: &Message) {
        self.total += Self::message_tokens(message);
    }

    /// Subtracts the token count of the given text, saturating at zero
    pub fn subtract(&mut self, text: &str) {
        self.total = self.total.saturating_sub(estimate_text_tokens(text));
    }

    pub fn subtract_message(&mut self, message: &Message) {
        self.total = self.total.saturating_sub(Self::message_tokens(message));
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Checks if the total token count is within the specified budget
    pub fn under_budget(&self, max: u64) -> bool {
        self.total <= max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use parameterized::parameterized;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticReader {
        content: &'static str,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl FileReader for StaticReader {
        async fn read(&self, _file: &FileRef) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.content.to_string())
        }

        async fn read_path(&self, _path: &Path) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("path {}", self.content))
        }
    }

    struct FailingReader;

    #[async_trait]
    impl FileReader for FailingReader {
        async fn read(&self, file: &FileRef) -> Result<String> {
            Err(Error::FileRead {
                path: file.storage_name().into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        }

        async fn read_path(&self, path: &Path) -> Result<String> {
            Err(Error::FileRead {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        }
    }

    fn reader(content: &'static str) -> StaticReader {
        StaticReader {
            content,
            reads: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_text_segments() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("   \n\t"), 0);
        // "Hello" (1) "," (1) " " (0) "world" (1) "!" (1)
        assert_eq!(estimate_text_tokens("Hello, world!"), 4);
        // three CJK characters count one each
        assert_eq!(estimate_text_tokens("你好吗"), 3);
        assert_eq!(estimate_text_tokens("3.14159"), 3);
        assert_eq!(estimate_text_tokens("1234567"), 1);
        // 14 plain letters at 6 chars per token
        assert_eq!(estimate_text_tokens("internationals"), 3);
        // german words use 3 chars per token
        assert_eq!(estimate_text_tokens("Größenordnung"), 5);
    }

    #[test]
    fn test_text_is_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. 敏捷的狐狸";
        assert_eq!(estimate_text_tokens(text), estimate_text_tokens(text));
        assert!(estimate_text_tokens(text) > 0);
    }

    #[parameterized(size = { 0, 99, 100, 10_799, 10_700 }, expected = { 0, 0, 1, 107, 107 })]
    fn test_image_tokens(size: u64, expected: u64) {
        let image = FileRef::new("img", ".png", size, FileKind::Image);
        assert_eq!(estimate_image_tokens(&image), expected);
    }

    #[test]
    fn test_large_file_formula() {
        assert_eq!(estimate_large_file_tokens(5 * MB), 5 * 1024 * 180);
        assert_eq!(estimate_large_file_tokens(5 * MB + 1), 921_600);
        assert_eq!(estimate_large_file_tokens(5 * MB + 6), 921_601);
    }

    #[tokio::test]
    async fn test_large_text_file_is_not_read() {
        let reader = reader("ignored");
        let file = FileRef::new("big", ".txt", 6 * MB, FileKind::Text);

        let tokens = estimate_text_file_tokens(&file, &reader, None).await.unwrap();
        assert_eq!(tokens, estimate_large_file_tokens(6 * MB));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_file_at_threshold_is_not_read() {
        let reader = reader("ignored");
        let file = FileRef::new("edge", ".md", 5 * MB, FileKind::Document);

        let tokens = estimate_text_file_tokens(&file, &reader, None).await.unwrap();
        assert_eq!(tokens, 921_600);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);

        let below = FileRef::new("edge", ".md", 5 * MB - 1, FileKind::Document);
        let tokens = estimate_text_file_tokens(&below, &reader, None).await.unwrap();
        assert_eq!(tokens, estimate_text_tokens("ignored"));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_small_text_file_is_read_and_trimmed() {
        let reader = reader("  hello world  \n");
        let file = FileRef::new("small", ".txt", 16, FileKind::Text);

        let tokens = estimate_text_file_tokens(&file, &reader, None).await.unwrap();
        assert_eq!(tokens, estimate_text_tokens("hello world"));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_by_path_uses_file_path() {
        let reader = reader("abc");
        let file = FileRef::new("p", ".md", 3, FileKind::Document).with_path("/tmp/p.md");

        let tokens = estimate_text_file_tokens_by_path(&file, &reader).await.unwrap();
        assert_eq!(tokens, estimate_text_tokens("path abc"));
    }

    #[tokio::test]
    async fn test_non_text_file_is_zero() {
        let reader = reader("data");
        let file = FileRef::new("bin", ".exe", 10, FileKind::Other);
        assert_eq!(estimate_text_file_tokens(&file, &reader, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_files_sum_uses_cache_and_swallows_failures() {
        let files = vec![
            FileRef::new("a", ".txt", 10, FileKind::Text).with_tokens(42),
            FileRef::new("b", ".txt", 10, FileKind::Text),
        ];
        assert_eq!(estimate_text_files_tokens(&files, &FailingReader).await, 42);
    }

    #[test]
    fn test_counter_observe_and_subtract() {
        let mut counter = TokenCounter::new();
        counter.observe("Hello world");
        counter.observe("big cat");
        assert_eq!(counter.total(), 4);

        counter.subtract("Hello world");
        assert_eq!(counter.total(), 2);

        counter.subtract("way more tokens than we have now");
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_counter_prefers_recorded_usage() {
        use crate::message::Usage;

        let user = Message::user("ignored text").with_usage(Usage::new(3, 3, 10));
        let assistant = Message::assistant("ignored text").with_usage(Usage::new(5, 8, 13));
        assert_eq!(TokenCounter::message_tokens(&user), 10);
        assert_eq!(TokenCounter::message_tokens(&assistant), 8);
    }
}
