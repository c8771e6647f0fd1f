//! Rewrites bare issue identifiers (`SQT-12`) in free text into issue URLs.
//!
//! Code fences, inline code, markdown links and bare URLs are masked with
//! placeholder tokens before rewriting and restored afterwards, so text inside
//! them is never touched. Each masking pass runs over the output of the
//! previous one; a later, narrower pattern never sees an already-protected span.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::helpers::{char_prefix_end, is_truncated};
use crate::registry::ShortKeyRegistry;
use crate::DEFAULT_HOST;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

static FENCED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?(?:```|\z)|~~~.*?(?:~~~|\z)").unwrap());
static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"``[^\n]+?``|`[^`\n]+`").unwrap());
static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[[^\]\n]*\]\([^)\n]*\)|<[A-Za-z][A-Za-z0-9+.\-]*:[^<>\s]+>").unwrap()
});
static BARE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z][A-Za-z0-9+.\-]*://[^\s<>]+|\bwww\.[^\s<>]+").unwrap()
});
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").unwrap());

/// Protected span classes, in masking order.
fn protected_spans() -> [&'static Regex; 4] {
    [&*FENCED_CODE_RE, &*INLINE_CODE_RE, &*MARKDOWN_LINK_RE, &*BARE_URL_RE]
}

fn placeholder(index: usize) -> String {
    format!("{}{}{}", PLACEHOLDER_OPEN, index, PLACEHOLDER_CLOSE)
}

/// Replace placeholders with their recorded originals.
fn restore<'a>(text: &'a str, originals: &[String]) -> Cow<'a, str> {
    PLACEHOLDER_RE.replace_all(text, |caps: &Captures| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|idx| originals.get(idx))
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Substitute every match of `pattern` with a placeholder.
///
/// Recorded originals are stored fully restored, so restoring the final
/// buffer is a single pass regardless of nesting.
fn mask(text: &str, pattern: &Regex, originals: &mut Vec<String>) -> String {
    pattern
        .replace_all(text, |caps: &Captures| {
            let original = restore(&caps[0], originals).into_owned();
            originals.push(original);
            placeholder(originals.len() - 1)
        })
        .into_owned()
}

/// Links `TEAMKEY-digits` identifiers to `https://<host>/<urlKey>/issue/<ID>`.
#[derive(Debug, Clone)]
pub struct AutoLinker {
    host: String,
    url_key: String,
    /// `None` when no team keys are known.
    identifier: Option<Regex>,
}

impl AutoLinker {
    pub fn new<I, S>(url_key: impl Into<String>, team_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = team_keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        // Longest first so a key never shadows a longer key sharing its prefix
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        keys.dedup();

        let identifier = if keys.is_empty() {
            None
        } else {
            let alternation = keys
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&format!(r"(?i)\b({})-(\d+)\b", alternation)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Could not compile team key pattern, auto-linking disabled: {}", e);
                    None
                }
            }
        };

        Self {
            host: DEFAULT_HOST.to_string(),
            url_key: url_key.into(),
            identifier,
        }
    }

    pub fn from_registry(registry: &ShortKeyRegistry) -> Self {
        Self::new(registry.url_key(), registry.team_keys())
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn url_key(&self) -> &str {
        &self.url_key
    }

    /// Canonical URL for an issue identifier.
    pub fn issue_url(&self, team_key: &str, number: &str) -> String {
        format!(
            "https://{}/{}/issue/{}-{}",
            self.host,
            self.url_key,
            team_key.to_uppercase(),
            number
        )
    }

    /// Rewrite bare identifiers outside protected spans.
    ///
    /// Empty input, an empty team-key set, or text with no candidate
    /// identifier comes back unchanged.
    pub fn link<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let Some(identifier) = &self.identifier else {
            return Cow::Borrowed(text);
        };
        if text.is_empty() || !identifier.is_match(text) {
            return Cow::Borrowed(text);
        }
        if text.contains([PLACEHOLDER_OPEN, PLACEHOLDER_CLOSE]) {
            debug!("Skipping auto-link: text contains placeholder sentinels");
            return Cow::Borrowed(text);
        }

        let mut originals = Vec::new();
        let mut masked = text.to_string();
        for pattern in protected_spans() {
            masked = mask(&masked, pattern, &mut originals);
        }

        let linked = identifier.replace_all(&masked, |caps: &Captures| {
            self.issue_url(&caps[1], &caps[2])
        });
        let restored = restore(&linked, &originals).into_owned();

        debug!(protected = originals.len(), "auto-linked issue identifiers");
        Cow::Owned(restored)
    }

    /// Byte ranges of every protected span and identifier in `text`.
    fn unsplittable_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = protected_spans()
            .into_iter()
            .flat_map(|pattern| pattern.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();
        if let Some(identifier) = &self.identifier {
            spans.extend(identifier.find_iter(text).map(|m| (m.start(), m.end())));
        }
        spans
    }

    /// Truncate free text that is about to be linked.
    ///
    /// Length is measured with produced issue URLs stripped back to
    /// identifiers, so text this linker already truncated and linked comes
    /// back unchanged. A cut that would land inside a code span, link, URL or
    /// identifier moves back to the start of that span, and the result then
    /// fits within `limit` including the indicator.
    pub fn truncate<'a>(&self, text: &'a str, limit: usize, indicator: &str) -> Cow<'a, str> {
        if limit == 0 {
            return Cow::Borrowed(text);
        }
        let measured = self.strip(text);
        if measured.chars().count() <= limit || is_truncated(&measured, limit, indicator) {
            return Cow::Borrowed(text);
        }

        let spans = self.unsplittable_spans(text);
        let back_off = |mut cut: usize| -> usize {
            while let Some(start) = spans
                .iter()
                .filter(|(start, end)| *start < cut && cut < *end)
                .map(|(start, _)| *start)
                .min()
            {
                cut = start;
            }
            cut
        };

        let full = char_prefix_end(text, limit);
        let mut cut = back_off(full);
        if cut < full {
            // A shortened stem must not look like a stem of exactly `limit`
            // characters to the next pass, so it also leaves room for the
            // indicator.
            let room = limit.saturating_sub(indicator.chars().count());
            cut = back_off(cut.min(char_prefix_end(text, room)));
            debug!(limit, "truncation moved back to avoid splitting a protected span");
        }

        let mut out = String::with_capacity(cut + indicator.len());
        out.push_str(&text[..cut]);
        out.push_str(indicator);
        Cow::Owned(out)
    }

    /// Convert issue URLs produced by [`AutoLinker::link`] back to bare
    /// identifiers. Markdown links targeting an issue URL and trailing title
    /// slugs (`/issue/SQT-1/fix-login`) are recognized too.
    pub fn strip<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if text.is_empty() {
            return Cow::Borrowed(text);
        }
        let url = format!(
            r"https?://{}/{}/issue/([A-Za-z0-9]+-\d+)(?:/[A-Za-z0-9._~%\-]*)?",
            regex::escape(&self.host),
            regex::escape(&self.url_key)
        );
        let (Ok(markdown), Ok(bare)) = (
            Regex::new(&format!(r"\[[^\]\n]*\]\({}\)", url)),
            Regex::new(&url),
        ) else {
            return Cow::Borrowed(text);
        };

        match markdown.replace_all(text, "$1") {
            Cow::Borrowed(_) => bare.replace_all(text, "$1"),
            Cow::Owned(s) => Cow::Owned(bare.replace_all(&s, "$1").into_owned()),
        }
    }
}
