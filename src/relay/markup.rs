//! Conversion of model output into Telegram MarkdownV2.
//!
//! Gemini answers in generic markdown: `**bold**` and `*italic*`. Telegram's
//! MarkdownV2 uses `*bold*` and `_italic_` and rejects any unescaped reserved
//! punctuation, so every reply passes through [`render`] before it is sent.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;

/// Characters prefixed with a backslash in every mode.
const RESERVED: &[char] = &[
    '!', '@', '#', '$', '%', '^', '&', '(', ')', '+', '-', '=', '[', ']', '{', '}', ';', '\'',
    '"', '\\', '|', ',', '.', '<', '>', '?', '~',
];

/// Emphasis markers. Escaped in every mode, re-emitted raw only in rich mode.
const MARKERS: &[char] = &['*', '_'];

/// `**bold**` first, then `*italic*`. Leftmost-first alternation keeps a bold
/// span from being picked up again as two italic markers.
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*|\*(.*?)\*").expect("emphasis pattern"));

/// How translated emphasis is emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupMode {
    /// Translate emphasis, then escape the whole text including the new
    /// markers. Always valid MarkdownV2; emphasis shows up as literal `*`/`_`.
    #[default]
    Literal,
    /// Escape only literal text and emit the translated markers unescaped so
    /// Telegram renders bold and italic.
    Rich,
}

/// Render model output for a MarkdownV2 send.
pub fn render(text: &str, mode: MarkupMode) -> String {
    match mode {
        MarkupMode::Literal => escape(&translate(text), false),
        MarkupMode::Rich => render_rich(text),
    }
}

/// `**X**` → `*X*`, remaining `*X*` → `_X_`.
fn translate(text: &str) -> String {
    EMPHASIS
        .replace_all(text, |caps: &Captures| match (caps.get(1), caps.get(2)) {
            (Some(bold), _) => format!("*{}*", bold.as_str()),
            (None, Some(italic)) => format!("_{}_", italic.as_str()),
            (None, None) => caps[0].to_string(),
        })
        .into_owned()
}

fn render_rich(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut last = 0;
    // End of the previous italic span, if it closed with a raw `_`.
    let mut italic_end = None;

    for caps in EMPHASIS.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&escape(&text[last..whole.start()], true));

        match (caps.get(1), caps.get(2)) {
            (Some(bold), _) => emphasize(&mut out, '*', bold.as_str(), whole.as_str()),
            (None, Some(italic)) => {
                // `__` would open an underline; `\r` is ignored by Telegram.
                if italic_end == Some(whole.start()) {
                    out.push('\r');
                }
                emphasize(&mut out, '_', italic.as_str(), whole.as_str());
                if !italic.as_str().is_empty() {
                    italic_end = Some(whole.end());
                }
            }
            (None, None) => out.push_str(&escape(whole.as_str(), true)),
        }
        last = whole.end();
    }

    out.push_str(&escape(&text[last..], true));
    out
}

fn emphasize(out: &mut String, marker: char, inner: &str, whole: &str) {
    // Telegram rejects empty entities.
    if inner.is_empty() {
        out.push_str(&escape(whole, true));
        return;
    }
    out.push(marker);
    out.push_str(&escape(inner, true));
    out.push(marker);
}

/// Backslash-escape reserved characters and emphasis markers. `code` also
/// covers the backtick, which only rich output needs.
fn escape(text: &str, code: bool) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        if RESERVED.contains(&c) || MARKERS.contains(&c) || (code && c == '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
