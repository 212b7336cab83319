//! Rendering of relay-authored messages and recognition of the provenance sentinel.
//!
//! Every message the relay sends carries the sentinel in its footer. Seeing the
//! sentinel on an inbound message is a secondary loop defence behind the id
//! guard. A user who types the sentinel verbatim is indistinguishable from
//! relay output and gets dropped too.
//!
//! Bodies are Telegram HTML: user content is escaped so `<`, `>`, `&` become
//! `&lt;`, `&gt;`, `&amp;`.

use crate::relay::registry::LanguageChannel;

/// Default sentinel embedded in relay footers.
pub const DEFAULT_SENTINEL: &str = "|T-BOT|";

/// Glyph used as the source label for global broadcasts.
pub const GLOBAL_FLAG: &str = "🌍";

/// Max chars of user text carried into one relayed message.
const MAX_BODY_CHARS: usize = 3500;

/// Where a relayed message came from.
#[derive(Debug, Clone, Copy)]
pub enum Origin<'a> {
    Global,
    Language(&'a LanguageChannel),
}

impl Origin<'_> {
    pub fn flag(&self) -> &str {
        match self {
            Origin::Global => GLOBAL_FLAG,
            Origin::Language(c) => &c.display_flag,
        }
    }

    fn label(&self) -> String {
        match self {
            Origin::Global => format!("{GLOBAL_FLAG} global"),
            Origin::Language(c) => format!("{} {}", c.display_flag, c.language_code.to_uppercase()),
        }
    }
}

/// True if `text` carries the relay's sentinel.
pub fn contains_sentinel(text: &str, sentinel: &str) -> bool {
    !sentinel.is_empty() && text.contains(sentinel)
}

/// Escape a string for Telegram HTML.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    result
}

/// Truncate to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

fn render(author: &str, text: &str, footer: &str) -> String {
    format!(
        "<b>{}</b>\n💬 {}\n<i>{}</i>",
        html_escape(author),
        html_escape(&truncate_chars(text, MAX_BODY_CHARS)),
        html_escape(footer)
    )
}

/// Body for a translated copy delivered to `target`.
pub fn render_translated(
    author: &str,
    translated: &str,
    origin: Origin<'_>,
    target: &LanguageChannel,
    sentinel: &str,
) -> String {
    let footer = format!(
        "{} → {} {} {}",
        origin.label(),
        target.display_flag,
        target.language_code.to_uppercase(),
        sentinel
    );
    render(author, translated, &footer)
}

/// Body for the untranslated original mirrored into the global channel.
pub fn render_mirror(author: &str, original: &str, source: &LanguageChannel, sentinel: &str) -> String {
    let footer = format!(
        "{} {} original from {} {}",
        source.display_flag,
        source.language_code.to_uppercase(),
        source.channel_key,
        sentinel
    );
    render(author, original, &footer)
}
