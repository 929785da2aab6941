//! Formatting stage
//!
//! Renders a draft into a channel-specific payload: markup filtering per
//! channel capability, style adornment, and length-driven splitting with
//! continuation markers. Formatting never blocks the pipeline: if it
//! errors, the raw draft goes out as a single unstyled part.
//!
//! Lengths are counted in Unicode scalar values throughout.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

use crate::channel::{Channel, ChannelPolicy, MarkupKind, SplitStrategy};
use crate::config::StyleConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{FormattedPayload, MessagePart};

/// Characters reserved per part for the " (i/n)" continuation marker
const MARKER_RESERVE: usize = 10;

/// Below this limit there is no room for both content and markers
const MIN_SPLIT_LIMIT: usize = 24;

/// Splitting supports at most this many parts; "(999/999)" still fits the
/// reserve, four digits would not
const MAX_PARTS: usize = 999;

static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").expect("static regex"));
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*|_([^_]+)_").expect("static regex"));
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\n?(.*?)```").expect("static regex"));
static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").expect("static regex"));
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("static regex"));

pub struct FormattingStage;

impl FormattingStage {
    pub fn new() -> Self {
        Self
    }

    /// Format a draft for a channel. Infallible by contract: internal
    /// errors degrade to the raw draft as a single unsplit part.
    pub fn run(
        &self,
        draft: &str,
        channel: Channel,
        policy: &ChannelPolicy,
        style: &StyleConfig,
        display_name: Option<&str>,
    ) -> FormattedPayload {
        match format_for_channel(draft, channel, policy, style, display_name) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%channel, error = %e, "formatting failed, falling back to raw draft");
                FormattedPayload::single(channel, draft)
            }
        }
    }
}

impl Default for FormattingStage {
    fn default() -> Self {
        Self::new()
    }
}

fn format_for_channel(
    draft: &str,
    channel: Channel,
    policy: &ChannelPolicy,
    style: &StyleConfig,
    display_name: Option<&str>,
) -> EngineResult<FormattedPayload> {
    let filtered = apply_markup_filter(draft, policy);
    let adorned = apply_style(&filtered, policy, style, display_name);

    let limit = match policy.max_length {
        None => return Ok(FormattedPayload::single(channel, adorned)),
        Some(limit) => limit,
    };
    if limit == 0 {
        return Err(EngineError::Formatting(
            "channel policy has zero maximum length".into(),
        ));
    }
    if char_len(&adorned) <= limit {
        return Ok(FormattedPayload::single(channel, adorned));
    }
    if limit < MIN_SPLIT_LIMIT {
        return Err(EngineError::Formatting(format!(
            "maximum length {limit} leaves no room for continuation markers"
        )));
    }

    let chunks = split_content(&adorned, limit - MARKER_RESERVE, policy.split_strategy);
    if chunks.len() > MAX_PARTS {
        return Err(EngineError::Formatting(format!(
            "content splits into {} parts, more than the supported {MAX_PARTS}",
            chunks.len()
        )));
    }

    let total = chunks.len();
    let parts: Vec<MessagePart> = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let marker = format!("({}/{})", index + 1, total);
            MessagePart {
                sequence: (index + 1) as u32,
                content: format!("{chunk} {marker}"),
                continuation: Some(marker),
            }
        })
        .collect();

    Ok(FormattedPayload {
        channel,
        content: adorned,
        is_split: true,
        parts,
    })
}

/// Strip markup kinds the channel cannot render; pass the rest through.
fn apply_markup_filter(content: &str, policy: &ChannelPolicy) -> String {
    let mut result = content.to_string();
    if !policy.allows(MarkupKind::Code) {
        result = FENCE_RE.replace_all(&result, "$1").into_owned();
        result = CODE_RE.replace_all(&result, "$1").into_owned();
    }
    if !policy.allows(MarkupKind::Bold) {
        result = BOLD_RE.replace_all(&result, "$1$2").into_owned();
    }
    if !policy.allows(MarkupKind::Italic) {
        result = ITALIC_RE.replace_all(&result, "$1$2").into_owned();
    }
    if !policy.allows(MarkupKind::Link) {
        result = LINK_RE.replace_all(&result, "$1").into_owned();
    }
    result
}

/// Greeting, sign-off and emoji, gated on what the channel supports.
fn apply_style(
    content: &str,
    policy: &ChannelPolicy,
    style: &StyleConfig,
    display_name: Option<&str>,
) -> String {
    let mut out = String::new();
    if let Some(template) = &style.greeting {
        let greeting = match display_name {
            Some(name) => template.replace("{name}", name),
            // No name known: drop the placeholder and tidy the spacing
            None => template.replace(" {name}", "").replace("{name}", ""),
        };
        let greeting = greeting.trim();
        if !greeting.is_empty() {
            out.push_str(greeting);
            if style.emoji && policy.supports_emoji {
                out.push_str(" 👋");
            }
            out.push('\n');
        }
    }
    out.push_str(content);
    if let Some(sign_off) = &style.sign_off {
        let sign_off = sign_off.trim();
        if !sign_off.is_empty() {
            out.push('\n');
            out.push_str(sign_off);
        }
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryKind {
    Paragraph,
    Sentence,
    Word,
}

fn fallback_order(strategy: SplitStrategy) -> &'static [BoundaryKind] {
    match strategy {
        SplitStrategy::Sentence => &[BoundaryKind::Sentence, BoundaryKind::Word],
        SplitStrategy::Paragraph => &[
            BoundaryKind::Paragraph,
            BoundaryKind::Sentence,
            BoundaryKind::Word,
        ],
        SplitStrategy::HardWord => &[BoundaryKind::Word],
    }
}

/// Partition `content` into chunks of at most `budget` characters each,
/// cutting at the best available boundary. Chunks concatenate back to the
/// original content exactly.
fn split_content(content: &str, budget: usize, strategy: SplitStrategy) -> Vec<String> {
    let budget = budget.max(1);
    let order = fallback_order(strategy);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < content.len() {
        let rest = &content[start..];
        if char_len(rest) <= budget {
            chunks.push(rest.to_string());
            break;
        }
        let cut = next_cut(rest, budget, order);
        chunks.push(rest[..cut].to_string());
        start += cut;
    }
    chunks
}

/// Best cut offset (bytes, relative to `text`) within the character budget:
/// the furthest boundary of the strongest kind that has one, else a hard
/// cut at exactly `budget` characters.
fn next_cut(text: &str, budget: usize, order: &[BoundaryKind]) -> usize {
    let hard_limit = byte_offset_at_char(text, budget);
    for kind in order {
        if let Some(cut) = last_boundary_before(text, hard_limit, *kind) {
            return cut;
        }
    }
    hard_limit
}

/// Byte offset of the character with index `chars` (or the end of text).
fn byte_offset_at_char(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Furthest boundary offset of the given kind in `(0, max_offset]`.
fn last_boundary_before(text: &str, max_offset: usize, kind: BoundaryKind) -> Option<usize> {
    let mut best = None;
    let mut prev: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        // Offset of the boundary AFTER the current character
        let after = idx + ch.len_utf8();
        if after > max_offset {
            break;
        }
        let is_boundary = match kind {
            BoundaryKind::Paragraph => ch == '\n' && prev == Some('\n'),
            BoundaryKind::Sentence => {
                ch == '\n'
                    || (ch == ' ' && matches!(prev, Some('.') | Some('!') | Some('?')))
            }
            BoundaryKind::Word => ch == ' ',
        };
        // A boundary at the very end of the window is only useful if text remains
        if is_boundary && after < text.len() {
            best = Some(after);
        }
        prev = Some(ch);
    }
    best
}
