//! Plain-text report of a finished story.
//!
//! Story text comes straight from a language model and needs a little
//! deterministic cleanup before it is shown: chat-template markers leak
//! through from local models, line endings vary, and models like to pad with
//! blank lines. [`tidy_story`] applies these rules in order:
//!
//! 1. Keep only the assistant turn when ChatML markers are present
//! 2. Normalise line endings (CRLF → LF)
//! 3. Trim trailing whitespace per line
//! 4. Collapse runs of blank lines down to one
//! 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 6. End with exactly one newline
//!
//! The session state keeps the text exactly as received; only rendering
//! goes through these rules.

use crate::media::MediaRef;
use crate::output::StoryOutput;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean model-generated story text for display.
pub fn tidy_story(input: &str) -> String {
    let s = strip_chat_template(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(s.trim_start())
}

/// Render a Markdown report with caption, story, media and metrics.
pub fn render_report(output: &StoryOutput) -> String {
    let mut out = String::new();

    out.push_str("## Caption\n\n");
    out.push_str(output.caption.trim());
    out.push_str("\n\n## Story\n\n");
    out.push_str(&tidy_story(&output.story));

    if let Some(ref media) = output.media {
        let heading = match media {
            MediaRef::Local { mime_type, .. } if mime_type.starts_with("image/") => "Image",
            MediaRef::Local { .. } => "Audio",
            MediaRef::Inline { .. } => "Image",
        };
        out.push_str(&format!("\n## {heading}\n\n"));
        out.push_str(&describe_media(media));
        out.push('\n');
    }

    if let Some(ref eval) = output.evaluation {
        out.push_str("\n## Evaluation\n\n");
        for (name, value) in [
            ("Sentiment", &eval.sentiment),
            ("Readability", &eval.readability),
            ("Coherence", &eval.coherence),
            ("ROUGE", &eval.rouge_scores),
        ] {
            if let Some(v) = value {
                out.push_str(&format!("- {name}: {v}\n"));
            }
        }
    }

    out
}

fn describe_media(media: &MediaRef) -> String {
    match media {
        MediaRef::Local { path, mime_type, .. } => format!("{} ({})", path.display(), mime_type),
        MediaRef::Inline { uri } if uri.starts_with("data:") => {
            let mime = uri
                .strip_prefix("data:")
                .and_then(|r| r.split([';', ',']).next())
                .unwrap_or("unknown");
            format!("inline {mime} ({} bytes encoded)", uri.len())
        }
        MediaRef::Inline { uri } => uri.clone(),
    }
}

// ── Rule 1: ChatML markers ───────────────────────────────────────────────────

static RE_ASSISTANT_TURN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<\|im_start\|>assistant\s*\n?(.*?)(?:<\|im_end\|>|$)").unwrap());
static RE_CHAT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|im_(?:start|end)\|>").unwrap());

fn strip_chat_template(input: &str) -> String {
    if let Some(turn) = RE_ASSISTANT_TURN
        .captures_iter(input)
        .last()
        .and_then(|c| c.get(1))
    {
        return turn.as_str().to_string();
    }
    RE_CHAT_MARKER.replace_all(input, "").to_string()
}

// ── Rules 2-6 ────────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}
