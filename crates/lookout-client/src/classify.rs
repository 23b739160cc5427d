use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Write,
    Search,
    Execute,
    Other,
}

impl ToolKind {
    pub fn for_action(action: &str) -> Self {
        match action {
            "Read" | "LS" => ToolKind::Read,
            "Write" | "Edit" | "MultiEdit" | "Delete" | "NotebookEdit" => ToolKind::Write,
            "Search" | "Glob" | "SemSearch" | "WebSearch" | "WebFetch" => ToolKind::Search,
            "Bash" | "Task" => ToolKind::Execute,
            _ => ToolKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Read => "read",
            ToolKind::Write => "write",
            ToolKind::Search => "search",
            ToolKind::Execute => "execute",
            ToolKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolUsage {
    pub action: String,
    pub target: String,
    pub kind: ToolKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "segment", rename_all = "snake_case")]
pub enum ContentSegment {
    Text { text: String },
    Thinking { text: String },
    Tool { usage: ToolUsage },
}

fn tool_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?:[^\s*`]+\s+)?\*\*(Read|Write|Edit|MultiEdit|Bash|Search|Glob|LS|Delete|SemSearch|WebFetch|WebSearch|SaveMemory|TodoWrite|Task|NotebookEdit|ExitPlanMode)\*\*\s+(?:`([^`]*)`|\[([^\]]*)\]\(([^)\s]+)\))",
        )
        .expect("valid regex")
    })
}

fn thinking_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<thinking>(.*?)(?:</thinking>|\z)").expect("valid regex")
    })
}

/// Matches the compact tool marker the backend writes for tool calls, for
/// example ``**Read** `src/app.tsx` `` or `**WebFetch** [docs.rs](https://docs.rs)`.
pub fn detect_tool_usage(content: &str) -> Option<ToolUsage> {
    match_tool_marker(content).map(|(usage, _)| usage)
}

/// The leading marker and the byte offset where it ends.
fn match_tool_marker(content: &str) -> Option<(ToolUsage, usize)> {
    let captures = tool_marker().captures(content)?;
    let end = captures.get(0)?.end();
    let action = captures.get(1)?.as_str().to_string();
    let target = captures
        .get(2)
        .or_else(|| captures.get(4))
        .map(|found| found.as_str().trim().to_string())
        .unwrap_or_default();
    let usage = ToolUsage {
        kind: ToolKind::for_action(&action),
        action,
        target,
    };
    Some((usage, end))
}

/// Splits content into display segments in original order. Reasoning
/// blocks become `Thinking`; an unterminated block runs to the end, which
/// is what a streaming turn looks like mid-flight.
pub fn segment_content(content: &str) -> Vec<ContentSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for captures in thinking_block().captures_iter(content) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_text(&mut segments, &content[cursor..whole.start()]);
        let inner = captures.get(1).map(|found| found.as_str().trim()).unwrap_or_default();
        if !inner.is_empty() {
            segments.push(ContentSegment::Thinking {
                text: inner.to_string(),
            });
        }
        cursor = whole.end();
    }
    push_text(&mut segments, &content[cursor..]);
    segments
}

fn push_text(segments: &mut Vec<ContentSegment>, raw: &str) {
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    match match_tool_marker(text) {
        Some((usage, end)) => {
            segments.push(ContentSegment::Tool { usage });
            // prose after the marker, possibly another marker
            push_text(segments, &text[end..]);
        }
        None => segments.push(ContentSegment::Text {
            text: text.to_string(),
        }),
    }
}
