use std::collections::HashSet;
use std::time::Duration;

use lookout_core::{DisplayMessage, MessageRole};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::classify::{detect_tool_usage, segment_content, ContentSegment};

const MERGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Appended,
    Merged,
    Duplicate,
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledMessage {
    pub message: DisplayMessage,
    /// Ids folded into this entry after the first, in arrival order.
    pub merged_ids: Vec<String>,
    received: Instant,
    /// Display segments of `message.content`, rebuilt only when it changes.
    segments: Vec<ContentSegment>,
}

impl ReconciledMessage {
    fn new(message: DisplayMessage, received: Instant) -> Self {
        let segments = segment_content(&message.content);
        Self {
            message,
            merged_ids: Vec::new(),
            received,
            segments,
        }
    }

    pub fn segments(&self) -> &[ContentSegment] {
        &self.segments
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderedMessage {
    pub id: String,
    pub role: MessageRole,
    pub message_type: String,
    pub conversation_id: Option<String>,
    pub created_at: Option<String>,
    pub segments: Vec<ContentSegment>,
}

/// Deduplicated, display-ready transcript built from raw message events.
#[derive(Debug)]
pub struct MessageReconciler {
    entries: Vec<ReconciledMessage>,
    seen: HashSet<String>,
    merge_window: Duration,
    revision: u64,
}

impl MessageReconciler {
    pub fn new(merge_window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            merge_window,
            revision: 0,
        }
    }

    /// Bumped whenever the visible transcript changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn entries(&self) -> &[ReconciledMessage] {
        &self.entries
    }

    pub fn messages(&self) -> Vec<DisplayMessage> {
        self.entries.iter().map(|entry| entry.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn insert(&mut self, message: DisplayMessage, received: Instant) -> InsertOutcome {
        if !self.seen.insert(message.id.clone()) {
            debug!("transcript_duplicate_dropped: {}", message.id);
            return InsertOutcome::Duplicate;
        }
        if message.is_hidden() {
            return InsertOutcome::Hidden;
        }
        if let Some(last) = self.entries.last_mut() {
            if can_merge(last, &message, received, self.merge_window) {
                last.message.content.push_str(MERGE_SEPARATOR);
                last.message.content.push_str(&message.content);
                last.merged_ids.push(message.id);
                last.received = received;
                last.segments = segment_content(&last.message.content);
                self.revision += 1;
                return InsertOutcome::Merged;
            }
        }
        self.entries.push(ReconciledMessage::new(message, received));
        self.revision += 1;
        InsertOutcome::Appended
    }

    /// Replaces the transcript with fetched history. History is shown as
    /// stored; only live fragments are merged. Live entries received at or
    /// after `fetch_started` that the history does not know survive, after
    /// the history.
    pub fn load_history(&mut self, history: Vec<DisplayMessage>, fetch_started: Instant) {
        let previous = std::mem::take(&mut self.entries);
        self.seen.clear();
        self.revision += 1;
        for message in history {
            if !self.seen.insert(message.id.clone()) || message.is_hidden() {
                continue;
            }
            self.entries
                .push(ReconciledMessage::new(message, fetch_started));
        }
        for entry in previous {
            if entry.received < fetch_started || self.seen.contains(&entry.message.id) {
                continue;
            }
            self.seen.insert(entry.message.id.clone());
            self.seen.extend(entry.merged_ids.iter().cloned());
            self.entries.push(entry);
        }
    }

    /// Drops the whole transcript, or one conversation of it. Ids already
    /// seen stay seen so late redeliveries do not resurrect cleared rows.
    pub fn clear(&mut self, conversation_id: Option<&str>) {
        self.revision += 1;
        match conversation_id {
            None => self.entries.clear(),
            Some(conversation_id) => self
                .entries
                .retain(|entry| entry.message.conversation_id.as_deref() != Some(conversation_id)),
        }
    }

    pub fn rendered(&self) -> Vec<RenderedMessage> {
        self.entries
            .iter()
            .map(|entry| RenderedMessage {
                id: entry.message.id.clone(),
                role: entry.message.role,
                message_type: entry.message.message_type.clone(),
                conversation_id: entry.message.conversation_id.clone(),
                created_at: entry.message.created_at.clone(),
                segments: entry.segments.clone(),
            })
            .collect()
    }
}

fn is_tool_message(message: &DisplayMessage) -> bool {
    message.is_tool_use() || detect_tool_usage(&message.content).is_some()
}

/// Consecutive assistant fragments of one conversation merge when they
/// arrive within the window and neither side is a tool call.
fn can_merge(
    previous: &ReconciledMessage,
    next: &DisplayMessage,
    received: Instant,
    window: Duration,
) -> bool {
    let prev = &previous.message;
    prev.role == MessageRole::Assistant
        && next.role == MessageRole::Assistant
        && prev.conversation_id == next.conversation_id
        && prev.message_type == next.message_type
        && received.saturating_duration_since(previous.received) <= window
        && !is_tool_message(prev)
        && !is_tool_message(next)
}
