//! Change-event pub/sub for vault mutations.
//!
//! Every successful mutation publishes a [`ChangeEvent`] on the vault's
//! bus. Subscribers use NATS-style subject patterns to filter the
//! events they care about.
//!
//! # Pattern Matching
//!
//! Patterns use dot-separated tokens with wildcards:
//! - `*` matches exactly one token: `file.*` matches `file.created` but not `file.a.b`
//! - `>` matches one or more tokens (only at end): `>` matches every subject
//! - Exact match: `file.created` only matches `file.created`
//!
//! # Example
//!
//! ```ignore
//! let bus = shared_change_bus(1024);
//!
//! // Watch every directory-level change
//! let mut sub = bus.subscribe("dir.*");
//!
//! bus.publish(ChangeEvent::DirCreated { path: "character/alice".into() });
//!
//! while let Some(msg) = sub.recv().await {
//!     println!("Got: {}", msg.subject);
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::content::Content;

// ============================================================================
// Pattern Matching
// ============================================================================

/// Check if a subject matches a pattern.
///
/// Patterns use NATS-style wildcards:
/// - `*` matches exactly one token
/// - `>` matches one or more tokens (only at end)
///
/// # Examples
///
/// ```ignore
/// assert!(matches_pattern("file.*", "file.created"));
/// assert!(matches_pattern(">", "dir.renamed"));
/// assert!(!matches_pattern("file.*", "dir.created"));
/// ```
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    let mut pi = 0;
    let mut si = 0;

    while pi < pattern_tokens.len() && si < subject_tokens.len() {
        match pattern_tokens[pi] {
            ">" => {
                // `>` must be at the end and matches one or more remaining tokens
                return pi == pattern_tokens.len() - 1 && si < subject_tokens.len();
            }
            "*" => {
                // `*` matches exactly one token
                pi += 1;
                si += 1;
            }
            token => {
                // Exact match required
                if token != subject_tokens[si] {
                    return false;
                }
                pi += 1;
                si += 1;
            }
        }
    }

    // Both must be exhausted for a match (unless pattern ends with `>`)
    pi == pattern_tokens.len() && si == subject_tokens.len()
}

// ============================================================================
// Event Message Types
// ============================================================================

/// Trait for payloads that know their subject.
pub trait HasSubject {
    /// Get the subject string for this payload.
    fn subject(&self) -> &str;
}

/// A message published to the event bus.
#[derive(Clone, Debug)]
pub struct EventMessage<T> {
    /// The subject (derived from payload).
    pub subject: String,
    /// The payload data.
    pub payload: T,
    /// When this message was created.
    pub timestamp: Instant,
}

impl<T: HasSubject> EventMessage<T> {
    /// Create a new event message.
    pub fn new(payload: T) -> Self {
        let subject = payload.subject().to_string();
        Self {
            subject,
            payload,
            timestamp: Instant::now(),
        }
    }
}

// ============================================================================
// Change Events
// ============================================================================

/// Vault change events.
///
/// Emitted by the vault after each mutation lands. Paths are vault
/// paths relative to the root. Compound operations (recursive delete,
/// folder copy) emit one event per affected entry so subscribers never
/// have to re-walk the tree to find out what changed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum ChangeEvent {
    /// A file came into existence, by create, copy, import, or restore.
    /// Carries the decoded content when the creator had it at hand.
    #[serde(rename_all = "camelCase")]
    FileCreated {
        path: String,
        content: Option<Content>,
    },

    /// A file's content was rewritten.
    #[serde(rename_all = "camelCase")]
    FileModified { path: String },

    /// A file is gone.
    #[serde(rename_all = "camelCase")]
    FileDeleted { path: String },

    /// A file changed name in place.
    #[serde(rename_all = "camelCase")]
    FileRenamed { old_path: String, new_path: String },

    /// A file changed parent folder (trash moves included).
    #[serde(rename_all = "camelCase")]
    FileMoved { old_path: String, new_path: String },

    /// A file was duplicated.
    #[serde(rename_all = "camelCase")]
    FileCopied { from: String, to: String },

    /// A folder came into existence.
    #[serde(rename_all = "camelCase")]
    DirCreated { path: String },

    /// Reserved for folder metadata changes; the vault does not emit it
    /// today but subscribers may bind the topic.
    #[serde(rename_all = "camelCase")]
    DirModified { path: String },

    /// A folder is gone.
    #[serde(rename_all = "camelCase")]
    DirDeleted { path: String },

    /// A folder changed name in place.
    #[serde(rename_all = "camelCase")]
    DirRenamed { old_path: String, new_path: String },

    /// A folder changed parent folder (trash moves included).
    #[serde(rename_all = "camelCase")]
    DirMoved { old_path: String, new_path: String },

    /// A folder was duplicated.
    #[serde(rename_all = "camelCase")]
    DirCopied { from: String, to: String },
}

impl ChangeEvent {
    /// Get the subject string for this event.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::FileCreated { .. } => "file.created",
            Self::FileModified { .. } => "file.modified",
            Self::FileDeleted { .. } => "file.deleted",
            Self::FileRenamed { .. } => "file.renamed",
            Self::FileMoved { .. } => "file.moved",
            Self::FileCopied { .. } => "file.copied",
            Self::DirCreated { .. } => "dir.created",
            Self::DirModified { .. } => "dir.modified",
            Self::DirDeleted { .. } => "dir.deleted",
            Self::DirRenamed { .. } => "dir.renamed",
            Self::DirMoved { .. } => "dir.moved",
            Self::DirCopied { .. } => "dir.copied",
        }
    }

    /// Primary path of the affected entry. For renames and moves this is
    /// the old location; for copies, the source.
    pub fn path(&self) -> &str {
        match self {
            Self::FileCreated { path, .. }
            | Self::FileModified { path }
            | Self::FileDeleted { path }
            | Self::DirCreated { path }
            | Self::DirModified { path }
            | Self::DirDeleted { path } => path,
            Self::FileRenamed { old_path, .. }
            | Self::FileMoved { old_path, .. }
            | Self::DirRenamed { old_path, .. }
            | Self::DirMoved { old_path, .. } => old_path,
            Self::FileCopied { from, .. } | Self::DirCopied { from, .. } => from,
        }
    }

    /// True for the `dir.*` family.
    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            Self::DirCreated { .. }
                | Self::DirModified { .. }
                | Self::DirDeleted { .. }
                | Self::DirRenamed { .. }
                | Self::DirMoved { .. }
                | Self::DirCopied { .. }
        )
    }
}

impl HasSubject for ChangeEvent {
    fn subject(&self) -> &str {
        ChangeEvent::subject(self)
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Type-parameterized pub/sub bus for a specific event domain.
///
/// Uses a broadcast channel internally for multi-subscriber delivery.
/// Subscribers receive only messages matching their pattern.
#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    tx: broadcast::Sender<EventMessage<T>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + HasSubject + 'static> EventBus<T> {
    /// Publish a payload to the bus.
    ///
    /// The subject is derived from the payload via HasSubject.
    /// Returns the number of subscribers that received the message.
    pub fn publish(&self, payload: T) -> usize {
        let msg = EventMessage::new(payload);
        self.tx.send(msg).unwrap_or(0)
    }

    /// Subscribe to messages matching a pattern.
    ///
    /// The pattern uses NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens (only at end)
    pub fn subscribe(&self, pattern: &str) -> Subscription<T> {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A subscription to an EventBus with pattern filtering.
///
/// Only messages whose subject matches the subscription pattern are delivered.
pub struct Subscription<T: Clone> {
    pattern: String,
    rx: broadcast::Receiver<EventMessage<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Get the subscription pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next matching message, waiting if necessary.
    ///
    /// Returns None if the channel is closed.
    pub async fn recv(&mut self) -> Option<EventMessage<T>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => {
                    if matches_pattern(&self.pattern, &msg.subject) {
                        return Some(msg);
                    }
                    // Message didn't match pattern, continue waiting
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // We fell behind, log and continue
                    tracing::warn!(
                        pattern = %self.pattern,
                        lagged = n,
                        "Change subscription lagged behind"
                    );
                }
            }
        }
    }

    /// Try to receive the next matching message without blocking.
    ///
    /// Returns None if no matching message is available.
    pub fn try_recv(&mut self) -> Option<EventMessage<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    if matches_pattern(&self.pattern, &msg.subject) {
                        return Some(msg);
                    }
                    // Message didn't match pattern, try again
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        lagged = n,
                        "Change subscription lagged behind"
                    );
                    // Continue trying to receive
                }
            }
        }
    }
}

impl<T: Clone> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Shared Bus Handle
// ============================================================================

/// Thread-safe handle to a ChangeEvent bus.
pub type SharedChangeBus = Arc<EventBus<ChangeEvent>>;

/// Create a new shared change bus.
pub fn shared_change_bus(capacity: usize) -> SharedChangeBus {
    Arc::new(EventBus::new(capacity))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching_exact() {
        assert!(matches_pattern("file.created", "file.created"));
        assert!(!matches_pattern("file.created", "file.deleted"));
        assert!(!matches_pattern("file.created", "file.created.extra"));
    }

    #[test]
    fn test_pattern_matching_single_wildcard() {
        assert!(matches_pattern("file.*", "file.created"));
        assert!(matches_pattern("file.*", "file.moved"));
        assert!(!matches_pattern("file.*", "dir.created"));
        assert!(!matches_pattern("file.*", "file.a.b"));
    }

    #[test]
    fn test_pattern_matching_multi_wildcard() {
        assert!(matches_pattern(">", "file.created"));
        assert!(matches_pattern(">", "dir.renamed"));
        assert!(matches_pattern("file.>", "file.created"));
        assert!(!matches_pattern("file.>", "dir.created"));
    }

    #[test]
    fn test_pattern_matching_mixed() {
        assert!(matches_pattern("*.created", "file.created"));
        assert!(matches_pattern("*.created", "dir.created"));
        assert!(!matches_pattern("*.created", "file.deleted"));
    }

    #[test]
    fn test_change_event_subjects() {
        let cases: Vec<(ChangeEvent, &str)> = vec![
            (
                ChangeEvent::FileCreated {
                    path: "a.txt".into(),
                    content: None,
                },
                "file.created",
            ),
            (ChangeEvent::FileModified { path: "a.txt".into() }, "file.modified"),
            (ChangeEvent::FileDeleted { path: "a.txt".into() }, "file.deleted"),
            (
                ChangeEvent::FileRenamed {
                    old_path: "a.txt".into(),
                    new_path: "b.txt".into(),
                },
                "file.renamed",
            ),
            (
                ChangeEvent::FileMoved {
                    old_path: "a.txt".into(),
                    new_path: "sub/a.txt".into(),
                },
                "file.moved",
            ),
            (
                ChangeEvent::FileCopied {
                    from: "a.txt".into(),
                    to: "b.txt".into(),
                },
                "file.copied",
            ),
            (ChangeEvent::DirCreated { path: "d".into() }, "dir.created"),
            (ChangeEvent::DirModified { path: "d".into() }, "dir.modified"),
            (ChangeEvent::DirDeleted { path: "d".into() }, "dir.deleted"),
            (
                ChangeEvent::DirRenamed {
                    old_path: "d".into(),
                    new_path: "e".into(),
                },
                "dir.renamed",
            ),
            (
                ChangeEvent::DirMoved {
                    old_path: "d".into(),
                    new_path: "sub/d".into(),
                },
                "dir.moved",
            ),
            (
                ChangeEvent::DirCopied {
                    from: "d".into(),
                    to: "e".into(),
                },
                "dir.copied",
            ),
        ];

        for (event, subject) in cases {
            assert_eq!(event.subject(), subject);
            assert_eq!(event.is_dir(), subject.starts_with("dir."));
        }
    }

    #[test]
    fn test_change_event_wire_shape() {
        let event = ChangeEvent::FileRenamed {
            old_path: "a.txt".into(),
            new_path: "b.txt".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "fileRenamed");
        assert_eq!(value["oldPath"], "a.txt");
        assert_eq!(value["newPath"], "b.txt");
    }

    #[tokio::test]
    async fn test_bus_publish_subscribe() {
        let bus: EventBus<ChangeEvent> = EventBus::new(16);
        let mut sub = bus.subscribe("file.*");

        // Publish in background task
        let bus_clone = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            bus_clone.publish(ChangeEvent::FileCreated {
                path: "notes.txt".into(),
                content: Some(Content::Text("hi".into())),
            });
        });

        let msg = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("no message");

        assert_eq!(msg.subject, "file.created");
        match msg.payload {
            ChangeEvent::FileCreated { path, content } => {
                assert_eq!(path, "notes.txt");
                assert_eq!(content, Some(Content::Text("hi".into())));
            }
            _ => panic!("wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_subscription_pattern_filtering() {
        let bus: EventBus<ChangeEvent> = EventBus::new(16);

        let mut file_sub = bus.subscribe("file.deleted");
        let mut dir_sub = bus.subscribe("dir.deleted");

        bus.publish(ChangeEvent::FileDeleted { path: "a.txt".into() });
        bus.publish(ChangeEvent::DirDeleted { path: "d".into() });

        let msg = file_sub.try_recv().expect("should have message");
        assert_eq!(msg.subject, "file.deleted");
        assert!(file_sub.try_recv().is_none());

        let msg = dir_sub.try_recv().expect("should have message");
        assert_eq!(msg.subject, "dir.deleted");
        assert!(dir_sub.try_recv().is_none());
    }

    #[test]
    fn test_shared_change_bus() {
        let bus = shared_change_bus(1024);
        assert_eq!(bus.capacity(), 1024);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub = bus.subscribe("file.*");
        assert_eq!(bus.subscriber_count(), 1);
    }
}
