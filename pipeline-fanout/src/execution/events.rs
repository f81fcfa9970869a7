// Fan-out Events
// Progress reporting for spawn, promotion and join activity

use tokio::sync::mpsc;

/// Sender for fan-out progress events
pub type ProgressSender = mpsc::UnboundedSender<FanOutEvent>;

/// Receiver for fan-out progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<FanOutEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while coordinating a fan-out
#[derive(Debug, Clone, PartialEq)]
pub enum FanOutEvent {
    /// A parent began fanning out
    FanOutStarted {
        parent_execution_id: String,
        total_candidates: usize,
        selected: usize,
        window: usize,
    },

    /// Nothing to run; the parent was resumed immediately
    ShortCircuited {
        parent_execution_id: String,
        reason: String,
    },

    /// Barrier observers were informed about the fan-out
    BarriersExpanded {
        parent_execution_id: String,
        observers: usize,
        children: usize,
    },

    /// Child execution record created
    ChildCreated {
        parent_execution_id: String,
        execution_id: String,
        candidate_node_id: String,
    },

    /// Child execution started
    ChildStarted {
        parent_execution_id: String,
        execution_id: String,
    },

    /// Child is waiting for a free slot in the window
    ChildQueued {
        parent_execution_id: String,
        execution_id: String,
        position: usize,
    },

    /// Queued child promoted into the window after a sibling finished
    ChildPromoted {
        parent_execution_id: String,
        execution_id: String,
        after: String,
    },

    /// Child could not be created or started
    ChildLaunchFailed {
        parent_execution_id: String,
        execution_id: String,
        message: String,
    },

    /// Promotion stopped; the listed children will never start
    PromotionHalted {
        parent_execution_id: String,
        skipped: usize,
        reason: String,
    },

    /// A completion was delivered more than once and absorbed
    DuplicateCallback {
        parent_execution_id: String,
        execution_id: String,
    },

    /// Parent resumed after its children finished
    ParentResumed {
        parent_execution_id: String,
        children: usize,
        failed: bool,
    },

    /// Parent cancelled while children were still queued
    FanOutCancelled {
        parent_execution_id: String,
        aborted: usize,
    },
}

impl FanOutEvent {
    /// Parent execution this event belongs to
    pub fn parent_execution_id(&self) -> &str {
        match self {
            Self::FanOutStarted {
                parent_execution_id,
                ..
            }
            | Self::ShortCircuited {
                parent_execution_id,
                ..
            }
            | Self::BarriersExpanded {
                parent_execution_id,
                ..
            }
            | Self::ChildCreated {
                parent_execution_id,
                ..
            }
            | Self::ChildStarted {
                parent_execution_id,
                ..
            }
            | Self::ChildQueued {
                parent_execution_id,
                ..
            }
            | Self::ChildPromoted {
                parent_execution_id,
                ..
            }
            | Self::ChildLaunchFailed {
                parent_execution_id,
                ..
            }
            | Self::PromotionHalted {
                parent_execution_id,
                ..
            }
            | Self::DuplicateCallback {
                parent_execution_id,
                ..
            }
            | Self::ParentResumed {
                parent_execution_id,
                ..
            }
            | Self::FanOutCancelled {
                parent_execution_id,
                ..
            } => parent_execution_id,
        }
    }

    pub fn short_circuited(parent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ShortCircuited {
            parent_execution_id: parent.into(),
            reason: reason.into(),
        }
    }

    pub fn child_created(
        parent: impl Into<String>,
        execution_id: impl Into<String>,
        candidate_node_id: impl Into<String>,
    ) -> Self {
        Self::ChildCreated {
            parent_execution_id: parent.into(),
            execution_id: execution_id.into(),
            candidate_node_id: candidate_node_id.into(),
        }
    }

    pub fn child_started(parent: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self::ChildStarted {
            parent_execution_id: parent.into(),
            execution_id: execution_id.into(),
        }
    }

    pub fn launch_failed(
        parent: impl Into<String>,
        execution_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ChildLaunchFailed {
            parent_execution_id: parent.into(),
            execution_id: execution_id.into(),
            message: message.into(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: FanOutEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: FanOutEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: FanOutEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(FanOutEvent::child_created("p1", "c1", "deploy"));
        tx.send_event(FanOutEvent::child_started("p1", "c1"));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, FanOutEvent::ChildCreated { .. }));

        let second = rx.recv().await.unwrap();
        assert!(matches!(second, FanOutEvent::ChildStarted { .. }));
        assert_eq!(second.parent_execution_id(), "p1");
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(FanOutEvent::short_circuited("p1", "no children"));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(FanOutEvent::child_started("p1", "c1"));
    }
}
