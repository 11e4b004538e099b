use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    actions::{ActionBindings, BoundAction, NotificationAction},
    domain::{NOTIFICATION_ICON, NotificationDescriptor, NotificationKind, Thread},
};

pub const DIGEST_TITLE: &str = "GitHub Notifications";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationMode {
    None,
    Single,
    Digest,
}

impl NotificationMode {
    /// Integer codes used by the settings store.
    pub const TABLE: [(i64, NotificationMode); 3] = [
        (0, NotificationMode::None),
        (1, NotificationMode::Single),
        (2, NotificationMode::Digest),
    ];
}

/// Result of comparing two polls, before any UI data is attached.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingNotification {
    Digest { count: usize },
    Thread(Thread),
}

pub fn digest_text(count: usize) -> String {
    if count == 1 {
        "You have one new notification.".to_owned()
    } else {
        format!("You have {count} new notifications.")
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NotificationDiffEngine {
    mode: NotificationMode,
}

impl NotificationDiffEngine {
    pub fn new(mode: NotificationMode) -> Self {
        Self { mode }
    }

    pub fn diff(&self, previous: &[Thread], current: &[Thread]) -> Vec<PendingNotification> {
        match self.mode {
            NotificationMode::None => Vec::new(),
            NotificationMode::Digest => {
                if current.len() > previous.len() {
                    vec![PendingNotification::Digest {
                        count: current.len(),
                    }]
                } else {
                    Vec::new()
                }
            }
            NotificationMode::Single => {
                let seen: HashMap<&str, DateTime<Utc>> = previous
                    .iter()
                    .map(|thread| (thread.id.as_str(), thread.updated_at))
                    .collect();
                current
                    .iter()
                    .filter(|thread| match seen.get(thread.id.as_str()) {
                        None => true,
                        Some(updated_at) => thread.updated_at > *updated_at,
                    })
                    .cloned()
                    .map(PendingNotification::Thread)
                    .collect()
            }
        }
    }

    pub fn notifications(
        &self,
        previous: &[Thread],
        current: &[Thread],
        bindings: &ActionBindings,
    ) -> Vec<NotificationDescriptor> {
        self.diff(previous, current)
            .into_iter()
            .map(|pending| describe(pending, bindings))
            .collect()
    }
}

fn describe(pending: PendingNotification, bindings: &ActionBindings) -> NotificationDescriptor {
    let (kind, title, body, thread) = match pending {
        PendingNotification::Digest { count } => (
            NotificationKind::Digest,
            DIGEST_TITLE.to_owned(),
            digest_text(count),
            None,
        ),
        PendingNotification::Thread(thread) => (
            NotificationKind::Thread,
            thread.project_name().to_owned(),
            thread.subject.title.clone(),
            Some(thread),
        ),
    };

    let bind = |slot: &Option<Arc<dyn NotificationAction>>| {
        slot.as_ref()
            .map(|action| BoundAction::new(Arc::clone(action), thread.clone()))
    };

    NotificationDescriptor {
        kind,
        title,
        body,
        icon: NOTIFICATION_ICON,
        activate: bind(&bindings.activate),
        primary: bind(&bindings.primary),
        secondary: bind(&bindings.secondary),
        thread,
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
