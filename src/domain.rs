use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actions::BoundAction;

// Domain data structures shared across modules.

/// One notification thread as returned by `GET /notifications`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub unread: bool,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub subject: Subject,
    #[serde(default)]
    pub repository: Option<Repository>,
    pub url: String,
    #[serde(default)]
    pub subscription_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub title: String,
    pub url: Option<String>,
    pub latest_comment_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

impl Thread {
    /// Heading used for per-thread notifications.
    pub fn project_name(&self) -> &str {
        self.repository
            .as_ref()
            .map(|repo| repo.full_name.as_str())
            .unwrap_or(self.subject.kind.as_str())
    }
}

pub const NOTIFICATION_ICON: &str = "github-symbolic";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Digest,
    Thread,
}

/// What the UI sink receives for every notification it should display.
#[derive(Clone)]
pub struct NotificationDescriptor {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub icon: &'static str,
    pub thread: Option<Thread>,
    pub activate: Option<BoundAction>,
    pub primary: Option<BoundAction>,
    pub secondary: Option<BoundAction>,
}

impl NotificationDescriptor {
    /// Labelled buttons, in display order.
    pub fn buttons(&self) -> impl Iterator<Item = &BoundAction> {
        self.primary.iter().chain(self.secondary.iter())
    }
}

impl std::fmt::Debug for NotificationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDescriptor")
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("body", &self.body)
            .field("icon", &self.icon)
            .field("thread", &self.thread.as_ref().map(|thread| &thread.id))
            .field("activate", &self.activate.as_ref().map(BoundAction::label))
            .field("primary", &self.primary.as_ref().map(BoundAction::label))
            .field("secondary", &self.secondary.as_ref().map(BoundAction::label))
            .finish()
    }
}
