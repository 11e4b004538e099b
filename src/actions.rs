use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    domain::Thread,
    events::{Event, EventBus},
    github::{self, ApiClient},
};

/// Something a user can trigger from a notification. `thread` is `None` when
/// the notification is a digest.
#[async_trait]
pub trait NotificationAction: Send + Sync {
    fn label(&self) -> &str;

    async fn execute(&self, thread: Option<&Thread>);
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to open {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },
}

/// Opens web pages on behalf of the user.
pub trait UriLauncher: Send + Sync {
    fn launch(&self, uri: &str) -> Result<(), LaunchError>;
}

pub struct SystemLauncher;

impl UriLauncher for SystemLauncher {
    fn launch(&self, uri: &str) -> Result<(), LaunchError> {
        open::that(uri).map_err(|source| LaunchError::Io {
            uri: uri.to_owned(),
            source,
        })
    }
}

pub struct OpenAction {
    client: Arc<ApiClient>,
    launcher: Arc<dyn UriLauncher>,
    bus: EventBus,
}

impl OpenAction {
    fn open_notifications_page(&self) {
        let page = github::notifications_page(self.client.domain());
        if let Err(err) = self.launcher.launch(&page) {
            warn!(error = %err, "could not open notifications page");
        }
    }
}

#[async_trait]
impl NotificationAction for OpenAction {
    fn label(&self) -> &str {
        "Open"
    }

    async fn execute(&self, thread: Option<&Thread>) {
        let Some(thread) = thread else {
            self.open_notifications_page();
            return;
        };

        match self.client.get_web_url_for_subject(&thread.subject).await {
            Ok(url) => match self.launcher.launch(&url) {
                Ok(()) => self.bus.emit(Event::NotificationRead(thread.id.clone())),
                Err(err) => {
                    warn!(thread = %thread.id, error = %err, "could not open thread");
                    self.open_notifications_page();
                }
            },
            Err(err) => {
                warn!(thread = %thread.id, error = %err, "could not resolve thread page");
                self.open_notifications_page();
            }
        }
    }
}

pub struct MarkAsReadAction {
    client: Arc<ApiClient>,
    bus: EventBus,
}

#[async_trait]
impl NotificationAction for MarkAsReadAction {
    fn label(&self) -> &str {
        "Mark as read"
    }

    async fn execute(&self, thread: Option<&Thread>) {
        match thread {
            Some(thread) => match self.client.mark_thread_as_read(thread).await {
                Ok(()) => {
                    info!(thread = %thread.id, "marked thread as read");
                    self.bus.emit(Event::NotificationRead(thread.id.clone()));
                }
                Err(err) => warn!(thread = %thread.id, error = %err, "failed to mark thread as read"),
            },
            None => match self.client.mark_all_threads_as_read(Utc::now()).await {
                Ok(()) => {
                    info!("marked all threads as read");
                    self.bus.emit(Event::AllNotificationsRead);
                }
                Err(err) => warn!(error = %err, "failed to mark all threads as read"),
            },
        }
    }
}

pub struct DismissAction;

#[async_trait]
impl NotificationAction for DismissAction {
    fn label(&self) -> &str {
        "Dismiss"
    }

    async fn execute(&self, thread: Option<&Thread>) {
        debug!(thread = ?thread.map(|thread| &thread.id), "notification dismissed");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    None,
    Open,
    MarkRead,
    Dismiss,
}

impl ActionKind {
    /// Integer codes used by the settings store.
    pub const TABLE: [(i64, ActionKind); 4] = [
        (0, ActionKind::None),
        (1, ActionKind::Open),
        (2, ActionKind::MarkRead),
        (3, ActionKind::Dismiss),
    ];
}

/// Builds actions bound to the current client.
pub struct ActionRegistry {
    client: Arc<ApiClient>,
    launcher: Arc<dyn UriLauncher>,
    bus: EventBus,
}

impl ActionRegistry {
    pub fn new(client: Arc<ApiClient>, launcher: Arc<dyn UriLauncher>, bus: EventBus) -> Self {
        Self {
            client,
            launcher,
            bus,
        }
    }

    pub fn resolve(&self, kind: ActionKind) -> Option<Arc<dyn NotificationAction>> {
        match kind {
            ActionKind::None => None,
            ActionKind::Open => Some(Arc::new(OpenAction {
                client: Arc::clone(&self.client),
                launcher: Arc::clone(&self.launcher),
                bus: self.bus.clone(),
            })),
            ActionKind::MarkRead => Some(Arc::new(MarkAsReadAction {
                client: Arc::clone(&self.client),
                bus: self.bus.clone(),
            })),
            ActionKind::Dismiss => Some(Arc::new(DismissAction)),
        }
    }

    pub fn bindings(&self, activate: ActionKind, primary: ActionKind, secondary: ActionKind) -> ActionBindings {
        ActionBindings {
            activate: self.resolve(activate),
            primary: self.resolve(primary),
            secondary: self.resolve(secondary),
        }
    }
}

/// Actions currently mapped to the three notification slots.
#[derive(Clone, Default)]
pub struct ActionBindings {
    pub activate: Option<Arc<dyn NotificationAction>>,
    pub primary: Option<Arc<dyn NotificationAction>>,
    pub secondary: Option<Arc<dyn NotificationAction>>,
}

/// An action paired with the thread it should act on.
#[derive(Clone)]
pub struct BoundAction {
    action: Arc<dyn NotificationAction>,
    thread: Option<Thread>,
}

impl BoundAction {
    pub fn new(action: Arc<dyn NotificationAction>, thread: Option<Thread>) -> Self {
        Self { action, thread }
    }

    pub fn label(&self) -> &str {
        self.action.label()
    }

    pub async fn invoke(&self) {
        self.action.execute(self.thread.as_ref()).await;
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
