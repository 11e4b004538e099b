use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    actions::{ActionBindings, ActionRegistry, UriLauncher},
    config::{ConfigProvider, properties},
    diff::NotificationDiffEngine,
    domain::{NotificationDescriptor, Thread},
    events::{Event, EventBus, EventKind, ListenerId},
    github::ApiClient,
    http::HttpTransport,
    retry::{RetrySchedule, RetryTask, RetryTimer, ScheduleHandle},
};

/// Receives notifications to display. Digest notifications should replace a
/// digest that is still visible rather than stack a second one.
pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: NotificationDescriptor);

    fn update_visibility(&self, _hide_count: bool, _hide_widget: bool) {}
}

struct Core {
    config: Arc<dyn ConfigProvider>,
    transport: Arc<dyn HttpTransport>,
    launcher: Arc<dyn UriLauncher>,
    sink: Arc<dyn NotificationSink>,
    bus: EventBus,
    schedule: ScheduleHandle,
    client: RwLock<Arc<ApiClient>>,
    bindings: RwLock<ActionBindings>,
    previous: Mutex<Vec<Thread>>,
}

impl Core {
    fn client(&self) -> Arc<ApiClient> {
        Arc::clone(&self.client.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn previous(&self) -> MutexGuard<'_, Vec<Thread>> {
        self.previous.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rebuild_client(&self) {
        let client = Arc::new(ApiClient::new(
            Arc::clone(&self.transport),
            &self.config.domain(),
            &self.config.token(),
        ));
        info!(domain = client.domain(), "api client rebuilt");
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
        self.rebind_actions();
    }

    fn rebind_actions(&self) {
        let registry = ActionRegistry::new(self.client(), Arc::clone(&self.launcher), self.bus.clone());
        let bindings = registry.bindings(
            self.config.notification_activate_action(),
            self.config.notification_primary_action(),
            self.config.notification_secondary_action(),
        );
        *self.bindings.write().unwrap_or_else(PoisonError::into_inner) = bindings;
    }

    async fn fetch(&self) -> bool {
        let client = self.client();
        let outcome = match client
            .list_threads(self.config.show_participating_only())
            .await
        {
            Ok(threads) => {
                self.apply(threads);
                true
            }
            Err(err) if err.is_not_modified() => {
                debug!("notifications not modified");
                true
            }
            Err(err) => {
                warn!(status = err.status_code, error = %err, "failed to fetch notifications");
                self.bus.emit(Event::UpdateNotificationCount(None));
                false
            }
        };

        // The server-enforced cadence always wins over the local setting.
        self.schedule
            .lock()
            .set_lower_interval_limit(Some(client.poll_interval()));
        outcome
    }

    fn apply(&self, threads: Vec<Thread>) {
        let engine = NotificationDiffEngine::new(self.config.notification_mode());
        let bindings = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let (notifications, count) = {
            let mut previous = self.previous();
            let notifications = engine.notifications(&previous, &threads, &bindings);
            *previous = threads;
            (notifications, previous.len())
        };

        debug!(count, new = notifications.len(), "notifications fetched");
        for notification in notifications {
            self.sink.show(notification);
        }
        self.bus.emit(Event::UpdateNotificationCount(Some(count)));
    }

    fn forget_thread(&self, id: &str) {
        let count = {
            let mut previous = self.previous();
            previous.retain(|thread| thread.id != id);
            previous.len()
        };
        self.bus.emit(Event::UpdateNotificationCount(Some(count)));
    }

    fn forget_all(&self) {
        self.previous().clear();
        self.bus.emit(Event::UpdateNotificationCount(Some(0)));
    }

    fn update_visibility(&self) {
        self.sink.update_visibility(
            self.config.hide_notification_count(),
            self.config.hide_widget(),
        );
    }
}

struct FetchTask {
    core: Arc<Core>,
}

#[async_trait]
impl RetryTask for FetchTask {
    async fn run(&self) -> anyhow::Result<bool> {
        Ok(self.core.fetch().await)
    }
}

pub struct PollingController {
    core: Arc<Core>,
    timer: Arc<Mutex<RetryTimer>>,
    listeners: Vec<ListenerId>,
}

impl PollingController {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        transport: Arc<dyn HttpTransport>,
        launcher: Arc<dyn UriLauncher>,
        sink: Arc<dyn NotificationSink>,
        bus: EventBus,
    ) -> Self {
        let client = Arc::new(ApiClient::new(
            Arc::clone(&transport),
            &config.domain(),
            &config.token(),
        ));
        let schedule = ScheduleHandle::new(RetrySchedule::new(config.refresh_interval()));
        let core = Arc::new(Core {
            config,
            transport,
            launcher,
            sink,
            bus: bus.clone(),
            schedule: schedule.clone(),
            client: RwLock::new(client),
            bindings: RwLock::new(ActionBindings::default()),
            previous: Mutex::new(Vec::new()),
        });
        core.rebind_actions();

        let task = Arc::new(FetchTask {
            core: Arc::clone(&core),
        });
        let timer = Arc::new(Mutex::new(RetryTimer::new(task, schedule)));

        let listeners = vec![
            connect_property_listener(&bus, Arc::downgrade(&core), Arc::downgrade(&timer)),
            {
                let core = Arc::downgrade(&core);
                bus.connect(EventKind::NotificationRead, move |event| {
                    if let (Event::NotificationRead(id), Some(core)) = (event, core.upgrade()) {
                        core.forget_thread(id);
                    }
                })
            },
            {
                let core = Arc::downgrade(&core);
                bus.connect(EventKind::AllNotificationsRead, move |_| {
                    if let Some(core) = core.upgrade() {
                        core.forget_all();
                    }
                })
            },
        ];

        Self {
            core,
            timer,
            listeners,
        }
    }

    /// Starts polling right away. Must be called from within a tokio runtime.
    pub fn start(&self) {
        info!(interval = self.core.config.refresh_interval(), "polling started");
        lock_timer(&self.timer).start(Duration::ZERO);
    }

    pub fn stop(&self) {
        lock_timer(&self.timer).stop();
    }

    #[cfg(test)]
    pub fn is_polling(&self) -> bool {
        lock_timer(&self.timer).is_scheduled()
    }

    #[cfg(test)]
    /// One fetch outside the timer. Returns `false` when the fetch failed.
    pub async fn poll_once(&self) -> bool {
        self.core.fetch().await
    }

    #[cfg(test)]
    pub fn client(&self) -> Arc<ApiClient> {
        self.core.client()
    }

    #[cfg(test)]
    pub fn threads(&self) -> Vec<Thread> {
        self.core.previous().clone()
    }

    #[cfg(test)]
    pub fn schedule(&self) -> &ScheduleHandle {
        &self.core.schedule
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        for listener in self.listeners.drain(..) {
            self.core.bus.disconnect(listener);
        }
        lock_timer(&self.timer).stop();
    }
}

fn lock_timer(timer: &Mutex<RetryTimer>) -> MutexGuard<'_, RetryTimer> {
    timer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn connect_property_listener(
    bus: &EventBus,
    core: Weak<Core>,
    timer: Weak<Mutex<RetryTimer>>,
) -> ListenerId {
    bus.connect(EventKind::ConfigurationPropertyChanged, move |event| {
        let Event::ConfigurationPropertyChanged(name) = event else {
            return;
        };
        let (Some(core), Some(timer)) = (core.upgrade(), timer.upgrade()) else {
            return;
        };
        debug!(property = %name, "configuration changed");

        match name.as_str() {
            properties::DOMAIN | properties::TOKEN => {
                core.rebuild_client();
                restart_if_running(&timer);
            }
            properties::REFRESH_INTERVAL | properties::SHOW_PARTICIPATING_ONLY => {
                core.schedule
                    .lock()
                    .set_interval(core.config.refresh_interval());
                restart_if_running(&timer);
            }
            properties::NOTIFICATION_ACTIVATE_ACTION
            | properties::NOTIFICATION_PRIMARY_ACTION
            | properties::NOTIFICATION_SECONDARY_ACTION => core.rebind_actions(),
            properties::HIDE_NOTIFICATION_COUNT | properties::HIDE_WIDGET => {
                core.update_visibility()
            }
            _ => {}
        }
    })
}

fn restart_if_running(timer: &Mutex<RetryTimer>) {
    let mut timer = lock_timer(timer);
    if timer.is_scheduled() {
        timer.restart(Duration::ZERO);
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
