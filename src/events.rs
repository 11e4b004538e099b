use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

// Synchronous fire-and-forget event bus shared by the polling core and its
// collaborators.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    ConfigurationPropertyChanged(String),
    NotificationRead(String),
    AllNotificationsRead,
    /// `None` means the count is unknown because the last poll failed.
    UpdateNotificationCount(Option<usize>),
    SettingChanged(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConfigurationPropertyChanged,
    NotificationRead,
    AllNotificationsRead,
    UpdateNotificationCount,
    SettingChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConfigurationPropertyChanged(_) => EventKind::ConfigurationPropertyChanged,
            Event::NotificationRead(_) => EventKind::NotificationRead,
            Event::AllNotificationsRead => EventKind::AllNotificationsRead,
            Event::UpdateNotificationCount(_) => EventKind::UpdateNotificationCount,
            Event::SettingChanged(_) => EventKind::SettingChanged,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<EventKind, HashMap<ListenerId, Listener>>,
    kinds: HashMap<ListenerId, EventKind>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.lock();
        registry
            .by_kind
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(listener));
        registry.kinds.insert(id, kind);
        id
    }

    /// Returns `false` when the handle was not registered.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut registry = self.lock();
        let Some(kind) = registry.kinds.remove(&id) else {
            return false;
        };
        registry
            .by_kind
            .get_mut(&kind)
            .is_some_and(|listeners| listeners.remove(&id).is_some())
    }

    /// Listeners run in registration order against a snapshot, so a listener
    /// may connect or disconnect others without affecting this emission.
    pub fn emit(&self, event: Event) {
        let registry = self.lock();
        let mut snapshot: Vec<(ListenerId, Listener)> = match registry.by_kind.get(&event.kind()) {
            Some(listeners) => listeners
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect(),
            None => return,
        };
        drop(registry);
        snapshot.sort_unstable_by_key(|(id, _)| *id);
        for (_, listener) in snapshot {
            listener(&event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &EventBus, kind: EventKind) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.connect(kind, move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[test]
    fn emit_reaches_only_matching_listeners() {
        let bus = EventBus::new();
        let reads = recorder(&bus, EventKind::NotificationRead);
        let counts = recorder(&bus, EventKind::UpdateNotificationCount);

        bus.emit(Event::NotificationRead("42".into()));

        assert_eq!(*reads.lock().unwrap(), vec![Event::NotificationRead("42".into())]);
        assert!(counts.lock().unwrap().is_empty());
    }

    #[test]
    fn disconnect_removes_listener_by_handle() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let id = bus.connect(EventKind::AllNotificationsRead, move |_| {
            *counter.lock().unwrap() += 1;
        });

        bus.emit(Event::AllNotificationsRead);
        assert!(bus.disconnect(id));
        assert!(!bus.disconnect(id));
        bus.emit(Event::AllNotificationsRead);

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let ids: Vec<_> = (0..16)
            .map(|n| {
                let order = Arc::clone(&order);
                bus.connect(EventKind::UpdateNotificationCount, move |_| {
                    order.lock().unwrap().push(n)
                })
            })
            .collect();
        bus.disconnect(ids[3]);

        bus.emit(Event::UpdateNotificationCount(Some(1)));

        let expected: Vec<_> = (0..16).filter(|n| *n != 3).collect();
        assert_eq!(*order.lock().unwrap(), expected);
    }

    #[test]
    fn listener_can_disconnect_itself_during_emit() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(Mutex::new(0));

        let inner_bus = bus.clone();
        let inner_slot = Arc::clone(&slot);
        let inner_hits = Arc::clone(&hits);
        let id = bus.connect(EventKind::SettingChanged, move |_| {
            *inner_hits.lock().unwrap() += 1;
            if let Some(id) = inner_slot.lock().unwrap().take() {
                inner_bus.disconnect(id);
            }
        });
        *slot.lock().unwrap() = Some(id);
        let later = recorder(&bus, EventKind::SettingChanged);

        bus.emit(Event::SettingChanged("domain".into()));
        bus.emit(Event::SettingChanged("token".into()));

        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(later.lock().unwrap().len(), 2);
    }
}
