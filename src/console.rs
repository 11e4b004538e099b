use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tracing::info;

use crate::{
    actions::BoundAction,
    controller::NotificationSink,
    domain::{NotificationDescriptor, NotificationKind},
    events::{Event, EventBus, EventKind},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Activate,
    Primary,
    Secondary,
}

/// Parses interactive commands of the form `<slot> <number>`, where slot is
/// `a`/`open`, `p` or `s`.
pub fn parse_command(line: &str) -> Option<(Slot, usize)> {
    let mut parts = line.split_whitespace();
    let slot = match parts.next()? {
        "a" | "open" => Slot::Activate,
        "p" => Slot::Primary,
        "s" => Slot::Secondary,
        _ => return None,
    };
    let index = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((slot, index))
}

struct Shown {
    number: usize,
    notification: NotificationDescriptor,
}

#[derive(Default)]
struct Entries {
    last_number: usize,
    items: Vec<Shown>,
}

/// Prints notifications to stdout and keeps the visible ones addressable by
/// number. Numbers stay stable while an entry is visible.
#[derive(Default)]
pub struct ConsoleSink {
    entries: Mutex<Entries>,
    hide_count: AtomicBool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints count updates and drops entries whose threads were read.
    pub fn follow(self: &Arc<Self>, bus: &EventBus) {
        let sink = Arc::clone(self);
        bus.connect(EventKind::UpdateNotificationCount, move |event| {
            if let Event::UpdateNotificationCount(count) = event {
                sink.update_count(*count);
            }
        });
        let sink = Arc::clone(self);
        bus.connect(EventKind::NotificationRead, move |event| {
            if let Event::NotificationRead(id) = event {
                sink.forget_thread(id);
            }
        });
        let sink = Arc::clone(self);
        bus.connect(EventKind::AllNotificationsRead, move |_| sink.lock().items.clear());
    }

    /// Returns the action in `slot` of notification `number` and closes that
    /// notification. Nothing is closed when the slot is empty.
    pub fn take_action(&self, slot: Slot, number: usize) -> Option<BoundAction> {
        let mut entries = self.lock();
        let position = entries.items.iter().position(|item| item.number == number)?;
        let notification = &entries.items[position].notification;
        let action = match slot {
            Slot::Activate => notification.activate.clone(),
            Slot::Primary => notification.primary.clone(),
            Slot::Secondary => notification.secondary.clone(),
        }?;
        entries.items.remove(position);
        Some(action)
    }

    pub fn update_count(&self, count: Option<usize>) {
        if self.hide_count.load(Ordering::Relaxed) {
            return;
        }
        match count {
            Some(count) => println!("unread: {count}"),
            None => println!("unread: ! (last refresh failed)"),
        }
    }

    fn forget_thread(&self, id: &str) {
        self.lock().items.retain(|item| {
            item.notification
                .thread
                .as_ref()
                .is_none_or(|thread| thread.id != id)
        });
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSink for ConsoleSink {
    fn show(&self, notification: NotificationDescriptor) {
        let mut entries = self.lock();
        let existing = entries.items.iter().position(|item| {
            let shown = &item.notification;
            match notification.kind {
                NotificationKind::Digest => shown.kind == NotificationKind::Digest,
                NotificationKind::Thread => {
                    shown.kind == NotificationKind::Thread
                        && shown.thread.as_ref().map(|thread| &thread.id)
                        == notification.thread.as_ref().map(|thread| &thread.id)
                }
            }
        });

        let (position, verb) = match existing {
            Some(position) => {
                entries.items[position].notification = notification;
                (position, "updated")
            }
            None => {
                entries.last_number += 1;
                let number = entries.last_number;
                entries.items.push(Shown {
                    number,
                    notification,
                });
                (entries.items.len() - 1, "new")
            }
        };

        let Shown {
            number,
            notification: current,
        } = &entries.items[position];
        let buttons: Vec<&str> = current.buttons().map(BoundAction::label).collect();
        println!("[{number}] ({}) {}: {}", current.icon, current.title, current.body);
        if !buttons.is_empty() {
            println!("    actions: {}", buttons.join(" | "));
        }
        info!(number, verb, title = %current.title, "notification");
    }

    fn update_visibility(&self, hide_count: bool, hide_widget: bool) {
        self.hide_count.store(hide_count || hide_widget, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actions::{ActionBindings, DismissAction},
        diff::{NotificationDiffEngine, NotificationMode},
        domain::{Thread, fixtures::thread},
    };

    fn digest(count: usize) -> NotificationDescriptor {
        let current: Vec<_> = (0..count).map(|n| thread(&n.to_string(), 0)).collect();
        NotificationDiffEngine::new(NotificationMode::Digest)
            .notifications(&[], &current, &ActionBindings::default())
            .remove(0)
    }

    fn single(threads: &[Thread]) -> Vec<NotificationDescriptor> {
        let bindings = ActionBindings {
            activate: None,
            primary: None,
            secondary: Some(Arc::new(DismissAction)),
        };
        NotificationDiffEngine::new(NotificationMode::Single).notifications(&[], threads, &bindings)
    }

    fn visible(sink: &ConsoleSink) -> Vec<(usize, String)> {
        sink.lock()
            .items
            .iter()
            .map(|item| (item.number, item.notification.body.clone()))
            .collect()
    }

    #[test]
    fn parse_command_accepts_slot_and_number() {
        assert_eq!(parse_command("a 2"), Some((Slot::Activate, 2)));
        assert_eq!(parse_command("open 1"), Some((Slot::Activate, 1)));
        assert_eq!(parse_command("  s   3 "), Some((Slot::Secondary, 3)));
        assert_eq!(parse_command("p"), None);
        assert_eq!(parse_command("x 1"), None);
        assert_eq!(parse_command("p 1 2"), None);
    }

    #[test]
    fn digest_is_updated_in_place() {
        let sink = ConsoleSink::new();
        sink.show(digest(2));
        sink.show(digest(5));

        assert_eq!(visible(&sink), [(1, "You have 5 new notifications.".to_owned())]);
    }

    #[test]
    fn updated_thread_replaces_its_entry() {
        let sink = ConsoleSink::new();
        for notification in single(&[thread("1", 0), thread("2", 0)]) {
            sink.show(notification);
        }
        let mut renamed = thread("1", 10);
        renamed.subject.title = "Issue 1 (edited)".to_owned();
        for notification in single(&[renamed]) {
            sink.show(notification);
        }

        assert_eq!(
            visible(&sink),
            [(1, "Issue 1 (edited)".to_owned()), (2, "Issue 2".to_owned())]
        );
    }

    #[test]
    fn taking_an_action_closes_the_notification() {
        let sink = ConsoleSink::new();
        for notification in single(&[thread("1", 0)]) {
            sink.show(notification);
        }

        assert!(sink.take_action(Slot::Secondary, 0).is_none());
        assert!(sink.take_action(Slot::Primary, 1).is_none());
        assert_eq!(visible(&sink).len(), 1);

        assert_eq!(sink.take_action(Slot::Secondary, 1).unwrap().label(), "Dismiss");
        assert!(visible(&sink).is_empty());
        assert!(sink.take_action(Slot::Secondary, 1).is_none());
    }

    #[test]
    fn read_events_drop_entries_and_keep_numbers() {
        let bus = EventBus::new();
        let sink = Arc::new(ConsoleSink::new());
        sink.follow(&bus);
        for notification in single(&[thread("1", 0), thread("2", 0), thread("3", 0)]) {
            sink.show(notification);
        }

        bus.emit(Event::NotificationRead("2".into()));
        assert_eq!(
            visible(&sink),
            [(1, "Issue 1".to_owned()), (3, "Issue 3".to_owned())]
        );

        for notification in single(&[thread("4", 0)]) {
            sink.show(notification);
        }
        assert_eq!(visible(&sink).last(), Some(&(4, "Issue 4".to_owned())));

        bus.emit(Event::AllNotificationsRead);
        assert!(visible(&sink).is_empty());
    }
}
