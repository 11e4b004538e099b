use std::sync::Arc;

use tracing::debug;

use crate::{
    actions::ActionKind,
    diff::NotificationMode,
    events::{Event, EventBus, EventKind, ListenerId},
    storage::{SettingsStore, keys},
};

/// Property names announced through [`Event::ConfigurationPropertyChanged`].
pub mod properties {
    pub const DOMAIN: &str = "domain";
    pub const TOKEN: &str = "token";
    pub const REFRESH_INTERVAL: &str = "refreshInterval";
    pub const SHOW_PARTICIPATING_ONLY: &str = "showParticipatingOnly";
    pub const NOTIFICATION_MODE: &str = "notificationMode";
    pub const NOTIFICATION_ACTIVATE_ACTION: &str = "notificationActivateAction";
    pub const NOTIFICATION_PRIMARY_ACTION: &str = "notificationPrimaryAction";
    pub const NOTIFICATION_SECONDARY_ACTION: &str = "notificationSecondaryAction";
    pub const HIDE_NOTIFICATION_COUNT: &str = "hideNotificationCount";
    pub const HIDE_WIDGET: &str = "hideWidget";
}

const KEY_PROPERTIES: [(&str, &str); 10] = [
    (keys::DOMAIN, properties::DOMAIN),
    (keys::TOKEN, properties::TOKEN),
    (keys::REFRESH_INTERVAL, properties::REFRESH_INTERVAL),
    (keys::SHOW_PARTICIPATING_ONLY, properties::SHOW_PARTICIPATING_ONLY),
    (keys::NOTIFICATION_MODE, properties::NOTIFICATION_MODE),
    (keys::NOTIFICATION_ACTIVATE_ACTION, properties::NOTIFICATION_ACTIVATE_ACTION),
    (keys::NOTIFICATION_PRIMARY_ACTION, properties::NOTIFICATION_PRIMARY_ACTION),
    (keys::NOTIFICATION_SECONDARY_ACTION, properties::NOTIFICATION_SECONDARY_ACTION),
    (keys::HIDE_NOTIFICATION_COUNT, properties::HIDE_NOTIFICATION_COUNT),
    (keys::HIDE_WIDGET, properties::HIDE_WIDGET),
];

pub fn property_for_key(key: &str) -> Option<&'static str> {
    KEY_PROPERTIES
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, property)| *property)
}

/// Maps a stored integer onto an enum variant, falling back to `default`
/// for codes the table does not list.
pub fn int_to_enum<T: Copy>(value: i64, table: &[(i64, T)], default: T) -> T {
    table
        .iter()
        .find(|(code, _)| *code == value)
        .map(|(_, variant)| *variant)
        .unwrap_or(default)
}

/// Typed read access to the user's configuration.
pub trait ConfigProvider: Send + Sync {
    fn domain(&self) -> String;
    fn token(&self) -> String;
    /// Seconds between polls, at least 1.
    fn refresh_interval(&self) -> u64;
    fn show_participating_only(&self) -> bool;
    fn notification_mode(&self) -> NotificationMode;
    fn notification_activate_action(&self) -> ActionKind;
    fn notification_primary_action(&self) -> ActionKind;
    fn notification_secondary_action(&self) -> ActionKind;
    fn hide_notification_count(&self) -> bool;
    fn hide_widget(&self) -> bool;
}

/// [`ConfigProvider`] backed by a [`SettingsStore`]. Relays raw
/// `SettingChanged` events as `ConfigurationPropertyChanged`.
pub struct Configuration {
    store: Arc<SettingsStore>,
    bus: EventBus,
    listener: ListenerId,
}

impl Configuration {
    pub fn new(store: Arc<SettingsStore>, bus: EventBus) -> Self {
        let relay = bus.clone();
        let listener = bus.connect(EventKind::SettingChanged, move |event| {
            let Event::SettingChanged(key) = event else {
                return;
            };
            match property_for_key(key) {
                Some(property) => {
                    relay.emit(Event::ConfigurationPropertyChanged(property.to_owned()))
                }
                None => debug!(key = %key, "ignoring change to unmapped setting"),
            }
        });
        Self {
            store,
            bus,
            listener,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &SettingsStore {
        &self.store
    }
}

impl Drop for Configuration {
    fn drop(&mut self) {
        self.bus.disconnect(self.listener);
    }
}

impl ConfigProvider for Configuration {
    fn domain(&self) -> String {
        self.store.get_string(keys::DOMAIN)
    }

    fn token(&self) -> String {
        self.store.get_string(keys::TOKEN)
    }

    fn refresh_interval(&self) -> u64 {
        u64::try_from(self.store.get_int(keys::REFRESH_INTERVAL))
            .unwrap_or(1)
            .max(1)
    }

    fn show_participating_only(&self) -> bool {
        self.store.get_bool(keys::SHOW_PARTICIPATING_ONLY)
    }

    fn notification_mode(&self) -> NotificationMode {
        int_to_enum(
            self.store.get_int(keys::NOTIFICATION_MODE),
            &NotificationMode::TABLE,
            NotificationMode::Single,
        )
    }

    fn notification_activate_action(&self) -> ActionKind {
        int_to_enum(
            self.store.get_int(keys::NOTIFICATION_ACTIVATE_ACTION),
            &ActionKind::TABLE,
            ActionKind::Open,
        )
    }

    fn notification_primary_action(&self) -> ActionKind {
        int_to_enum(
            self.store.get_int(keys::NOTIFICATION_PRIMARY_ACTION),
            &ActionKind::TABLE,
            ActionKind::MarkRead,
        )
    }

    fn notification_secondary_action(&self) -> ActionKind {
        int_to_enum(
            self.store.get_int(keys::NOTIFICATION_SECONDARY_ACTION),
            &ActionKind::TABLE,
            ActionKind::Dismiss,
        )
    }

    fn hide_notification_count(&self) -> bool {
        self.store.get_bool(keys::HIDE_NOTIFICATION_COUNT)
    }

    fn hide_widget(&self) -> bool {
        self.store.get_bool(keys::HIDE_WIDGET)
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
