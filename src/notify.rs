use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::{
    aggregate::AggregateResultSet,
    domain::{Category, ErrorRecord},
    storage::{KeyValueStore, StorageError},
};

// Storage keys; both survive restarts so a fact is announced only once.
pub const CL_LAST_NOTIFICATION_KEY: &str = "cl_last_notified";
pub const ACTIVE_ERRORS_KEY: &str = "active_errors";

const ERROR_TITLE: &str = "Error fetching CL status";
const ERROR_ICON: &str = "img/ic_assignment_late_black_24dp_2x.png";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub icon: &'static str,
    pub message: String,
}

/// Push-notification sink.
pub trait Notifier: Send + Sync {
    fn emit(&self, notification: &Notification);
}

/// Delivers notifications through the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, notification: &Notification) {
        info!(
            target: "cl_monitor::notification",
            id = %notification.id,
            title = %notification.title,
            icon = notification.icon,
            "{}",
            notification.message
        );
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub errors: bool,
}

/// What the user has already been told about.
///
/// `last_notified` maps a change id to the category it was last announced
/// in. Entries are never cleared when a CL leaves every category, so a CL
/// that returns to the category it was last announced in stays silent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotificationState {
    pub last_notified: BTreeMap<String, Category>,
    pub active_error_hosts: BTreeSet<String>,
}

impl NotificationState {
    /// Reads both keys. Missing or unreadable state counts as "never notified".
    pub fn load(store: &dyn KeyValueStore) -> Self {
        Self {
            last_notified: load_key(store, CL_LAST_NOTIFICATION_KEY),
            active_error_hosts: load_key(store, ACTIVE_ERRORS_KEY),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        save_key(store, ACTIVE_ERRORS_KEY, &self.active_error_hosts);
        save_key(store, CL_LAST_NOTIFICATION_KEY, &self.last_notified);
    }

    /// Returns one notification per CL whose notifiable category differs from
    /// the one it was last announced in, and records the new category.
    pub fn record_changelists(&mut self, results: &AggregateResultSet) -> Vec<Notification> {
        let mut notifications = Vec::new();
        for (category, cls) in results.sections() {
            if !category.notifiable() {
                continue;
            }
            let info = category.info();
            for cl in cls {
                if self.last_notified.get(&cl.change_id) == Some(&category) {
                    continue;
                }
                self.last_notified.insert(cl.change_id.clone(), category);
                notifications.push(Notification {
                    id: cl.url.clone(),
                    title: info.notification_title.to_owned(),
                    icon: info.icon,
                    message: cl.subject.clone(),
                });
            }
        }
        notifications
    }

    /// Announces hosts that started failing this cycle. Several new failures
    /// are folded into one notification keyed by the first failing host.
    /// The active set becomes exactly this cycle's failing hosts.
    pub fn record_errors(&mut self, errors: &[ErrorRecord]) -> Option<Notification> {
        let new_errors: Vec<&ErrorRecord> = errors
            .iter()
            .filter(|record| !self.active_error_hosts.contains(&record.host))
            .collect();

        self.active_error_hosts = errors.iter().map(|record| record.host.clone()).collect();

        let first = new_errors.first()?;
        let message = if new_errors.len() == 1 {
            format!("Could not load results from {}: {}", first.host, first.error)
        } else {
            format!("Could not load results from {} hosts.", new_errors.len())
        };
        Some(Notification {
            id: first.host.clone(),
            title: ERROR_TITLE.to_owned(),
            icon: ERROR_ICON,
            message,
        })
    }
}

/// Runs the notification state machine once per refresh cycle.
pub struct NotificationCenter {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationCenter {
    pub fn new(store: Arc<dyn KeyValueStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Emits notifications for this cycle's transitions and persists the new
    /// state. Returns what was sent.
    pub fn process(
        &self,
        settings: NotificationSettings,
        results: &AggregateResultSet,
        errors: &[ErrorRecord],
    ) -> Vec<Notification> {
        if !settings.enabled {
            return Vec::new();
        }

        let mut state = NotificationState::load(self.store.as_ref());
        let mut sent = Vec::new();
        if settings.errors {
            sent.extend(state.record_errors(errors));
        }
        sent.extend(state.record_changelists(results));

        for notification in &sent {
            self.notifier.emit(notification);
        }
        state.save(self.store.as_ref());
        sent
    }
}

fn load_key<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    let loaded = store
        .get(key)
        .and_then(|value| {
            value
                .map(serde_json::from_value)
                .transpose()
                .map_err(StorageError::from)
        });
    match loaded {
        Ok(value) => value.unwrap_or_default(),
        Err(err) => {
            warn!(key, %err, "could not read notification state; starting fresh");
            T::default()
        }
    }
}

fn save_key<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let attempt = || -> Result<(), StorageError> { store.put(key, serde_json::to_value(value)?) };
    if let Err(err) = attempt() {
        warn!(key, %err, "failed to persist notification state; retrying");
        if let Err(err) = attempt() {
            warn!(key, %err, "notification state lost; next cycle may repeat notifications");
        }
    }
}


#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{testing::RecordingNotifier, *};
    use crate::{
        domain::{Changelist, fixtures},
        gerrit::FetchError,
        storage::MemoryStore,
    };

    const A: &str = "https://a-review.example.com";
    const B: &str = "https://b-review.example.com";
    const ON: NotificationSettings = NotificationSettings {
        enabled: true,
        errors: true,
    };

    fn results(cls: &[Changelist]) -> AggregateResultSet {
        AggregateResultSet::from_changelists(cls)
    }

    fn failure(host: &str) -> ErrorRecord {
        ErrorRecord {
            host: host.to_owned(),
            error: FetchError::Network("Service Unavailable".into()),
        }
    }

    fn center() -> (NotificationCenter, Arc<MemoryStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        (
            NotificationCenter::new(store.clone(), notifier.clone()),
            store,
            notifier,
        )
    }

    #[test]
    fn cl_is_notified_once_per_category_change() {
        let (center, _, notifier) = center();
        let ready = [fixtures::cl("I1", A, Category::ReadyToSubmit)];
        let incoming = [fixtures::cl("I1", A, Category::OutgoingNeedsAttention)];

        let first = center.process(ON, &results(&ready), &[]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].title, "Your CL is ready to submit");
        assert_eq!(first[0].message, "Subject of I1");
        assert_eq!(first[0].id, format!("{A}/c/project/+/1"));

        assert!(center.process(ON, &results(&ready), &[]).is_empty());
        assert_eq!(center.process(ON, &results(&incoming), &[]).len(), 1);
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn non_notifiable_categories_are_ignored_and_leave_state_alone() {
        let (center, store, notifier) = center();
        let ready = [fixtures::cl("I1", A, Category::ReadyToSubmit)];
        let stale = [fixtures::cl("I1", A, Category::Stale)];

        center.process(ON, &results(&ready), &[]);
        center.process(ON, &results(&stale), &[]);
        assert_eq!(
            store.get(CL_LAST_NOTIFICATION_KEY).unwrap(),
            Some(json!({"I1": "ready_to_submit"}))
        );

        // Back in the last-announced category: no repeat.
        center.process(ON, &results(&ready), &[]);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn cl_absent_from_results_keeps_its_entry() {
        let (center, _, notifier) = center();
        let ready = [fixtures::cl("I1", A, Category::ReadyToSubmit)];

        center.process(ON, &results(&ready), &[]);
        center.process(ON, &results(&[]), &[]);
        center.process(ON, &results(&ready), &[]);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn failing_host_is_announced_once_until_it_recovers() {
        let (center, store, notifier) = center();
        let empty = results(&[]);

        for _ in 0..3 {
            center.process(ON, &empty, &[failure(B)]);
        }
        assert_eq!(notifier.count(), 1);
        assert_eq!(store.get(ACTIVE_ERRORS_KEY).unwrap(), Some(json!([B])));

        center.process(ON, &empty, &[]);
        assert_eq!(store.get(ACTIVE_ERRORS_KEY).unwrap(), Some(json!([])));

        center.process(ON, &empty, &[failure(B)]);
        assert_eq!(notifier.count(), 2);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(
            sent[1].message,
            format!("Could not load results from {B}: Service Unavailable")
        );
        assert_eq!(sent[1].title, ERROR_TITLE);
    }

    #[test]
    fn several_new_failures_are_summarized() {
        let mut state = NotificationState::default();
        state.active_error_hosts.insert(A.to_owned());
        let c = "https://c-review.example.com";

        let notification = state
            .record_errors(&[failure(A), failure(B), failure(c)])
            .unwrap();

        assert_eq!(notification.id, B);
        assert_eq!(notification.message, "Could not load results from 2 hosts.");
        assert_eq!(state.active_error_hosts.len(), 3);
    }

    #[test]
    fn disabled_toggles_suppress_notifications() {
        let (center, store, notifier) = center();
        let ready = [fixtures::cl("I1", A, Category::ReadyToSubmit)];
        let off = NotificationSettings {
            enabled: false,
            errors: true,
        };
        assert!(center.process(off, &results(&ready), &[failure(B)]).is_empty());
        assert_eq!(store.get(CL_LAST_NOTIFICATION_KEY).unwrap(), None);

        let no_errors = NotificationSettings {
            enabled: true,
            errors: false,
        };
        let sent = center.process(no_errors, &results(&ready), &[failure(B)]);
        assert_eq!(sent.len(), 1);
        assert_eq!(store.get(ACTIVE_ERRORS_KEY).unwrap(), Some(json!([])));
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn ready_cl_and_failing_host_both_notify() {
        let (center, _, _) = center();
        let ready = [fixtures::cl("I1", A, Category::ReadyToSubmit)];
        let sent = center.process(ON, &results(&ready), &[failure(B)]);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].title, ERROR_TITLE);
        assert_eq!(sent[1].title, "Your CL is ready to submit");
    }

    #[test]
    fn unreadable_state_is_treated_as_never_notified() {
        let (center, store, notifier) = center();
        store
            .put(CL_LAST_NOTIFICATION_KEY, Value::String("garbage".into()))
            .unwrap();
        let ready = [fixtures::cl("I1", A, Category::ReadyToSubmit)];
        center.process(ON, &results(&ready), &[]);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn overlapping_cycles_repeat_at_most_one_notification() {
        let store = MemoryStore::default();
        let ready = results(&[fixtures::cl("I1", A, Category::ReadyToSubmit)]);

        // Both cycles read before either writes, so each fact repeats once.
        let mut timer = NotificationState::load(&store);
        let mut user = NotificationState::load(&store);
        let from_timer = timer.record_changelists(&ready).len()
            + usize::from(timer.record_errors(&[failure(B)]).is_some());
        let from_user = user.record_changelists(&ready).len()
            + usize::from(user.record_errors(&[failure(B)]).is_some());
        timer.save(&store);
        user.save(&store);

        assert_eq!(from_timer, 2);
        assert_eq!(from_user, 2);
        assert_eq!(NotificationState::load(&store), user);

        let mut next = NotificationState::load(&store);
        assert!(next.record_changelists(&ready).is_empty());
        assert!(next.record_errors(&[failure(B)]).is_none());
    }
}
