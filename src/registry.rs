//! The set of known alarms and alarm types.
//!
//! Every mutation goes through [`AlarmRegistry`] which then notifies its
//! subscribers. Listeners run after the internal lock is released, so a
//! listener is free to call back into the registry.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Duration, Local};

use crate::{
    alarm::{Alarm, AlarmId, AlarmType},
    daily::DailyAlarmType,
    error::Result,
    AlarmError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(Alarm),
    Removed(Alarm),
    Updated(Alarm),
    /// sent after every other event, and once after a bulk restore
    Mutated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// The alarm that rings next and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRing {
    pub alarm: Alarm,
    pub at: DateTime<Local>,
}

#[derive(Default)]
struct State {
    // ordered so that ties in `next_ring` go to the lowest id
    alarms: BTreeMap<AlarmId, Alarm>,
    types: HashMap<String, Arc<dyn AlarmType>>,
    // wider than an id so the counter can sit one past the last valid id
    next_id: u64,
}

#[derive(Default)]
pub struct AlarmRegistry {
    state: Mutex<State>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: Mutex<u64>,
}

impl fmt::Debug for AlarmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("AlarmRegistry")
            .field("alarms", &state.alarms)
            .field("types", &state.types.keys().collect::<Vec<_>>())
            .field("next_id", &state.next_id)
            .finish_non_exhaustive()
    }
}

impl AlarmRegistry {
    /// empty registry without any alarm types
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// registry that knows about the built in alarm types
    #[must_use]
    pub fn with_default_types() -> Self {
        let registry = Self::new();
        registry.register_type(Arc::new(DailyAlarmType));
        registry
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// a later registration with the same id replaces the earlier one
    pub fn register_type(&self, alarm_type: Arc<dyn AlarmType>) {
        self.state()
            .types
            .insert(alarm_type.id().to_string(), alarm_type);
    }

    #[must_use]
    pub fn alarm_type(&self, type_id: &str) -> Option<Arc<dyn AlarmType>> {
        self.state().types.get(type_id).cloned()
    }

    #[must_use]
    pub fn alarm_types(&self) -> Vec<Arc<dyn AlarmType>> {
        let mut types: Vec<_> = self.state().types.values().cloned().collect();
        types.sort_by_key(|alarm_type| alarm_type.id());
        types
    }

    /// hands out a fresh id, never one already used or restored
    ///
    /// # Errors
    /// [`AlarmError::IdsExhausted`] once every id has been handed out
    pub fn next_id(&self) -> Result<AlarmId> {
        let mut state = self.state();
        let id = AlarmId::try_from(state.next_id).map_err(|_| AlarmError::IdsExhausted)?;
        state.next_id += 1;
        Ok(id)
    }

    /// Builds a new alarm of the given type with a fresh id, it still has to be [`add`](Self::add)ed.
    ///
    /// # Errors
    /// [`AlarmError::UnknownType`] if no such type is registered, or if ids ran out
    pub fn create(&self, type_id: &str, initial_time: Option<&DateTime<Local>>) -> Result<Alarm> {
        let alarm_type = self
            .alarm_type(type_id)
            .ok_or_else(|| AlarmError::UnknownType(type_id.to_string()))?;
        Ok(alarm_type.create(self.next_id()?, initial_time))
    }

    /// inserts `alarm`, replacing any alarm with the same id
    pub fn add(&self, alarm: Alarm) {
        self.state().alarms.insert(alarm.id(), alarm.clone());
        log::debug!("added alarm {}", alarm.id());
        self.notify(RegistryEvent::Added(alarm));
    }

    pub fn remove(&self, id: AlarmId) -> Option<Alarm> {
        let removed = self.state().alarms.remove(&id)?;
        log::debug!("removed alarm {id}");
        self.notify(RegistryEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// replaces the stored alarm with `alarm`, does nothing if its id is unknown
    pub fn update(&self, alarm: Alarm) -> bool {
        {
            let mut state = self.state();
            match state.alarms.get_mut(&alarm.id()) {
                Some(stored) => *stored = alarm.clone(),
                None => return false,
            }
        }
        self.notify(RegistryEvent::Updated(alarm));
        true
    }

    /// Changes the stored alarm in place, notifying like [`update`](Self::update).
    ///
    /// Unlike `update` this can't overwrite a concurrent change with a stale copy.
    pub fn modify(&self, id: AlarmId, f: impl FnOnce(&mut Alarm)) -> bool {
        let updated = {
            let mut state = self.state();
            let Some(alarm) = state.alarms.get_mut(&id) else {
                return false;
            };
            f(alarm);
            alarm.clone()
        };
        self.notify(RegistryEvent::Updated(updated));
        true
    }

    /// sets the scheduled flag without notifying, the flag is the scheduler's own bookkeeping
    pub(crate) fn mark_scheduled(&self, id: AlarmId, scheduled: bool) {
        if let Some(alarm) = self.state().alarms.get_mut(&id) {
            alarm.set_scheduled(scheduled);
        }
    }

    /// Inserts alarms read back from storage without per alarm notifications.
    ///
    /// The id counter is moved past every restored id so fresh ids never collide.
    pub fn restore(&self, alarms: impl IntoIterator<Item = Alarm>) -> usize {
        let count = {
            let mut state = self.state();
            let mut count = 0;
            for alarm in alarms {
                state.next_id = state.next_id.max(u64::from(alarm.id()) + 1);
                state.alarms.insert(alarm.id(), alarm);
                count += 1;
            }
            count
        };
        self.notify_all(&[RegistryEvent::Mutated]);
        count
    }

    /// snapshot of every alarm, in id order
    #[must_use]
    pub fn get_all(&self) -> Vec<Alarm> {
        self.state().alarms.values().cloned().collect()
    }

    #[must_use]
    pub fn get_by_id(&self, id: AlarmId) -> Option<Alarm> {
        self.state().alarms.get(&id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().alarms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().alarms.is_empty()
    }

    /// Finds the unscheduled alarm that rings soonest after `current_time`,
    /// ignoring rings more than `max_lookahead_minutes` away.
    /// On a tie the alarm with the lowest id wins.
    #[must_use]
    pub fn get_next_ring(
        &self,
        current_time: &DateTime<Local>,
        max_lookahead_minutes: u32,
    ) -> Option<NextRing> {
        let horizon = *current_time + Duration::minutes(i64::from(max_lookahead_minutes));
        let state = self.state();
        let mut next: Option<(&Alarm, DateTime<Local>)> = None;
        for alarm in state.alarms.values().filter(|alarm| !alarm.is_scheduled()) {
            let at = alarm.following_ring_time(current_time);
            if at > horizon {
                continue;
            }
            if next.map_or(true, |(_, best)| at < best) {
                next = Some((alarm, at));
            }
        }
        next.map(|(alarm, at)| NextRing {
            alarm: alarm.clone(),
            at,
        })
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&RegistryEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = {
            let mut next = self
                .next_subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            SubscriptionId(*next)
        };
        self.listeners().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(subscription, _)| *subscription != id);
        listeners.len() != before
    }

    fn notify(&self, event: RegistryEvent) {
        self.notify_all(&[event, RegistryEvent::Mutated]);
    }

    fn notify_all(&self, events: &[RegistryEvent]) {
        // snapshot so listeners can (un)subscribe while being called
        let listeners: Vec<Listener> = self
            .listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}
