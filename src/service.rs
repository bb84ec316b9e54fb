//! Runs a [`Scheduler`] on its own thread.
//!
//! Everything that arms, cancels or fires a timer happens on that one thread,
//! fed by a queue of events: registry changes, minute ticks and shutdown.
//! The armed timer is simply the deadline the thread waits on.

use std::{
    collections::BTreeSet,
    io,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    alarm::AlarmId,
    calendar::Clock,
    registry::{AlarmRegistry, RegistryEvent, SubscriptionId},
    scheduler::{RingSink, Scheduler},
    storage::{AlarmStore, SharedStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// periodic wake up, re-arms in case a timer was missed
    Tick,
    /// the registry changed
    Mutated,
    /// an alarm was added or updated, its record is rewritten
    Changed(AlarmId),
    /// an alarm was removed, its record goes too
    Removed(AlarmId),
    Shutdown,
}

#[derive(Debug)]
pub struct SchedulerService {
    sender: Sender<SchedulerEvent>,
    registry: Arc<AlarmRegistry>,
    subscription: Option<SubscriptionId>,
    worker: Option<JoinHandle<()>>,
}

impl SchedulerService {
    /// Starts the scheduler thread. When a `store` is given each alarm is saved
    /// to it as it changes, and on every tick the registry picks up what other
    /// processes changed in the store.
    ///
    /// # Errors
    /// if the thread can't be spawned
    pub fn spawn<R, C>(
        scheduler: Scheduler<R>,
        clock: C,
        store: Option<AlarmStore>,
    ) -> io::Result<Self>
    where
        R: RingSink + 'static,
        C: Clock + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let registry = Arc::clone(scheduler.registry());
        let store = store.map(|store| SharedStore::open(store, &registry));
        let forward = sender.clone();
        let subscription = registry.subscribe(move |event| {
            let event = match event {
                RegistryEvent::Mutated => SchedulerEvent::Mutated,
                RegistryEvent::Added(alarm) | RegistryEvent::Updated(alarm) => {
                    SchedulerEvent::Changed(alarm.id())
                }
                RegistryEvent::Removed(alarm) => SchedulerEvent::Removed(alarm.id()),
            };
            // the worker is gone once this fails, nothing left to re-arm
            let _ = forward.send(event);
        });
        let worker = thread::Builder::new()
            .name("alarm-scheduler".to_string())
            .spawn(move || run(scheduler, &clock, store, &receiver));
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                registry.unsubscribe(subscription);
                return Err(e);
            }
        };
        Ok(Self {
            sender,
            registry,
            subscription: Some(subscription),
            worker: Some(worker),
        })
    }

    pub fn tick(&self) {
        if self.sender.send(SchedulerEvent::Tick).is_err() {
            log::warn!("tick after the scheduler stopped");
        }
    }

    /// Sends a tick every `period` until the service stops.
    ///
    /// # Errors
    /// if the thread can't be spawned
    pub fn spawn_ticker(&self, period: Duration) -> io::Result<JoinHandle<()>> {
        let sender = self.sender.clone();
        thread::Builder::new()
            .name("alarm-ticker".to_string())
            .spawn(move || loop {
                thread::sleep(period);
                if sender.send(SchedulerEvent::Tick).is_err() {
                    break;
                }
            })
    }

    /// blocks until the scheduler thread exits
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("scheduler thread panicked");
            }
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.registry.unsubscribe(subscription);
        }
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(SchedulerEvent::Shutdown);
            if worker.join().is_err() {
                log::error!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// everything queued up when the worker gets to it, handled in one go
#[derive(Debug, Default)]
struct Batch {
    changed: BTreeSet<AlarmId>,
    removed: BTreeSet<AlarmId>,
    tick: bool,
    shutdown: bool,
}

impl Batch {
    fn push(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Tick => self.tick = true,
            SchedulerEvent::Mutated => {}
            SchedulerEvent::Changed(id) => {
                self.changed.insert(id);
            }
            SchedulerEvent::Removed(id) => {
                self.changed.remove(&id);
                self.removed.insert(id);
            }
            SchedulerEvent::Shutdown => self.shutdown = true,
        }
    }

    /// writes what changed in memory, then picks up what changed on disk
    fn persist(&self, store: &mut SharedStore, registry: &AlarmRegistry) {
        for &id in &self.removed {
            if let Err(e) = store.remove(id) {
                log::error!("couldn't delete record of alarm {id}: {e}");
            }
        }
        for &id in &self.changed {
            let Some(alarm) = registry.get_by_id(id) else {
                continue;
            };
            if let Err(e) = store.save(&alarm) {
                log::error!("couldn't save alarm {id}: {e}");
            }
        }
        if self.tick {
            // changes arrive back here as registry events
            if let Err(e) = store.sync_into(registry) {
                log::error!("couldn't sync alarms from {}: {e}", store.store().dir().display());
            }
        }
    }
}

fn run<R: RingSink, C: Clock>(
    mut scheduler: Scheduler<R>,
    clock: &C,
    mut store: Option<SharedStore>,
    receiver: &Receiver<SchedulerEvent>,
) {
    log::info!("scheduler started");
    scheduler.arm(&clock.now());
    loop {
        let now = clock.now();
        let event = match scheduler.armed().copied() {
            Some(timer) if timer.at <= now => {
                scheduler.fire(&now);
                continue;
            }
            Some(timer) => {
                let wait = (timer.at - now).to_std().unwrap_or_default();
                match receiver.recv_timeout(wait) {
                    Ok(event) => event,
                    // woken up, the top of the loop decides if it is time yet
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        // don't let a re-arm swallow a timer that came due while waiting
        let now = clock.now();
        if scheduler.armed().is_some_and(|timer| timer.at <= now) {
            scheduler.fire(&now);
        }

        // one re-arm covers every event already queued
        let mut batch = Batch::default();
        batch.push(event);
        while let Ok(queued) = receiver.try_recv() {
            batch.push(queued);
        }
        if let Some(store) = &mut store {
            batch.persist(store, scheduler.registry());
        }
        if batch.shutdown {
            break;
        }
        scheduler.arm(&now);
    }
    scheduler.cancel_all();
    log::info!("scheduler stopped");
}
