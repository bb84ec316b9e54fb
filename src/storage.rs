//! Alarm persistence, one binary record per alarm named after its id.
//!
//! Record layout, all integers big-endian:
//! type id (u16 length + utf-8), alarm id (u32), name (u16 length + utf-8),
//! then the payload of the alarm's type.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use crate::{
    alarm::{Alarm, AlarmId},
    error::Result,
    registry::AlarmRegistry,
    AlarmError,
};

fn write_string(output: &mut dyn Write, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| AlarmError::Corrupt(format!("string of {} bytes is too long", value.len())))?;
    output.write_all(&len.to_be_bytes())?;
    output.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string(input: &mut dyn Read) -> Result<String> {
    let mut len = [0; 2];
    input.read_exact(&mut len)?;
    let mut bytes = vec![0; usize::from(u16::from_be_bytes(len))];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| AlarmError::Corrupt(e.to_string()))
}

/// # Errors
/// if writing fails or a string doesn't fit its length prefix
pub fn write_alarm(output: &mut dyn Write, alarm: &Alarm) -> Result<()> {
    write_string(output, alarm.type_id())?;
    output.write_all(&alarm.id().to_be_bytes())?;
    write_string(output, &alarm.name)?;
    alarm.rule().encode(output)
}

/// Reads one record, the types known to `registry` decode the payload.
///
/// # Errors
/// on truncated or malformed records and on types the registry doesn't know
pub fn read_alarm(input: &mut dyn Read, registry: &AlarmRegistry) -> Result<Alarm> {
    let type_id = read_string(input)?;
    let alarm_type = registry
        .alarm_type(&type_id)
        .ok_or(AlarmError::UnknownType(type_id))?;
    let mut id = [0; 4];
    input.read_exact(&mut id)?;
    let name = read_string(input)?;
    let rule = alarm_type.decode(input)?;
    Ok(Alarm::new(
        AlarmId::from_be_bytes(id),
        alarm_type.id(),
        name,
        rule,
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

/// directory holding the alarm records
#[derive(Debug, Clone)]
pub struct AlarmStore {
    dir: PathBuf,
}

impl AlarmStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: AlarmId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    /// # Errors
    /// if the record can't be created or written
    pub fn save_alarm(&self, alarm: &Alarm) -> Result<()> {
        // encoded up front so a bad alarm never leaves a half written record
        let mut record = Vec::new();
        write_alarm(&mut record, alarm)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(self.record_path(alarm.id()), record)?;
        Ok(())
    }

    /// # Errors
    /// if the file can't be opened or doesn't hold a valid record
    pub fn load_alarm(&self, path: &Path, registry: &AlarmRegistry) -> Result<Alarm> {
        let mut input = BufReader::new(File::open(path)?);
        read_alarm(&mut input, registry)
    }

    /// Reads every record in the directory, skipping the ones that can't be read.
    /// A missing directory holds no alarms.
    ///
    /// # Errors
    /// only if the directory exists but can't be listed
    pub fn load(&self, registry: &AlarmRegistry) -> Result<Vec<Alarm>> {
        if !self.dir.exists() {
            log::debug!("no alarm directory at {}", self.dir.display());
            return Ok(Vec::new());
        }
        let mut alarms = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log::error!("couldn't read entry in {}: {e}", self.dir.display());
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            match self.load_alarm(&path, registry) {
                Ok(alarm) => alarms.push(alarm),
                Err(e) => log::error!("skipping alarm record {}: {e}", path.display()),
            }
        }
        alarms.sort_by_key(Alarm::id);
        Ok(alarms)
    }

    /// loads every readable record into `registry`, returning how many were restored
    ///
    /// # Errors
    /// see [`load`](Self::load)
    pub fn load_into(&self, registry: &AlarmRegistry) -> Result<usize> {
        let alarms = self.load(registry)?;
        let count = registry.restore(alarms);
        log::info!("loaded {count} alarms from {}", self.dir.display());
        Ok(count)
    }

    /// Writes a record for each alarm, a failing alarm doesn't stop the others.
    ///
    /// # Errors
    /// if the directory itself can't be created
    pub fn save(&self, alarms: &[Alarm]) -> Result<SaveReport> {
        fs::create_dir_all(&self.dir)?;
        let mut report = SaveReport::default();
        for alarm in alarms {
            match self.save_alarm(alarm) {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    log::error!("couldn't save alarm {}: {e}", alarm.id());
                    report.failed += 1;
                }
            }
        }
        log::debug!("saved {} alarms, {} failed", report.saved, report.failed);
        Ok(report)
    }

    /// # Errors
    /// see [`save`](Self::save)
    pub fn save_from(&self, registry: &AlarmRegistry) -> Result<SaveReport> {
        self.save(&registry.get_all())
    }

    /// Deletes the record of a removed alarm, returns false if there was none.
    ///
    /// # Errors
    /// if the record exists but can't be deleted
    pub fn remove(&self, id: AlarmId) -> Result<bool> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// An [`AlarmStore`] that other processes write to as well.
///
/// Remembers what each record held when last read or written, so an alarm
/// changed on disk by someone else can be told apart from one changed in
/// memory. Only the side that changed since then is carried over.
#[derive(Debug)]
pub struct SharedStore {
    store: AlarmStore,
    on_disk: BTreeMap<AlarmId, Alarm>,
}

impl SharedStore {
    /// Reads the current records as the starting point. An unreadable
    /// directory starts out empty, the next sync picks the records up.
    pub fn open(store: AlarmStore, registry: &AlarmRegistry) -> Self {
        let on_disk = match store.load(registry) {
            Ok(alarms) => alarms.into_iter().map(|alarm| (alarm.id(), alarm)).collect(),
            Err(e) => {
                log::error!("couldn't read alarms from {}: {e}", store.dir().display());
                BTreeMap::new()
            }
        };
        Self { store, on_disk }
    }

    #[must_use]
    pub const fn store(&self) -> &AlarmStore {
        &self.store
    }

    /// Writes `alarm` unless its record already holds the same thing, or
    /// another process deleted the record since it was last seen. The next
    /// [`sync_into`](Self::sync_into) removes such an alarm. Returns whether
    /// anything was written.
    ///
    /// # Errors
    /// if the record can't be written
    pub fn save(&mut self, alarm: &Alarm) -> Result<bool> {
        if let Some(known) = self.on_disk.get(&alarm.id()) {
            if same_record(known, alarm) || !self.store.record_path(alarm.id()).exists() {
                return Ok(false);
            }
        }
        self.store.save_alarm(alarm)?;
        self.on_disk.insert(alarm.id(), alarm.clone());
        Ok(true)
    }

    /// # Errors
    /// see [`AlarmStore::remove`]
    pub fn remove(&mut self, id: AlarmId) -> Result<bool> {
        self.on_disk.remove(&id);
        self.store.remove(id)
    }

    /// Carries changes other processes made to the directory into `registry`.
    ///
    /// Records that changed since last seen are restored, alarms whose record
    /// was deleted are removed. Alarms only changed in memory are left alone,
    /// as are alarms whose record exists but can't be read. Returns how many
    /// alarms changed.
    ///
    /// # Errors
    /// see [`AlarmStore::load`]
    pub fn sync_into(&mut self, registry: &AlarmRegistry) -> Result<usize> {
        let stored = self.store.load(registry)?;
        let mut changed = Vec::new();
        for alarm in stored {
            let unchanged = self
                .on_disk
                .get(&alarm.id())
                .is_some_and(|known| same_record(known, &alarm));
            if !unchanged {
                self.on_disk.insert(alarm.id(), alarm.clone());
                changed.push(alarm);
            }
        }
        let gone: Vec<AlarmId> = self
            .on_disk
            .keys()
            .copied()
            .filter(|id| !self.store.record_path(*id).exists())
            .collect();
        let mut count = 0;
        for id in gone {
            self.on_disk.remove(&id);
            if registry.remove(id).is_some() {
                count += 1;
            }
        }
        if !changed.is_empty() {
            count += registry.restore(changed);
        }
        if count > 0 {
            log::info!("picked up {count} changed alarms from {}", self.store.dir().display());
        }
        Ok(count)
    }
}

fn same_record(a: &Alarm, b: &Alarm) -> bool {
    a.type_id() == b.type_id() && a.name == b.name && a.rule() == b.rule()
}

#[cfg(test)]
mod tests {
    use chrono::{Local, NaiveTime};

    use super::*;
    use crate::{alarm::Rule, calendar, daily::DailyRule};

    fn alarm(id: AlarmId, name: &str, hour: u32, delay: u32) -> Alarm {
        Alarm::new(
            id,
            "daily",
            name,
            Rule::Daily(DailyRule::new(
                NaiveTime::from_hms_opt(hour, 30, 0).unwrap(),
                delay,
            )),
        )
    }

    #[test]
    fn record_reads_back() {
        let registry = AlarmRegistry::with_default_types();
        let original = alarm(42, "wake up ☀", 6, 15);
        let mut record = Vec::new();
        write_alarm(&mut record, &original).unwrap();

        let restored = read_alarm(&mut record.as_slice(), &registry).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.properties(), original.properties());
    }

    #[test]
    fn record_layout() {
        let mut record = Vec::new();
        write_alarm(&mut record, &alarm(7, "ab", 6, 2)).unwrap();
        assert_eq!(&record[..7], &[0, 5, b'd', b'a', b'i', b'l', b'y']);
        assert_eq!(&record[7..11], &[0, 0, 0, 7]);
        assert_eq!(&record[11..15], &[0, 2, b'a', b'b']);
        // 8 byte timestamp then the delay
        assert_eq!(record.len(), 15 + 12);
        assert_eq!(&record[23..], &[0, 0, 0, 2]);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = AlarmRegistry::new();
        let mut record = Vec::new();
        write_alarm(&mut record, &alarm(1, "a", 6, 1)).unwrap();
        assert!(matches!(
            read_alarm(&mut record.as_slice(), &registry),
            Err(AlarmError::UnknownType(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path().join("alarms"));
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(2, "first", 6, 1));
        registry.add(alarm(5, "second", 7, 3));

        let report = store.save_from(&registry).unwrap();
        assert_eq!(report, SaveReport { saved: 2, failed: 0 });
        assert!(store.dir().join("2").is_file());
        assert!(store.dir().join("5").is_file());

        let restored = AlarmRegistry::with_default_types();
        assert_eq!(store.load_into(&restored).unwrap(), 2);
        assert_eq!(restored.get_all(), registry.get_all());
        assert_eq!(restored.next_id().unwrap(), 6);
    }

    #[test]
    fn bad_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        store.save(&[alarm(1, "good", 6, 1)]).unwrap();

        // truncated record
        let mut record = Vec::new();
        write_alarm(&mut record, &alarm(2, "cut short", 6, 1)).unwrap();
        fs::write(dir.path().join("2"), &record[..record.len() - 3]).unwrap();
        // unknown type
        let mut record = Vec::new();
        write_alarm(
            &mut record,
            &Alarm::new(3, "weekly", "nope", alarm(3, "", 6, 1).rule().clone()),
        )
        .unwrap();
        fs::write(dir.path().join("3"), record).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let alarms = store.load(&registry).unwrap();
        assert_eq!(alarms, vec![alarm(1, "good", 6, 1)]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path().join("not there"));
        let registry = AlarmRegistry::with_default_types();
        assert_eq!(store.load_into(&registry).unwrap(), 0);
        assert_eq!(registry.next_id().unwrap(), 0);
    }

    #[test]
    fn removed_alarms_do_not_come_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(1, "kept", 6, 1));
        registry.add(alarm(2, "removed", 6, 1));
        store.save_from(&registry).unwrap();

        registry.remove(2);
        assert!(store.remove(2).unwrap());
        assert!(!store.remove(2).unwrap());
        store.save_from(&registry).unwrap();
        assert!(!dir.path().join("2").exists());

        let restored = AlarmRegistry::with_default_types();
        store.load_into(&restored).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.get_by_id(1).is_some());
    }

    #[test]
    fn saving_keeps_records_of_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        store.save(&[alarm(4, "from elsewhere", 6, 1)]).unwrap();

        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(1, "ours", 6, 1));
        store.save_from(&registry).unwrap();
        assert!(dir.path().join("4").is_file());
    }

    #[test]
    fn sync_picks_up_outside_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(1, "unchanged", 6, 1));
        registry.add(alarm(2, "edited", 6, 1));
        registry.add(alarm(3, "deleted", 6, 1));
        store.save_from(&registry).unwrap();
        let mut shared = SharedStore::open(store.clone(), &registry);
        assert_eq!(shared.sync_into(&registry).unwrap(), 0);

        // another process edits 2, deletes 3 and adds 7
        store.save(&[alarm(2, "edited", 9, 4), alarm(7, "added", 8, 1)]).unwrap();
        store.remove(3).unwrap();

        assert_eq!(shared.sync_into(&registry).unwrap(), 3);
        assert_eq!(
            registry.get_all(),
            vec![
                alarm(1, "unchanged", 6, 1),
                alarm(2, "edited", 9, 4),
                alarm(7, "added", 8, 1),
            ]
        );
        assert_eq!(registry.next_id().unwrap(), 8);
        assert_eq!(shared.sync_into(&registry).unwrap(), 0);
    }

    #[test]
    fn sync_keeps_alarms_with_unreadable_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(1, "half written", 6, 1));
        store.save_from(&registry).unwrap();
        let mut shared = SharedStore::open(store, &registry);
        fs::write(dir.path().join("1"), [0, 5, b'd']).unwrap();

        assert_eq!(shared.sync_into(&registry).unwrap(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unchanged_alarm_does_not_overwrite_outside_edit() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(0, "wake up", 7, 1));
        store.save_from(&registry).unwrap();
        let mut shared = SharedStore::open(store.clone(), &registry);

        // edited elsewhere, then our stale copy is saved after ringing
        store.save(&[alarm(0, "wake up", 9, 1)]).unwrap();
        assert!(!shared.save(&registry.get_by_id(0).unwrap()).unwrap());
        assert_eq!(store.load(&registry).unwrap(), vec![alarm(0, "wake up", 9, 1)]);

        shared.sync_into(&registry).unwrap();
        assert_eq!(registry.get_by_id(0).unwrap(), alarm(0, "wake up", 9, 1));
    }

    #[test]
    fn outside_removal_is_not_undone() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(0, "removed elsewhere", 7, 1));
        store.save_from(&registry).unwrap();
        let mut shared = SharedStore::open(store.clone(), &registry);

        store.remove(0).unwrap();
        assert!(!shared.save(&registry.get_by_id(0).unwrap()).unwrap());
        // nor by an edit made before the removal was seen
        assert!(!shared.save(&alarm(0, "removed elsewhere", 9, 1)).unwrap());
        assert!(!dir.path().join("0").exists());
        assert_eq!(shared.sync_into(&registry).unwrap(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn local_edit_survives_sync() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(0, "wake up", 7, 1));
        store.save_from(&registry).unwrap();
        let mut shared = SharedStore::open(store.clone(), &registry);

        // edited in memory but not saved yet
        registry.update(alarm(0, "wake up", 8, 1));
        assert_eq!(shared.sync_into(&registry).unwrap(), 0);
        assert_eq!(registry.get_by_id(0).unwrap(), alarm(0, "wake up", 8, 1));
        assert!(shared.save(&registry.get_by_id(0).unwrap()).unwrap());
        assert_eq!(store.load(&registry).unwrap(), vec![alarm(0, "wake up", 8, 1)]);
    }

    #[test]
    fn overlong_name_fails_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path().join("alarms"));
        let long = alarm(1, &"z".repeat(usize::from(u16::MAX) + 1), 6, 1);
        assert!(matches!(store.save_alarm(&long), Err(AlarmError::Corrupt(_))));
        assert!(!store.dir().join("1").exists());

        let report = store.save(&[alarm(2, "fine", 6, 1), long]).unwrap();
        assert_eq!(report, SaveReport { saved: 1, failed: 1 });
    }

    #[test]
    fn restored_alarm_still_rings() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path());
        let registry = AlarmRegistry::with_default_types();
        registry.add(alarm(1, "kept", 6, 5));
        store.save_from(&registry).unwrap();

        let restored = AlarmRegistry::with_default_types();
        store.load_into(&restored).unwrap();
        let ring = calendar::from_components(&Local, 2023, 6, 15, 6, 32).unwrap();
        assert!(restored.get_by_id(1).unwrap().should_ring(&ring));
    }
}
