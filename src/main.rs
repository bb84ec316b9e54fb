use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{Local, NaiveTime};
use clap::{Parser, Subcommand};
use custom_alarm::{
    alarm::Properties,
    calendar::{self, Clock, SystemClock},
    config::Config,
    daily::{DailyAlarmType, DAILY_TIME, MAX_DELAY_MINUTES},
    AlarmError, AlarmId, AlarmRegistry, AlarmStore, PropertyValue, Scheduler, SchedulerService,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config file to use instead of the default one
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// directory holding the alarms, overrides the config
    #[clap(long, global = true)]
    data_dir: Option<PathBuf>,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write a default config file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// run the scheduler until killed
    Run,
    /// add an alarm
    Add {
        name: String,
        /// ring time as HH:MM
        #[clap(long, short, value_parser = parse_time)]
        time: Option<NaiveTime>,
        /// how many minutes after the ring time the alarm may still ring
        #[clap(long, short)]
        max_delay: Option<u32>,
        #[clap(long = "type", default_value = DailyAlarmType::ID)]
        alarm_type: String,
    },
    /// change an existing alarm
    Edit {
        id: AlarmId,
        #[clap(long, short)]
        name: Option<String>,
        #[clap(long, short, value_parser = parse_time)]
        time: Option<NaiveTime>,
        #[clap(long, short)]
        max_delay: Option<u32>,
    },
    Remove {
        id: AlarmId,
    },
    /// show all alarms and when they ring next
    List,
    /// show the known alarm types and their settings
    Types,
}

fn parse_time(time: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(time, "%H:%M")
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_file_logger::init_logger!("custom_alarm").expect("couldn't initialize logger");

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Init { force } => {
            if Config::init(&config_path, force)? {
                println!("wrote config to {}", config_path.display());
            } else {
                println!(
                    "config already exists at {}, use --force to overwrite it",
                    config_path.display()
                );
            }
            let data_dir = match args.data_dir {
                Some(dir) => dir,
                None => Config::load(&config_path)?.data_dir()?,
            };
            std::fs::create_dir_all(&data_dir)?;
            log::info!("alarms are kept in {}", data_dir.display());
        }
        Command::Run => {
            let (config, registry, store) = open(&config_path, args.data_dir)?;
            run(&config, registry, store)?;
        }
        Command::Add {
            name,
            time,
            max_delay,
            alarm_type,
        } => {
            let (config, registry, store) = open(&config_path, args.data_dir)?;
            let time = time.unwrap_or(config.default_time);
            let initial = calendar::same_day_at(&SystemClock.now(), time);
            let mut alarm = registry.create(&alarm_type, Some(&initial))?;
            alarm.name = name;
            let max_delay = max_delay.unwrap_or(config.default_max_delay_minutes);
            alarm.set_properties(&Properties::from([(
                MAX_DELAY_MINUTES.to_string(),
                PropertyValue::from(i64::from(max_delay)),
            )]))?;
            // a running daemon picks the record up on its next tick
            store.save_alarm(&alarm)?;
            println!("added alarm {}", alarm.id());
        }
        Command::Edit {
            id,
            name,
            time,
            max_delay,
        } => {
            let (_, registry, store) = open(&config_path, args.data_dir)?;
            let mut alarm = registry.get_by_id(id).ok_or(AlarmError::NotFound(id))?;
            if let Some(name) = name {
                alarm.name = name;
            }
            let mut properties = Properties::new();
            if let Some(time) = time {
                let at = calendar::same_day_at(&SystemClock.now(), time);
                properties.insert(DAILY_TIME.to_string(), at.timestamp_millis().into());
            }
            if let Some(max_delay) = max_delay {
                properties.insert(MAX_DELAY_MINUTES.to_string(), i64::from(max_delay).into());
            }
            alarm.set_properties(&properties)?;
            store.save_alarm(&alarm)?;
            println!("updated alarm {id}");
        }
        Command::Remove { id } => {
            let (_, registry, store) = open(&config_path, args.data_dir)?;
            registry.remove(id).ok_or(AlarmError::NotFound(id))?;
            store.remove(id)?;
            println!("removed alarm {id}");
        }
        Command::List => {
            let (config, registry, _) = open(&config_path, args.data_dir)?;
            list(&config, &registry);
        }
        Command::Types => {
            let registry = AlarmRegistry::with_default_types();
            for alarm_type in registry.alarm_types() {
                println!("{}", alarm_type.id());
                for item in alarm_type.configuration_metadata() {
                    match item.default {
                        Some(default) => println!("  {} ({}) = {default}", item.name, item.kind),
                        None => println!("  {} ({})", item.name, item.kind),
                    }
                }
            }
        }
    }
    Ok(())
}

/// loads the config and the stored alarms
fn open(
    config_path: &Path,
    data_dir: Option<PathBuf>,
) -> Result<(Config, Arc<AlarmRegistry>, AlarmStore), Box<dyn Error>> {
    let config = Config::load_or_default(config_path)?;
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => config.data_dir()?,
    };
    let store = AlarmStore::new(data_dir);
    let registry = Arc::new(AlarmRegistry::with_default_types());
    store.load_into(&registry)?;
    Ok((config, registry, store))
}

fn list(config: &Config, registry: &AlarmRegistry) {
    if registry.is_empty() {
        println!("no alarms");
        return;
    }
    let now = Local::now();
    for alarm in registry.get_all() {
        let next = alarm.following_ring_time(&now);
        let properties = alarm
            .properties()
            .into_iter()
            .filter(|(key, _)| key != DAILY_TIME)
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:>4}  {:<20} {:<6} next {}  {properties}",
            alarm.id(),
            alarm.name,
            alarm.type_id(),
            next.format(&config.time_format),
        );
    }
}

fn run(
    config: &Config,
    registry: Arc<AlarmRegistry>,
    store: AlarmStore,
) -> Result<(), Box<dyn Error>> {
    log::info!("starting with {} alarms", registry.len());
    #[cfg(feature = "sound")]
    let sink = custom_alarm::ring::SoundRing::spawn(
        config.sound_path()?,
        config.volume,
        Duration::from_secs(config.ring_seconds),
    )?;
    #[cfg(not(feature = "sound"))]
    let sink = {
        if config.sound.is_some() {
            log::warn!("built without the sound feature, alarms only ring in the log");
        }
        custom_alarm::ring::LogRing::new(config.time_format.clone())
    };
    let scheduler = Scheduler::new(registry, sink, config.lookahead_minutes);
    let service = SchedulerService::spawn(scheduler, SystemClock, Some(store))?;
    service.spawn_ticker(Duration::from_secs(config.tick_seconds.max(1)))?;
    service.join();
    Ok(())
}
