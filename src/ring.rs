//! Ring sinks: what happens when an alarm goes off.

use crate::{alarm::Alarm, scheduler::RingSink};

#[cfg(feature = "sound")]
pub use sound::SoundRing;

/// prints and logs the ring, the default when no sound output is built in
#[derive(Debug, Clone)]
pub struct LogRing {
    time_format: String,
}

impl LogRing {
    #[must_use]
    pub fn new(time_format: impl Into<String>) -> Self {
        Self {
            time_format: time_format.into(),
        }
    }
}

impl RingSink for LogRing {
    fn ring(&self, alarm: &Alarm) {
        let now = chrono::Local::now().format(&self.time_format);
        log::info!("alarm {} ({}) ringing at {now}", alarm.id(), alarm.name);
        println!("⏰ {} [{}] {now}", alarm.name, alarm.id());
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::{alarm::Rule, daily::DailyRule};

    #[test]
    fn log_ring_is_a_sink() {
        fn boxed(sink: impl RingSink + 'static) -> Box<dyn RingSink> {
            Box::new(sink)
        }
        let sink = boxed(LogRing::new("%H:%M"));
        let rule = DailyRule::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap(), 1);
        sink.ring(&Alarm::new(3, "daily", "wake up", Rule::Daily(rule)));
    }
}

#[cfg(feature = "sound")]
mod sound {
    use std::{
        error::Error,
        fs::File,
        io::{self, BufReader},
        path::PathBuf,
        sync::mpsc::{self, Receiver, Sender},
        thread,
        time::Duration,
    };

    use rodio::{source::SineWave, Decoder, OutputStream, OutputStreamHandle, Sink, Source};

    use crate::{
        alarm::{Alarm, AlarmId},
        scheduler::RingSink,
    };

    /// sent to the audio thread for every ring
    #[derive(Debug, Clone)]
    struct RingRequest {
        alarm_id: AlarmId,
        sound: Option<PathBuf>,
        /// 0 to 100
        volume: f32,
        duration: Duration,
    }

    /// Plays a sound for each ring on a dedicated audio thread so ringing never
    /// blocks the scheduler. Without a sound file a plain beep is played.
    #[derive(Debug)]
    pub struct SoundRing {
        sender: Sender<RingRequest>,
        sound: Option<PathBuf>,
        volume: f32,
        duration: Duration,
    }

    impl SoundRing {
        /// # Errors
        /// if the audio thread can't be spawned
        pub fn spawn(sound: Option<PathBuf>, volume: f32, duration: Duration) -> io::Result<Self> {
            let (sender, receiver) = mpsc::channel();
            thread::Builder::new()
                .name("alarm-sound".to_string())
                .spawn(move || play_rings(&receiver))?;
            Ok(Self {
                sender,
                sound,
                volume: volume.clamp(0.0, 100.0),
                duration,
            })
        }
    }

    impl RingSink for SoundRing {
        fn ring(&self, alarm: &Alarm) {
            let request = RingRequest {
                alarm_id: alarm.id(),
                sound: self.sound.clone(),
                volume: self.volume,
                duration: self.duration,
            };
            if self.sender.send(request).is_err() {
                log::error!("no audio output, alarm {} rings silently", alarm.id());
            }
        }
    }

    // the output stream can't leave the thread that opened it
    fn play_rings(receiver: &Receiver<RingRequest>) {
        let (_stream, handle) = match OutputStream::try_default() {
            Ok(output) => output,
            Err(e) => {
                log::error!("couldn't open audio output: {e}");
                return;
            }
        };
        for request in receiver {
            log::debug!("playing ring for alarm {}", request.alarm_id);
            if let Err(e) = play(&handle, &request) {
                log::error!("couldn't play ring for alarm {}: {e}", request.alarm_id);
            }
        }
    }

    fn play(handle: &OutputStreamHandle, request: &RingRequest) -> Result<(), Box<dyn Error>> {
        let sink = Sink::try_new(handle)?;
        sink.set_volume(request.volume / 100.0);
        match &request.sound {
            Some(path) => {
                let sound = Decoder::new(BufReader::new(File::open(path)?))?;
                sink.append(sound.repeat_infinite().take_duration(request.duration));
            }
            None => sink.append(SineWave::new(880.0).take_duration(request.duration)),
        }
        // keeps playing after the sink handle is dropped
        sink.detach();
        Ok(())
    }
}
