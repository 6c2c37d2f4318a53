//! Selective logging of telemetry samples to CSV.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use chrono::Local;
use tracing::{debug, info};
use crate::constants::*;
use crate::data::DeviceState;

/// What gets recorded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordMode {
    /// Nothing. Closes the current session.
    Off = 0,
    /// Samples taken right after an instruction touched the module.
    Instructions = 1,
    /// Instruction samples, plus a periodic sample at most every `interval` seconds.
    Periodic = 2,
    /// Samples which differ meaningfully from the last recorded one.
    Changes = 3
}

impl FromStr for RecordMode {
    type Err = &'static str;
    fn from_str (s: &str) -> ::std::result::Result<Self, Self::Err> {
        Ok (match s {
            "0" => RecordMode::Off,
            "1" => RecordMode::Instructions,
            "2" => RecordMode::Periodic,
            "3" => RecordMode::Changes,
            _   => return Err("expected 0, 1, 2 or 3")
        })
    }
}

/// Why a sample is offered to the recorder.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// An instruction just ran.
    Instruction,
    /// The end of a poll cycle.
    Periodic
}

/// A snapshot of the module state at a given run time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    /// Seconds since the program started.
    pub time: f64,
    pub state: DeviceState,
    /// Number of `CALL`s executed so far.
    pub calls: u32
}

impl Sample {
    pub fn new (time: f64, state: &DeviceState, calls: u32) -> Sample {
        Sample { time, state: *state, calls }
    }

    /// Whether this sample is worth recording after `last`: the output moved by at least
    /// [`DELTA_UOUT`]/[`DELTA_IOUT`], or any configuration value changed.
    ///
    /// [`DELTA_UOUT`]: ../constants/constant.DELTA_UOUT.html
    /// [`DELTA_IOUT`]: ../constants/constant.DELTA_IOUT.html
    pub fn differs_from (&self, last: &Sample) -> bool {
        let (now, old) = (&self.state, &last.state);
        (now.u_out - old.u_out).abs() >= DELTA_UOUT
            || (now.i_out - old.i_out).abs() >= DELTA_IOUT
            || now.u_set != old.u_set
            || now.i_set != old.i_set
            || now.ovp != old.ovp
            || now.ocp != old.ocp
            || now.opp != old.opp
            || now.power_on != old.power_on
            || now.protection != old.protection
            || now.cv_cc != old.cv_cc
            || self.calls != last.calls
    }

    fn write_row<W: Write> (&self, out: &mut W, result: &str) -> io::Result<()> {
        let s = &self.state;
        writeln!(out, "{:5.3},{:04.2},{:04.3},{:04.2},{:04.3},{:05.2},{:04.2},{:2},{:2},{:5},{:3}",
            self.time, s.u_set, s.i_set, s.u_out, s.i_out, s.p_out, s.u_in,
            s.protection, s.cv_cc, self.calls, result)
    }
}

struct Session {
    name: String,
    path: PathBuf,
    out: BufWriter<File>
}

impl Session {
    /// Creates `REC_<timestamp>.csv`, adding a suffix if a file with that name already exists.
    fn open (dir: &Path) -> io::Result<Session> {
        let stamp = Local::now().format (STAMP_FORMAT).to_string();
        let mut name = stamp.clone();
        let mut attempt = 0;
        loop {
            let path = dir.join (format!("REC_{}.csv", name));
            match OpenOptions::new().write (true).create_new (true).open (&path) {
                Ok(file) => {
                    let mut out = BufWriter::new (file);
                    writeln!(out, "{}", CSV_HEADER)?;
                    out.flush()?;
                    info!("recording to {}", path.display());
                    return Ok(Session { name, path, out });
                },
                Err(ref error) if error.kind() == io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    name = format!("{}_{}", stamp, attempt);
                },
                Err(error) => return Err(error)
            }
        }
    }
}

/// Decides which samples become rows of the current recording, and owns that recording.
///
/// A session (one CSV file) is opened lazily by the first sample offered while recording is on,
/// and closed when recording is switched off or [`close`] is called.
///
/// [`close`]: #method.close
pub struct Recorder {
    dir: PathBuf,
    mode: RecordMode,
    interval: f64,
    session: Option<Session>,
    last_write: f64,
    // change detection, mode 3 only
    last_written: Sample,
    current: Option<Sample>,
    previous: Option<Sample>,
    skipped: u32
}

impl Recorder {
    /// A recorder writing its files into `dir`. Recording starts switched off.
    pub fn new<P: Into<PathBuf>> (dir: P) -> Recorder {
        Recorder {
            dir: dir.into(),
            mode: RecordMode::Off,
            interval: 0.0,
            session: None,
            last_write: 0.0,
            last_written: Sample::default(),
            current: None,
            previous: None,
            skipped: 0
        }
    }

    pub fn dir (&self) -> &Path { &self.dir }
    pub fn mode (&self) -> RecordMode { self.mode }

    /// Name of the active session, derived from the time it was opened.
    pub fn session_name (&self) -> Option<&str> {
        self.session.as_ref().map (|session| session.name.as_str())
    }

    pub fn session_path (&self) -> Option<&Path> {
        self.session.as_ref().map (|session| session.path.as_path())
    }

    /// Changes the recording mode. Switching to [`RecordMode::Off`] ends the session.
    ///
    /// [`RecordMode::Off`]: ./enum.RecordMode.html#variant.Off
    pub fn configure (&mut self, mode: RecordMode, interval: f64) -> io::Result<()> {
        self.mode = mode;
        self.interval = interval;
        if mode == RecordMode::Off {
            self.close()?;
        }
        Ok(())
    }

    /// Offers a sample. `result` is the textual result of a `CALL`, or empty.
    pub fn record (&mut self, sample: &Sample, trigger: Trigger, result: &str) -> io::Result<()> {
        if self.mode == RecordMode::Off {
            return self.close();
        }
        if self.session.is_none() {
            self.session = Some(Session::open (&self.dir)?);
            self.last_write = 0.0;
            self.last_written = Sample::default();
            self.current = None;
            self.previous = None;
            self.skipped = 0;
        }

        match self.mode {
            RecordMode::Instructions => {
                if trigger == Trigger::Instruction {
                    self.write (sample, result)?;
                }
            },
            RecordMode::Periodic => {
                if trigger == Trigger::Instruction || sample.time - self.last_write >= self.interval {
                    self.write (sample, result)?;
                }
            },
            RecordMode::Changes if trigger == Trigger::Periodic || !result.is_empty() => {
                self.previous = self.current.replace (*sample);
                if sample.differs_from (&self.last_written) || !result.is_empty() {
                    self.last_written = *sample;
                    if self.skipped > 0 {
                        // re-emit the last skipped sample so a plot doesn't draw a slope
                        // across the gap; it is a duplicate if a call was written at that time
                        if let Some(previous) = self.previous {
                            if previous.time != self.last_write {
                                self.write (&previous, "")?;
                            }
                        }
                    }
                    self.write (sample, result)?;
                    self.skipped = 0;
                } else {
                    self.skipped += 1;
                }
            },
            _ => {}
        }
        Ok(())
    }

    fn write (&mut self, sample: &Sample, result: &str) -> io::Result<()> {
        if let Some(ref mut session) = self.session {
            sample.write_row (&mut session.out, result)?;
            session.out.flush()?;
            self.last_write = sample.time;
        }
        Ok(())
    }

    /// Ends the active session, if any.
    pub fn close (&mut self) -> io::Result<()> {
        if let Some(mut session) = self.session.take() {
            session.out.flush()?;
            debug!("closed recording {}", session.name);
        }
        Ok(())
    }
}
