//! Execution engine: runs a compiled [`Program`] against a module, one operation per poll cycle.
//!
//! Every cycle reads the telemetry bundle, stops the program if the module reports a protection
//! trip, runs the current operation and finally offers a periodic sample to the recorder. There
//! is no clock of its own: the cycle rate is whatever the serial round trips allow.
//!
//! `WAIT` is the only operation which spans cycles. It never blocks; it just holds the program
//! counter, so the telemetry and the protection check stay live while waiting.
//!
//! [`Program`]: ../script/struct.Program.html

use std::time::Instant;
use error_chain::ChainedError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use crate::call::{self, Shell, Substitutions};
use crate::data::DeviceState;
use crate::device::Device;
use crate::errors::*;
use crate::recorder::{Recorder, Sample, Trigger};
use crate::script::{Condition, Op, Operation, Program, Quantity, Target};

/// Engine state which outlives a single operation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Context {
    /// Set by `IF`, consumed by the next `WAIT` or `GOTO`.
    pub pending: Option<Condition>,
    /// Run time at which the current `WAIT` started.
    pub wait_anchor: Option<f64>,
    /// Number of `CALL`s executed so far.
    pub calls: u32
}

/// Result of a single cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    Running,
    Finished
}

/// How a run ended, when it ended without an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The program counter went past the last operation.
    Completed,
    /// The run was interrupted from the outside.
    Interrupted
}

/// Evaluates a condition against the last confirmed telemetry.
pub fn check (condition: &Condition, state: &DeviceState) -> bool {
    let value = match condition.quantity {
        Quantity::Current => state.i_out,
        Quantity::Power   => state.p_out,
        Quantity::Voltage => state.u_out
    };
    condition.comparison.holds (value, condition.value)
}

pub struct Engine<T, S> {
    program: Program,
    device: Device<T>,
    recorder: Recorder,
    shell: S,
    context: Context,
    pc: usize
}

impl<T, S> Engine<T, S>
    where T: AsyncRead + AsyncWrite + Unpin,
          S: Shell
{
    pub fn new (program: Program, device: Device<T>, recorder: Recorder, shell: S) -> Self {
        Engine { program, device, recorder, shell, context: Context::default(), pc: 0 }
    }

    pub fn pc (&self) -> usize { self.pc }
    pub fn context (&self) -> &Context { &self.context }
    pub fn device (&self) -> &Device<T> { &self.device }
    pub fn recorder (&self) -> &Recorder { &self.recorder }

    /// Runs the program to the end.
    ///
    /// `interrupt` is checked between cycles. However the run ends, the recording is closed;
    /// after an interrupt or a protection trip the output is switched off as well.
    pub async fn run (&mut self, mut interrupt: oneshot::Receiver<()>) -> Result<Outcome> {
        let start = Instant::now();
        let result = loop {
            if interrupt.try_recv().is_ok() {
                info!("interrupted");
                break Ok(Outcome::Interrupted);
            }
            match self.step (start.elapsed().as_secs_f64()).await {
                Ok(Flow::Running) => continue,
                Ok(Flow::Finished) => break Ok(Outcome::Completed),
                Err(error) => break Err(error)
            }
        };
        let power_off = match result {
            Ok(Outcome::Completed) => false,
            _ => true
        };
        self.shutdown (power_off).await;
        result
    }

    /// Closes the recording and, if asked to, makes a single attempt at switching the output
    /// off.
    pub async fn shutdown (&mut self, power_off: bool) {
        if let Err(error) = self.recorder.close() {
            error!("can't close recording: {}", error);
        }
        if power_off && !self.device.set_power (false).await {
            error!("could not switch the output off");
        }
    }

    /// Runs one poll cycle at run time `elapsed` (seconds).
    pub async fn step (&mut self, elapsed: f64) -> Result<Flow> {
        if self.pc >= self.program.len() {
            return Ok(Flow::Finished);
        }
        if let Err(error) = self.device.read_telemetry().await {
            warn!("{}", error.chain_err (|| "DPS read error").display_chain());
            return Ok(Flow::Running);
        }
        let protection = self.device.state().protection;
        if protection != 0 {
            bail!(ErrorKind::Protection (protection));
        }

        let operation = match self.program.get (self.pc) {
            Some(operation) => operation.clone(),
            None => return Ok(Flow::Finished)
        };
        self.pc = self.execute (&operation, elapsed).await?;
        self.offer (elapsed, Trigger::Periodic, "")?;

        Ok(if self.pc >= self.program.len() { Flow::Finished } else { Flow::Running })
    }

    fn offer (&mut self, elapsed: f64, trigger: Trigger, result: &str) -> Result<()> {
        let sample = Sample::new (elapsed, self.device.state(), self.context.calls);
        self.recorder.record (&sample, trigger, result)
            .chain_err (|| "can't write recording")
    }

    /// Runs a single operation and returns the next program counter.
    async fn execute (&mut self, operation: &Operation, elapsed: f64) -> Result<usize> {
        let pc = self.pc;
        let line = operation.line;
        let next = match operation.op {
            Op::Set (target, value) => {
                let confirmed = self.set (target, value).await;
                info!("{:02}: set {} {} {}", line, target, value, confirmed_note (confirmed));
                self.offer (elapsed, Trigger::Instruction, "")?;
                pc + 1
            },
            Op::Inc (target, delta) => {
                let state = self.device.state();
                let current = match target {
                    Target::Voltage => state.u_set,
                    Target::Current => state.i_set
                };
                let value = (current + delta).max (0.0);
                let confirmed = self.set (target, value).await;
                info!("{:02}: inc {} {} new: {} {}", line, target, delta, value,
                    confirmed_note (confirmed));
                self.offer (elapsed, Trigger::Instruction, "")?;
                pc + 1
            },
            Op::Max (quantity, value) => {
                let confirmed = match quantity {
                    Quantity::Voltage => self.device.set_ovp (value).await,
                    Quantity::Current => self.device.set_ocp (value).await,
                    Quantity::Power   => self.device.set_opp (value).await
                };
                info!("{:02}: max {} {} {}", line, quantity, value, confirmed_note (confirmed));
                self.offer (elapsed, Trigger::Instruction, "")?;
                pc + 1
            },
            Op::Output (on) => {
                let confirmed = self.device.set_power (on).await;
                info!("{:02}: power {} {}", line, if on { "ON" } else { "OFF" },
                    confirmed_note (confirmed));
                self.offer (elapsed, Trigger::Instruction, "")?;
                pc + 1
            },
            Op::If (condition) => {
                info!("{:02}: if {}", line, condition);
                self.context.pending = Some(condition);
                pc + 1
            },
            Op::Wait (seconds) => self.wait (line, seconds, elapsed),
            Op::Goto { ref label, target } => {
                match self.context.pending.take() {
                    None => {
                        info!("{:02}: goto {} unconditional", line, label);
                        target
                    },
                    Some(condition) if check (&condition, self.device.state()) => {
                        info!("{:02}: goto {} cond: True", line, label);
                        target
                    },
                    Some(_) => {
                        info!("{:02}: goto {} cond: False, no GOTO", line, label);
                        pc + 1
                    }
                }
            },
            Op::Record (mode, interval) => {
                info!("{:02}: record {} {}", line, mode as u8, interval);
                self.recorder.configure (mode, interval).chain_err (|| "can't close recording")?;
                pc + 1
            },
            Op::Call { ref command, ref first, ref second } => {
                self.context.calls += 1;
                let session = self.recorder.session_name().map (String::from);
                match session {
                    Some(session) => {
                        let subs = Substitutions::new (self.context.calls, &session,
                            self.recorder.dir());
                        let result = call::run (&mut self.shell, command, first, second, &subs);
                        info!("{:02}: call no: {} res={}", line, subs.counter, result);
                        self.offer (elapsed, Trigger::Instruction, &result)?;
                    },
                    None => info!("{:02}: call {} skipped (no recording)", line, command)
                }
                pc + 1
            }
        };
        Ok(next)
    }

    async fn set (&mut self, target: Target, value: f64) -> bool {
        match target {
            Target::Voltage => self.device.set_voltage (value).await,
            Target::Current => self.device.set_current (value).await
        }
    }

    /// `WAIT`: a plain delay without a pending condition, otherwise a wait for the condition
    /// with an optional timeout (`0` waits forever).
    fn wait (&mut self, line: usize, seconds: f64, elapsed: f64) -> usize {
        let pc = self.pc;
        if let Some(condition) = self.context.pending {
            if check (&condition, self.device.state()) {
                info!("{:02}: wait {} cond: True", line, seconds);
                self.context.pending = None;
                self.context.wait_anchor = None;
                return pc + 1;
            }
            if seconds <= 0.0 {
                info!("{:02}: wait {} cond: False", line, seconds);
                return pc;
            }
        }
        let anchor = *self.context.wait_anchor.get_or_insert (elapsed);
        if elapsed - anchor >= seconds {
            info!("{:02}: wait {} {}", line, seconds,
                if self.context.pending.is_some() { "cond: <timeout>" } else { "time reached" });
            self.context.pending = None;
            self.context.wait_anchor = None;
            pc + 1
        } else {
            pc
        }
    }
}

fn confirmed_note (confirmed: bool) -> &'static str {
    if confirmed { "" } else { "(not confirmed)" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::io::DuplexStream;
    use crate::call::tests::FakeShell;
    use crate::constants::*;
    use crate::script::compile;
    use crate::testing::SimModule;

    fn engine (source: &str, dir: &std::path::Path)
        -> (SimModule, Engine<DuplexStream, FakeShell>)
    {
        let (sim, device) = SimModule::start();
        let program = compile (source).unwrap();
        (sim, Engine::new (program, device, Recorder::new (dir), FakeShell::default()))
    }

    #[tokio::test]
    async fn straight_line_program() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("SET V 5\nSET C 1.5\nMAX P 60\nOUTPUT ON", dir.path());
        for _ in 0..3 {
            assert_eq!(engine.step (0.0).await.unwrap(), Flow::Running);
        }
        assert_eq!(engine.step (0.0).await.unwrap(), Flow::Finished);
        assert_eq!(sim.get (REGISTER_USET), 500);
        assert_eq!(sim.get (REGISTER_ISET), 1500);
        assert_eq!(sim.get (REGISTER_OPP), 6000);
        assert_eq!(sim.get (REGISTER_ONOFF), 1);
        assert!(engine.device().state().power_on);
    }

    #[tokio::test]
    async fn inc_adds_to_confirmed_target_and_floors_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("SET V 2\nINC V 0.5\nINC V -10", dir.path());
        engine.step (0.0).await.unwrap();
        engine.step (0.0).await.unwrap();
        assert_eq!(sim.get (REGISTER_USET), 250);
        engine.step (0.0).await.unwrap();
        assert_eq!(sim.get (REGISTER_USET), 0);
    }

    #[tokio::test]
    async fn unconditional_wait_holds_until_time_reached() {
        let dir = tempfile::tempdir().unwrap();
        let (_sim, mut engine) = engine ("WAIT 2\nOUTPUT OFF", dir.path());
        engine.step (3.0).await.unwrap();
        assert_eq!(engine.context().wait_anchor, Some(3.0));
        for &time in &[3.5, 4.0, 4.999] {
            engine.step (time).await.unwrap();
            assert_eq!(engine.pc(), 0);
        }
        engine.step (5.0).await.unwrap();
        assert_eq!(engine.pc(), 1);
        assert_eq!(engine.context().wait_anchor, None);
    }

    #[tokio::test]
    async fn conditional_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (_sim, mut engine) = engine ("IF V > 10\nWAIT 1\nOUTPUT OFF", dir.path());
        engine.step (0.0).await.unwrap();
        assert!(engine.context().pending.is_some());
        engine.step (0.2).await.unwrap();
        engine.step (0.7).await.unwrap();
        assert_eq!(engine.pc(), 1);
        assert!(engine.context().pending.is_some());
        engine.step (1.5).await.unwrap();
        assert_eq!(engine.pc(), 2);
        assert_eq!(engine.context().pending, None);
    }

    #[tokio::test]
    async fn conditional_wait_ends_early_when_condition_holds() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("IF C >= 0.5\nWAIT 5\nWAIT 2\nOUTPUT OFF", dir.path());
        engine.step (0.0).await.unwrap();
        engine.step (10.0).await.unwrap();
        assert_eq!(engine.pc(), 1);
        assert_eq!(engine.context().wait_anchor, Some(10.0));
        sim.set (REGISTER_IOUT, 600);
        engine.step (11.0).await.unwrap();
        assert_eq!(engine.pc(), 2);
        assert_eq!(engine.context().pending, None);
        assert_eq!(engine.context().wait_anchor, None);

        // the next WAIT measures from its own start
        engine.step (20.0).await.unwrap();
        assert_eq!(engine.context().wait_anchor, Some(20.0));
        engine.step (21.5).await.unwrap();
        assert_eq!(engine.pc(), 2);
        engine.step (22.0).await.unwrap();
        assert_eq!(engine.pc(), 3);
    }

    #[tokio::test]
    async fn conditional_wait_without_timeout_waits_for_condition() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("IF C >= 0.5\nWAIT 0\nOUTPUT OFF", dir.path());
        engine.step (0.0).await.unwrap();
        for &time in &[1.0, 100.0, 10_000.0] {
            engine.step (time).await.unwrap();
            assert_eq!(engine.pc(), 1);
        }
        sim.set (REGISTER_IOUT, 500);
        engine.step (10_001.0).await.unwrap();
        assert_eq!(engine.pc(), 2);
        assert_eq!(engine.context().pending, None);
    }

    #[tokio::test]
    async fn goto_with_unmet_condition_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("A: IF P > 1\nGOTO A\nOUTPUT ON", dir.path());
        engine.step (0.0).await.unwrap();
        let writes = sim.writes();
        engine.step (0.0).await.unwrap();
        assert_eq!(engine.pc(), 2);
        assert_eq!(engine.context().pending, None);
        assert_eq!(sim.writes(), writes);
    }

    #[tokio::test]
    async fn goto_with_met_condition_jumps() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("OUTPUT ON\nIF V < 1\nGOTO Z\nSET V 9\nZ: OUTPUT OFF",
            dir.path());
        sim.set (REGISTER_UOUT, 50);
        for _ in 0..3 {
            engine.step (0.0).await.unwrap();
        }
        assert_eq!(engine.pc(), 4);
        assert_eq!(engine.context().pending, None);
    }

    #[tokio::test]
    async fn protection_trip_stops_and_switches_off() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("OUTPUT ON\nWAIT 0", dir.path());
        engine.step (0.0).await.unwrap();
        sim.set (REGISTER_PROTECT, 2);
        let (_tx, rx) = oneshot::channel();
        match *engine.run (rx).await.unwrap_err().kind() {
            ErrorKind::Protection (2) => {},
            ref other => panic!("unexpected {:?}", other)
        }
        assert_eq!(sim.get (REGISTER_ONOFF), 0);
    }

    #[tokio::test]
    async fn interrupt_closes_recording_and_switches_off() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("RECORD 2 1\nOUTPUT ON\nWAIT 0", dir.path());
        engine.step (0.0).await.unwrap();
        engine.step (0.1).await.unwrap();
        assert!(engine.recorder().session_name().is_some());
        let (tx, rx) = oneshot::channel();
        tx.send (()).unwrap();
        assert_eq!(engine.run (rx).await.unwrap(), Outcome::Interrupted);
        assert!(engine.recorder().session_name().is_none());
        assert_eq!(sim.get (REGISTER_ONOFF), 0);
    }

    #[tokio::test]
    async fn telemetry_failure_skips_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut engine) = engine ("OUTPUT ON", dir.path());
        sim.mute (true);
        assert_eq!(engine.step (0.0).await.unwrap(), Flow::Running);
        assert_eq!(engine.pc(), 0);
        sim.mute (false);
        assert_eq!(engine.step (0.0).await.unwrap(), Flow::Finished);
    }

    #[tokio::test]
    async fn calls_are_recorded_with_their_result() {
        let dir = tempfile::tempdir().unwrap();
        let (_sim, mut engine) = engine ("CALL skipped \"\" \"\"\nRECORD 1 0\nCALL \"meter \" $N $F",
            dir.path());
        engine.step (0.0).await.unwrap();
        assert!(engine.shell.commands.is_empty());
        engine.step (0.5).await.unwrap();
        let session = engine.recorder().session_name().unwrap().to_owned();
        let temp = dir.path().join (format!("_{}_0002.tmp", session));
        engine.shell.reply = Some((temp.clone(), "1.5 V\n".to_owned()));
        assert_eq!(engine.step (1.0).await.unwrap(), Flow::Finished);
        assert_eq!(engine.context().calls, 2);
        assert_eq!(engine.shell.commands, vec![format!("meter 0002{}", temp.display())]);

        let path = engine.recorder().session_path().unwrap().to_owned();
        let (tx, rx) = oneshot::channel();
        tx.send (()).unwrap();
        engine.run (rx).await.unwrap();
        let text = fs::read_to_string (path).unwrap();
        let rows: Vec<&str> = text.lines().skip (1).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with ("1.000,"));
        assert!(rows[0].ends_with (",    2,1.5 V"));
        assert!(!temp.exists());
    }
}
