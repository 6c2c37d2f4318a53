//! The `CALL` side effect: argument substitution and the shell port.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use chrono::Local;
use tracing::{debug, warn};
use crate::constants::STAMP_FORMAT;

/// Runs an assembled command line. This is the only way the engine reaches outside the
/// module and its recording.
///
/// `execute` is synchronous and blocks the poll loop until the command exits: no telemetry
/// is read and an interrupt is only seen once the call returns.
pub trait Shell {
    fn execute (&mut self, command: &str) -> io::Result<()>;
}

/// Runs commands through the platform shell (`sh -c`, or `cmd /C` on Windows).
#[derive(Debug, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn execute (&mut self, command: &str) -> io::Result<()> {
        #[cfg(windows)]
        let status = Command::new ("cmd").arg ("/C").arg (command).status()?;
        #[cfg(not(windows))]
        let status = Command::new ("sh").arg ("-c").arg (command).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new (io::ErrorKind::Other, format!("command exited with {}", status)))
        }
    }
}

/// Values of the `$` tokens available in `CALL` arguments.
#[derive(Debug, Clone)]
pub struct Substitutions {
    /// `$D`: date and time of the call.
    pub stamp: String,
    /// `$N`: zero-padded call counter.
    pub counter: String,
    /// `$F`: temporary file whose first line becomes the call result.
    pub temp: String,
    /// `$R`: name of the active recording session.
    pub session: String
}

impl Substitutions {
    pub fn new (calls: u32, session: &str, dir: &Path) -> Substitutions {
        let counter = format!("{:04}", calls);
        let temp = dir.join (format!("_{}_{}.tmp", session, counter));
        Substitutions {
            stamp: Local::now().format (STAMP_FORMAT).to_string(),
            temp: temp.to_string_lossy().into_owned(),
            counter,
            session: session.to_owned()
        }
    }

    fn lookup (&self, name: &str) -> Option<&str> {
        match name {
            "D" | "d" => Some(self.stamp.as_str()),
            "N" | "n" => Some(self.counter.as_str()),
            "F" | "f" => Some(self.temp.as_str()),
            "R" | "r" => Some(self.session.as_str()),
            _ => None
        }
    }

    /// Expands `$X` / `${X}` tokens in `template`; `$$` is a literal `$`.
    ///
    /// A token is the longest run of word characters after the `$`, so `$Nx` is the unknown
    /// token `Nx`. Unknown tokens are left untouched.
    ///
    /// # Example
    /// ```
    /// # use dpsctl::call::Substitutions;
    /// # use std::path::Path;
    /// let subs = Substitutions::new (3, "20190101120000", Path::new ("."));
    /// assert_eq!(subs.expand ("run $n costs $$5, $X"), "run 0003 costs $5, $X");
    /// ```
    pub fn expand (&self, template: &str) -> String {
        let mut out = String::with_capacity (template.len());
        let mut rest = template;
        while let Some(dollar) = rest.find ('$') {
            out.push_str (&rest[..dollar]);
            let after = &rest[dollar + 1..];
            if let Some(tail) = after.strip_prefix ('$') {
                out.push ('$');
                rest = tail;
                continue;
            }
            let (name, consumed) = if let Some(braced) = after.strip_prefix ('{') {
                match braced.find ('}') {
                    Some(end) => (&braced[..end], end + 2),
                    None => ("", 0)
                }
            } else {
                let end = after.find (|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or (after.len());
                (&after[..end], end)
            };
            match self.lookup (name) {
                Some(value) if consumed > 0 => {
                    out.push_str (value);
                    rest = &after[consumed..];
                },
                _ => {
                    out.push ('$');
                    rest = after;
                }
            }
        }
        out.push_str (rest);
        out
    }
}

/// Assembles and runs one `CALL`, returning its textual result.
///
/// The command line is `command` followed by both expanded arguments, concatenated as they
/// are. If the temporary file name appears in the arguments, the first line of that file is
/// the result and the file is removed afterwards. Failures are logged and give an empty result.
pub fn run<S: Shell> (shell: &mut S, command: &str, first: &str, second: &str,
    subs: &Substitutions) -> String
{
    let first = subs.expand (first);
    let second = subs.expand (second);
    let line = format!("{}{}{}", command, first, second);
    debug!("call {}: {}", subs.counter, line);
    if let Err(error) = shell.execute (&line) {
        warn!("call {} failed: {}", subs.counter, error);
    }
    if !(first.contains (&subs.temp) || second.contains (&subs.temp)) {
        return String::new();
    }
    let temp = PathBuf::from (&subs.temp);
    let result = match fs::read_to_string (&temp) {
        Ok(text) => text.lines().next().unwrap_or_default().trim().to_owned(),
        Err(error) => {
            warn!("error reading {}: {}", temp.display(), error);
            String::new()
        }
    };
    if let Err(error) = fs::remove_file (&temp) {
        debug!("can't remove {}: {}", temp.display(), error);
    }
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records command lines and optionally writes a result file, like a script would.
    #[derive(Default)]
    pub struct FakeShell {
        pub commands: Vec<String>,
        pub reply: Option<(PathBuf, String)>
    }

    impl Shell for FakeShell {
        fn execute (&mut self, command: &str) -> io::Result<()> {
            self.commands.push (command.to_owned());
            if let Some((ref path, ref text)) = self.reply {
                fs::write (path, text)?;
            }
            Ok(())
        }
    }

    #[test]
    fn expands_every_token() {
        let subs = Substitutions::new (12, "S1", Path::new ("out"));
        assert_eq!(subs.expand ("$N-$n-${R}-$r"), "0012-0012-S1-S1");
        assert_eq!(subs.expand ("$F"), subs.temp);
        assert_eq!(subs.expand ("$D").len(), 14);
        assert_eq!(subs.expand ("$Nx $ ${N $$N"), "$Nx $ ${N $N");
        assert!(subs.temp.ends_with ("_S1_0012.tmp"));
    }

    #[test]
    fn reads_first_line_of_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let subs = Substitutions::new (1, "S", dir.path());
        let mut shell = FakeShell {
            reply: Some((PathBuf::from (&subs.temp), "3.14\nignored\n".to_owned())),
            ..Default::default()
        };
        let result = run (&mut shell, "measure ", "> ", "$F", &subs);
        assert_eq!(result, "3.14");
        assert_eq!(shell.commands, vec![format!("measure > {}", subs.temp)]);
        assert!(!Path::new (&subs.temp).exists());
    }

    #[test]
    fn missing_temp_file_gives_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let subs = Substitutions::new (2, "S", dir.path());
        let mut shell = FakeShell::default();
        assert_eq!(run (&mut shell, "true", " $F", "", &subs), "");
        assert_eq!(run (&mut shell, "echo ", "$N", "", &subs), "");
        assert_eq!(shell.commands[1], "echo 0002");
    }
}
