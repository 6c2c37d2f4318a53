//! Script compiler.
//!
//! A script is a list of lines of the form
//! ```text
//! [LABEL:] OPCODE PARAM1 [PARAM2 [PARAM3]]    # comment
//! ```
//! Everything after a `#` is ignored, and parameters are split like a shell would, so quoting
//! keeps embedded whitespace. Opcodes and keyword parameters are case-insensitive.
//!
//! | Opcode   | Parameters                                      |
//! |----------|-------------------------------------------------|
//! | `CALL`   | command, argument, argument (free text)         |
//! | `GOTO`   | label                                           |
//! | `IF`     | `C`/`P`/`V`, `<`/`<=`/`==`/`>=`/`>`, number     |
//! | `INC`    | `V`/`C`, signed number                          |
//! | `SET`    | `V`/`C`, number                                 |
//! | `MAX`    | `C`/`P`/`V`, number                             |
//! | `OUTPUT` | `ON`/`OFF`                                      |
//! | `RECORD` | `0`..`3`, number                                |
//! | `WAIT`   | number                                          |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use crate::errors::*;
use crate::recorder::RecordMode;

/// What `SET` and `INC` act on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target {
    Voltage,
    Current
}

impl FromStr for Target {
    type Err = &'static str;
    fn from_str (s: &str) -> ::std::result::Result<Self, Self::Err> {
        Ok (match s.to_ascii_uppercase().as_str() {
            "V" => Target::Voltage,
            "C" => Target::Current,
            _   => return Err("expected V or C")
        })
    }
}

impl fmt::Display for Target {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match *self { Target::Voltage => "V", Target::Current => "C" })
    }
}

/// A measured quantity (for `IF`) or a protection limit (for `MAX`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Quantity {
    Current,
    Power,
    Voltage
}

impl FromStr for Quantity {
    type Err = &'static str;
    fn from_str (s: &str) -> ::std::result::Result<Self, Self::Err> {
        Ok (match s.to_ascii_uppercase().as_str() {
            "C" => Quantity::Current,
            "P" => Quantity::Power,
            "V" => Quantity::Voltage,
            _   => return Err("expected C, P or V")
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match *self {
            Quantity::Current => "C",
            Quantity::Power   => "P",
            Quantity::Voltage => "V"
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Comparison {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater
}

impl Comparison {
    pub fn holds (&self, value: f64, target: f64) -> bool {
        match *self {
            Comparison::Less         => value < target,
            Comparison::LessEqual    => value <= target,
            Comparison::Equal        => value == target,
            Comparison::GreaterEqual => value >= target,
            Comparison::Greater      => value > target
        }
    }
}

impl FromStr for Comparison {
    type Err = &'static str;
    fn from_str (s: &str) -> ::std::result::Result<Self, Self::Err> {
        Ok (match s {
            "<"        => Comparison::Less,
            "<="       => Comparison::LessEqual,
            "==" | "=" => Comparison::Equal,
            ">="       => Comparison::GreaterEqual,
            ">"        => Comparison::Greater,
            _          => return Err("expected <, <=, ==, >= or >")
        })
    }
}

impl fmt::Display for Comparison {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match *self {
            Comparison::Less         => "<",
            Comparison::LessEqual    => "<=",
            Comparison::Equal        => "==",
            Comparison::GreaterEqual => ">=",
            Comparison::Greater      => ">"
        })
    }
}

/// A one-shot comparison set by `IF` and consumed by the next `WAIT` or `GOTO`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Condition {
    pub quantity: Quantity,
    pub comparison: Comparison,
    pub value: f64
}

impl fmt::Display for Condition {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.quantity, self.comparison, self.value)
    }
}

/// A compiled operation with validated, typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Call { command: String, first: String, second: String },
    /// `target` is the operation index the label resolves to.
    Goto { label: String, target: usize },
    If(Condition),
    Inc(Target, f64),
    Set(Target, f64),
    Max(Quantity, f64),
    Output(bool),
    Record(RecordMode, f64),
    Wait(f64)
}

impl fmt::Display for Op {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Op::Call { ref command, ref first, ref second } =>
                write!(f, "CALL {:?} {:?} {:?}", command, first, second),
            Op::Goto { ref label, target } => write!(f, "GOTO {} (-> {})", label, target),
            Op::If (ref condition) => write!(f, "IF {}", condition),
            Op::Inc (target, delta) => write!(f, "INC {} {}", target, delta),
            Op::Set (target, value) => write!(f, "SET {} {}", target, value),
            Op::Max (quantity, value) => write!(f, "MAX {} {}", quantity, value),
            Op::Output (on) => write!(f, "OUTPUT {}", if on { "ON" } else { "OFF" }),
            Op::Record (mode, interval) => write!(f, "RECORD {} {}", mode as u8, interval),
            Op::Wait (seconds) => write!(f, "WAIT {}", seconds)
        }
    }
}

/// An operation along with the script line it was compiled from.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub line: usize,
    pub op: Op
}

/// A compiled script. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Program {
    ops: Vec<Operation>,
    labels: BTreeMap<String, usize>
}

impl Program {
    pub fn len (&self) -> usize { self.ops.len() }
    pub fn is_empty (&self) -> bool { self.ops.is_empty() }
    pub fn get (&self, index: usize) -> Option<&Operation> { self.ops.get (index) }
    pub fn operations (&self) -> &[Operation] { &self.ops }

    /// Operation index of a label. The lookup is case-insensitive.
    pub fn label (&self, name: &str) -> Option<usize> {
        self.labels.get (&name.to_ascii_uppercase()).cloned()
    }

    pub fn labels (&self) -> &BTreeMap<String, usize> { &self.labels }
}

impl fmt::Display for Program {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (index, operation) in self.ops.iter().enumerate() {
            writeln!(f, "{:02}: line {:3}: {}", index, operation.line, operation.op)?;
        }
        for (name, index) in &self.labels {
            writeln!(f, "{}: -> {:02}", name, index)?;
        }
        Ok(())
    }
}

/// Parameter grammar of an opcode.
#[derive(Debug, Copy, Clone)]
enum Param {
    Label,
    Quantity,
    Target,
    Comparison,
    Number,
    Signed,
    Power,
    Mode,
    Text,
    OptionalText
}

/// A parameter which passed its grammar check, already converted.
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Label(String),
    Quantity(Quantity),
    Target(Target),
    Comparison(Comparison),
    Number(f64),
    Switch(bool),
    Mode(RecordMode),
    Text(String)
}

impl Param {
    /// Checks `param` against this grammar entry and converts it.
    fn parse (&self, param: &str) -> Option<Arg> {
        match *self {
            Param::Label        => Some(param).filter (|p| is_label (p))
                .map (|p| Arg::Label (p.to_ascii_uppercase())),
            Param::Quantity     => param.parse().ok().map (Arg::Quantity),
            Param::Target       => param.parse().ok().map (Arg::Target),
            Param::Comparison   => param.parse().ok().map (Arg::Comparison),
            Param::Number       => parse_number (param, false).map (Arg::Number),
            Param::Signed       => parse_number (param, true).map (Arg::Number),
            Param::Power        => parse_switch (param).map (Arg::Switch),
            Param::Mode         => param.parse().ok().map (Arg::Mode),
            Param::Text if param.is_empty() => None,
            Param::Text | Param::OptionalText => Some(Arg::Text (param.to_owned()))
        }
    }
}

/// Opcode table: name and one grammar entry per parameter.
const OPCODES: [(&str, &[Param]); 9] = [
    ("CALL",   &[Param::Text, Param::OptionalText, Param::OptionalText]),
    ("GOTO",   &[Param::Label]),
    ("IF",     &[Param::Quantity, Param::Comparison, Param::Number]),
    ("INC",    &[Param::Target, Param::Signed]),
    ("SET",    &[Param::Target, Param::Number]),
    ("MAX",    &[Param::Quantity, Param::Number]),
    ("OUTPUT", &[Param::Power]),
    ("RECORD", &[Param::Mode, Param::Number]),
    ("WAIT",   &[Param::Number])
];

/// A letter followed by word characters.
fn is_label (s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() =>
            chars.all (|c| c.is_alphanumeric() || c == '_'),
        _ => false
    }
}

/// A label definition: a label immediately followed by a colon.
fn label_definition (s: &str) -> Option<&str> {
    match s.strip_suffix (':') {
        Some(name) if is_label (name) => Some(name),
        _ => None
    }
}

/// Parses `[+]digits[.digits]` (and a leading `-` too if `signed`). At least one digit is
/// required, and a decimal point must be followed by digits.
fn parse_number (s: &str, signed: bool) -> Option<f64> {
    let unsigned = match s.as_bytes().first() {
        Some(b'+') => &s[1..],
        Some(b'-') if signed => &s[1..],
        _ => s
    };
    let (whole, fraction) = match unsigned.find ('.') {
        Some(dot) => (&unsigned[..dot], Some(&unsigned[dot + 1..])),
        None => (unsigned, None)
    };
    let digits = |part: &str| part.bytes().all (|b| b.is_ascii_digit());
    let valid = digits (whole) && match fraction {
        Some(fraction) => !fraction.is_empty() && digits (fraction),
        None => !whole.is_empty()
    };
    if !valid {
        return None;
    }
    let value: f64 = format!("0{}", unsigned).parse().ok()?;
    Some(if s.starts_with ('-') { -value } else { value })
}

fn parse_switch (s: &str) -> Option<bool> {
    match s.to_ascii_uppercase().as_str() {
        "ON"  => Some(true),
        "OFF" => Some(false),
        _     => None
    }
}

/// Builds the typed operation from converted parameters. `None` if they don't fit the
/// opcode, which means the opcode table and this function disagree.
fn build (opcode: &str, args: &[Arg]) -> Option<Op> {
    Some(match (opcode, args) {
        ("CALL", [Arg::Text (command), Arg::Text (first), Arg::Text (second)]) => Op::Call {
            command: command.clone(),
            first: first.clone(),
            second: second.clone()
        },
        ("GOTO", [Arg::Label (label)]) => Op::Goto { label: label.clone(), target: 0 },
        ("IF", [Arg::Quantity (quantity), Arg::Comparison (comparison), Arg::Number (value)]) =>
            Op::If (Condition { quantity: *quantity, comparison: *comparison, value: *value }),
        ("INC", [Arg::Target (target), Arg::Number (delta)]) => Op::Inc (*target, *delta),
        ("SET", [Arg::Target (target), Arg::Number (value)]) => Op::Set (*target, *value),
        ("MAX", [Arg::Quantity (quantity), Arg::Number (value)]) => Op::Max (*quantity, *value),
        ("OUTPUT", [Arg::Switch (on)]) => Op::Output (*on),
        ("RECORD", [Arg::Mode (mode), Arg::Number (interval)]) => Op::Record (*mode, *interval),
        ("WAIT", [Arg::Number (seconds)]) => Op::Wait (*seconds),
        _ => return None
    })
}

/// Compiles a whole script.
///
/// Compilation stops at the first error; no partial program is ever returned. `GOTO` targets
/// are resolved after the last line, so forward references work, but a label that is never
/// defined is an error too.
///
/// # Example
/// ```
/// # use dpsctl::script::compile;
/// let program = compile ("A: SET V 5.0\nWAIT 1\nGOTO A\n").unwrap();
/// assert_eq!(program.len(), 3);
/// assert_eq!(program.label ("a"), Some(0));
/// ```
pub fn compile (source: &str) -> Result<Program> {
    let mut program = Program::default();
    // (operation index, label, line) of every GOTO, checked once all labels are known
    let mut gotos: Vec<(usize, String, usize)> = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let error = |reason: &str| ErrorKind::Syntax (line_no, raw.to_owned(), reason.to_owned());

        let code = match raw.find ('#') {
            Some(comment) => &raw[..comment],
            None => raw
        };
        if code.trim().is_empty() {
            continue;
        }
        let mut words = shlex::split (code).ok_or_else (|| error ("unbalanced quotes"))?;

        let label = match words.first().and_then (|word| label_definition (word)) {
            Some(name) if words.len() > 2 => Some(name.to_ascii_uppercase()),
            _ => None
        };
        if label.is_some() {
            words.remove (0);
        }
        if words.len() < 2 || words.len() > 4 {
            bail!(error ("wrong number of statements in line"));
        }

        let opcode = words.remove (0).to_ascii_uppercase();
        let grammar = match OPCODES.iter().find (|entry| entry.0 == opcode) {
            Some(entry) => entry.1,
            None => bail!(error (&format!("unknown operation: {}", opcode)))
        };
        if words.len() != grammar.len() {
            bail!(error (&format!("{} takes {} parameter(s), got {}",
                opcode, grammar.len(), words.len())));
        }
        let mut args = Vec::with_capacity (words.len());
        for (word, param) in words.iter().zip (grammar.iter()) {
            match param.parse (word) {
                Some(arg) => args.push (arg),
                None => bail!(error (&format!("parameter validation error in: {}", word)))
            }
        }

        let op = build (&opcode, &args)
            .ok_or_else (|| error (&format!("no operation for {} {:?}", opcode, args)))?;
        let op_index = program.ops.len();
        if let Op::Goto { ref label, .. } = op {
            gotos.push ((op_index, label.clone(), line_no));
        }
        program.ops.push (Operation { line: line_no, op });

        if let Some(name) = label {
            if program.labels.contains_key (&name) {
                bail!(error (&format!("duplicate label def: {}", name)));
            }
            program.labels.insert (name, op_index);
        }
    }

    for (op_index, name, line_no) in gotos {
        let resolved = match program.labels.get (&name) {
            Some(resolved) => *resolved,
            None => {
                let text = source.lines().nth (line_no - 1).unwrap_or_default().to_owned();
                bail!(ErrorKind::Syntax (line_no, text, format!("label {} not found", name)));
            }
        };
        if let Op::Goto { ref mut target, .. } = program.ops[op_index].op {
            *target = resolved;
        }
    }
    Ok(program)
}
