//! Register numbers, function codes and other constants.
//! # Note about register numbers
//! The live registers `REGISTER_USET` to `REGISTER_CV_CC` are contiguous, which is what allows
//! the whole telemetry bundle to be fetched with a single read of [`TELEMETRY_COUNT`] registers
//! starting at `REGISTER_USET`.
//!
//! The protection limits live in the preset memory. Each of the 10 preset groups starts at
//! `0x50 + 0x10 * group`; only group 0 is used here, so `REGISTER_OVP` is `0x52`, `REGISTER_OCP`
//! is `0x53` and `REGISTER_OPP` is `0x54`.

/// Default slave address of the module.
pub const DEFAULT_SLAVE: u8 = 1;
/// Default serial speed, in baud.
pub const DEFAULT_SPEED: u32 = 19200;
/// USB vendor id of the CH340 adapter the modules ship with.
pub const ADAPTER_VID: u16 = 0x1a86;

/// Function code: read holding registers.
pub const FN_READ_HOLDING: u8 = 0x03;
/// Function code: write single register.
pub const FN_WRITE_SINGLE: u8 = 0x06;

/// Set voltage, 500 = 5.00 V.
pub const REGISTER_USET:    u16 = 0x00;
/// Set current, 500 = 0.500 A.
pub const REGISTER_ISET:    u16 = 0x01;
/// Output voltage.
pub const REGISTER_UOUT:    u16 = 0x02;
/// Output current.
pub const REGISTER_IOUT:    u16 = 0x03;
/// Output power.
pub const REGISTER_POWER:   u16 = 0x04;
/// Input voltage.
pub const REGISTER_UIN:     u16 = 0x05;
/// Key lock, 0 = not locked, 1 = locked.
pub const REGISTER_LOCK:    u16 = 0x06;
/// Protection state, 0 = none, 1 = OVP, 2 = OCP, 3 = OPP.
pub const REGISTER_PROTECT: u16 = 0x07;
/// Regulation mode, 0 = CV, 1 = CC.
pub const REGISTER_CV_CC:   u16 = 0x08;
/// Output switch, 0 = off, 1 = on.
pub const REGISTER_ONOFF:   u16 = 0x09;
/// Over-voltage protection of preset group 0.
pub const REGISTER_OVP:     u16 = 0x52;
/// Over-current protection of preset group 0.
pub const REGISTER_OCP:     u16 = 0x53;
/// Over-power protection of preset group 0.
pub const REGISTER_OPP:     u16 = 0x54;

/// Number of registers in the telemetry bundle (USET .. CV/CC).
pub const TELEMETRY_COUNT: u16 = 9;

/// Fixed-point scale of voltages and powers.
pub const SCALE_CENTI: f64 = 100.0;
/// Fixed-point scale of currents.
pub const SCALE_MILLI: f64 = 1000.0;

/// Largest chunk requested from the port in a single read.
pub const RX_CHUNK: usize = 32;
/// How long a single read attempt may wait for bytes, in milliseconds.
pub const RX_SLICE_MS: u64 = 10;
/// Number of empty read attempts tolerated before a transaction times out.
pub const RX_IDLE_TRIES: u32 = 50;
/// Hard upper bound for a whole reception, in milliseconds.
pub const RX_DEADLINE_MS: u64 = 2000;

/// Smallest output voltage change that counts as a change for change-based recording.
pub const DELTA_UOUT: f64 = 0.02;
/// Smallest output current change that counts as a change for change-based recording.
pub const DELTA_IOUT: f64 = 0.002;

/// First line of every recording.
pub const CSV_HEADER: &str = "Time[s],USET[V],ISET[A],UOUT[V],IOUT[A],POUT[W],UIN[V],PROT,CVCC,calls,res";
/// `strftime` format used for session names and `$D` expansion.
pub const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";
