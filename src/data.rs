//! Data objects such as `Register`s and the cached `DeviceState`.

use std::fmt;
use crate::constants::*;
use crate::num_utils::from_wire;

/// Represents an unit.
pub type Unit = &'static str;
/// Represents a complete register value, composed by the value itself (`f64`) and its unit.
pub type RegisterValue = (f64, Unit);

/// The registers of the module this crate knows about.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    SetVoltage,
    SetCurrent,
    OutVoltage,
    OutCurrent,
    OutPower,
    InVoltage,
    Lock,
    Protection,
    CvCc,
    OnOff,
    OverVoltage,
    OverCurrent,
    OverPower
}

/// Registers in the order they appear in the telemetry bundle.
pub const TELEMETRY: [Register; 9] = [
    Register::SetVoltage,
    Register::SetCurrent,
    Register::OutVoltage,
    Register::OutCurrent,
    Register::OutPower,
    Register::InVoltage,
    Register::Lock,
    Register::Protection,
    Register::CvCc
];

/// Registers which can be written through a single-register write.
const WRITABLE: [Register; 6] = [
    Register::SetVoltage,
    Register::SetCurrent,
    Register::OnOff,
    Register::OverVoltage,
    Register::OverCurrent,
    Register::OverPower
];

impl Register {
    /// Address of this register.
    ///
    /// # Example
    /// ```
    /// # use dpsctl::data::Register;
    /// assert_eq!(Register::OnOff.number(), 0x09);
    /// assert_eq!(Register::OverCurrent.number(), 0x53);
    /// ```
    pub fn number (&self) -> u16 {
        match *self {
            Register::SetVoltage  => REGISTER_USET,
            Register::SetCurrent  => REGISTER_ISET,
            Register::OutVoltage  => REGISTER_UOUT,
            Register::OutCurrent  => REGISTER_IOUT,
            Register::OutPower    => REGISTER_POWER,
            Register::InVoltage   => REGISTER_UIN,
            Register::Lock        => REGISTER_LOCK,
            Register::Protection  => REGISTER_PROTECT,
            Register::CvCc        => REGISTER_CV_CC,
            Register::OnOff       => REGISTER_ONOFF,
            Register::OverVoltage => REGISTER_OVP,
            Register::OverCurrent => REGISTER_OCP,
            Register::OverPower   => REGISTER_OPP
        }
    }

    /// Looks up a writable register by its address, as echoed by the module.
    pub fn writable (number: u16) -> Option<Register> {
        WRITABLE.iter().cloned().find (|register| register.number() == number)
    }

    /// Fixed-point scale of the register contents. Flags and codes are not scaled.
    pub fn scale (&self) -> f64 {
        match *self {
            Register::SetCurrent | Register::OutCurrent | Register::OverCurrent => SCALE_MILLI,
            Register::Lock | Register::Protection | Register::CvCc | Register::OnOff => 1.0,
            _ => SCALE_CENTI
        }
    }

    /// The unit of this register. Returns an empty string if not applicable.
    pub fn unit (&self) -> Unit {
        match *self {
            Register::SetVoltage | Register::OutVoltage | Register::InVoltage
                | Register::OverVoltage => "V",
            Register::SetCurrent | Register::OutCurrent | Register::OverCurrent => "A",
            Register::OutPower | Register::OverPower => "W",
            _ => ""
        }
    }

    /// Decodes a raw register value into its engineering value.
    pub fn decode_value (&self, raw: u16) -> RegisterValue {
        (from_wire (raw, self.scale()), self.unit())
    }
}

impl fmt::Display for Register {
    fn fmt (&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match *self {
            Register::SetVoltage  => "USET",
            Register::SetCurrent  => "ISET",
            Register::OutVoltage  => "UOUT",
            Register::OutCurrent  => "IOUT",
            Register::OutPower    => "POUT",
            Register::InVoltage   => "UIN",
            Register::Lock        => "LOCK",
            Register::Protection  => "PROT",
            Register::CvCc        => "CVCC",
            Register::OnOff       => "ONOFF",
            Register::OverVoltage => "OVP",
            Register::OverCurrent => "OCP",
            Register::OverPower   => "OPP"
        })
    }
}

/// Human readable name of a protection code.
pub fn protection_name (code: u16) -> &'static str {
    match code {
        0 => "none",
        1 => "OVP",
        2 => "OCP",
        3 => "OPP",
        _ => "unknown"
    }
}

/// Last module state confirmed by a response frame.
///
/// Fields are only ever updated from validated responses, never from the requests that caused
/// them: after a set, the new value shows up once the module has echoed it back.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceState {
    pub u_set: f64,
    pub i_set: f64,
    pub u_out: f64,
    pub i_out: f64,
    pub p_out: f64,
    pub u_in: f64,
    pub lock: u16,
    pub protection: u16,
    pub cv_cc: u16,
    pub ovp: f64,
    pub ocp: f64,
    pub opp: f64,
    pub power_on: bool
}

impl DeviceState {
    /// Applies a single confirmed register value.
    pub fn apply (&mut self, register: Register, raw: u16) {
        let (value, _) = register.decode_value (raw);
        match register {
            Register::SetVoltage  => self.u_set = value,
            Register::SetCurrent  => self.i_set = value,
            Register::OutVoltage  => self.u_out = value,
            Register::OutCurrent  => self.i_out = value,
            Register::OutPower    => self.p_out = value,
            Register::InVoltage   => self.u_in = value,
            Register::Lock        => self.lock = raw,
            Register::Protection  => self.protection = raw,
            Register::CvCc        => self.cv_cc = raw,
            Register::OnOff       => self.power_on = raw != 0,
            Register::OverVoltage => self.ovp = value,
            Register::OverCurrent => self.ocp = value,
            Register::OverPower   => self.opp = value
        }
    }

    /// Applies a confirmed telemetry bundle, in [`TELEMETRY`] order.
    ///
    /// [`TELEMETRY`]: ./constant.TELEMETRY.html
    pub fn apply_telemetry (&mut self, raw: &[u16; 9]) {
        for (register, value) in TELEMETRY.iter().zip (raw.iter()) {
            self.apply (*register, *value);
        }
    }
}
