//! Typed proxy for a single module.

use error_chain::ChainedError;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use crate::constants::*;
use crate::data::{DeviceState, Register};
use crate::errors::*;
use crate::num_utils::to_wire;
use crate::protocol::{self, Response, FRAME_LEN};
use crate::transport::Transport;

/// A module reachable through a [`Transport`].
///
/// All getters return the values learned from the last confirmed responses. Setters issue
/// exactly one write and report whether the module confirmed it; a `false` means the cached
/// state did not change.
///
/// [`Transport`]: ../transport/struct.Transport.html
pub struct Device<T> {
    transport: Transport<T>,
    slave: u8,
    state: DeviceState
}

impl<T> Device<T>
    where T: AsyncRead + AsyncWrite + Unpin
{
    pub fn new (io: T, slave: u8) -> Self {
        Self::with_transport (Transport::new (io), slave)
    }

    pub fn with_transport (transport: Transport<T>, slave: u8) -> Self {
        Device { transport, slave, state: DeviceState::default() }
    }

    pub fn state (&self) -> &DeviceState { &self.state }

    /// Reads the 9-register telemetry bundle (USET .. CV/CC).
    pub async fn read_telemetry (&mut self) -> Result<()> {
        let request = protocol::read_request (self.slave, REGISTER_USET, TELEMETRY_COUNT);
        match self.exchange (&request, protocol::read_response_len (TELEMETRY_COUNT)).await? {
            Response::Telemetry (ref raw) => {
                self.state.apply_telemetry (raw);
                Ok(())
            },
            other => bail!(ErrorKind::UnexpectedResponse (format!("{:?}", other)))
        }
    }

    /// Turns the output on or off.
    pub async fn set_power (&mut self, on: bool) -> bool {
        self.write (Register::OnOff, if on { 1 } else { 0 }).await
    }

    /// Sets a new target voltage.
    pub async fn set_voltage (&mut self, volts: f64) -> bool {
        self.write_scaled (Register::SetVoltage, volts).await
    }

    /// Sets a new current limit.
    pub async fn set_current (&mut self, amps: f64) -> bool {
        self.write_scaled (Register::SetCurrent, amps).await
    }

    /// Sets a new over-voltage protection value.
    pub async fn set_ovp (&mut self, volts: f64) -> bool {
        self.write_scaled (Register::OverVoltage, volts).await
    }

    /// Sets a new over-current protection value.
    pub async fn set_ocp (&mut self, amps: f64) -> bool {
        self.write_scaled (Register::OverCurrent, amps).await
    }

    /// Sets a new over-power protection value.
    pub async fn set_opp (&mut self, watts: f64) -> bool {
        self.write_scaled (Register::OverPower, watts).await
    }

    async fn write_scaled (&mut self, register: Register, value: f64) -> bool {
        self.write (register, to_wire (value, register.scale())).await
    }

    /// Writes one register. Only an echo of exactly this register and value confirms the write
    /// and updates the cached state.
    async fn write (&mut self, register: Register, raw: u16) -> bool {
        let request = protocol::write_request (self.slave, register.number(), raw);
        match self.exchange (&request, FRAME_LEN).await {
            Ok(Response::WriteEcho (echoed, value)) if echoed == register && value == raw => {
                debug!("{} confirmed: {:?}", register, register.decode_value (raw));
                self.state.apply (register, raw);
                true
            },
            Ok(other) => {
                warn!("write of {} answered by {:?}", register, other);
                false
            },
            Err(error) => {
                warn!("{}", error.chain_err (|| format!("can't write {}", register)).display_chain());
                false
            }
        }
    }

    /// Runs one transaction and returns the validated response.
    async fn exchange (&mut self, request: &[u8], expected: usize) -> Result<Response> {
        let frame = self.transport.transact (request, expected).await?;
        let response = protocol::decode (frame)?;
        if let Response::Unrecognized (_) = response {
            warn!("unknown valid msg: {}", response.dump());
        }
        Ok(response)
    }
}
