//! In-memory stand-in for a module, answering over a `tokio::io::duplex` pipe.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use crate::constants::*;
use crate::device::Device;
use crate::num_utils::crc16;
use crate::transport::Transport;

#[derive(Default)]
struct Registers {
    values: Vec<u16>,
    writes: usize,
    corrupt_next: bool,
    echo_next: Option<(u16, u16)>,
    delay_next: Option<Duration>,
    mute: bool
}

impl Registers {
    fn respond (&mut self, request: &[u8; 8]) -> Option<Vec<u8>> {
        if self.mute || crc16 (&request[..6]).to_le_bytes() != [request[6], request[7]] {
            return None;
        }
        let field2 = u16::from_be_bytes ([request[2], request[3]]) as usize;
        let field3 = u16::from_be_bytes ([request[4], request[5]]);
        let mut body = match request[1] {
            FN_READ_HOLDING => {
                let mut body = vec![request[0], FN_READ_HOLDING, 2 * field3 as u8];
                for value in &self.values[field2..field2 + field3 as usize] {
                    body.extend_from_slice (&value.to_be_bytes());
                }
                body
            },
            FN_WRITE_SINGLE => {
                self.values[field2] = field3;
                self.writes += 1;
                let mut echo = request[..6].to_vec();
                if let Some((register, value)) = self.echo_next.take() {
                    echo[2..4].copy_from_slice (&register.to_be_bytes());
                    echo[4..6].copy_from_slice (&value.to_be_bytes());
                }
                echo
            },
            _ => return None
        };
        let crc = crc16 (&body);
        body.extend_from_slice (&crc.to_le_bytes());
        if self.corrupt_next {
            self.corrupt_next = false;
            body[3] ^= 0x10;
        }
        Some(body)
    }
}

/// Handle on a simulated module. Register contents can be inspected and changed while a
/// [`Device`] talks to it.
pub struct SimModule {
    registers: Arc<Mutex<Registers>>
}

impl SimModule {
    /// Spawns the module task and returns a device connected to it, with a short retry budget.
    pub fn start() -> (SimModule, Device<DuplexStream>) {
        let (client, module) = duplex (256);
        let registers = Arc::new (Mutex::new (Registers {
            values: vec![0; 0x60],
            ..Default::default()
        }));
        tokio::spawn (serve (module, registers.clone()));
        let transport = Transport::new (client)
            .with_budget (Duration::from_millis (5), 10, Duration::from_secs (1));
        (SimModule { registers }, Device::with_transport (transport, DEFAULT_SLAVE))
    }

    pub fn set (&self, register: u16, value: u16) {
        self.registers.lock().unwrap().values[register as usize] = value;
    }

    pub fn get (&self, register: u16) -> u16 {
        self.registers.lock().unwrap().values[register as usize]
    }

    /// Number of register writes the module has accepted.
    pub fn writes (&self) -> usize {
        self.registers.lock().unwrap().writes
    }

    pub fn corrupt_next (&self) {
        self.registers.lock().unwrap().corrupt_next = true;
    }

    /// Makes the next write echo name `register` and `value` instead of the written ones.
    pub fn echo_next (&self, register: u16, value: u16) {
        self.registers.lock().unwrap().echo_next = Some((register, value));
    }

    /// Holds back the next response for `delay`.
    pub fn delay_next (&self, delay: Duration) {
        self.registers.lock().unwrap().delay_next = Some(delay);
    }

    pub fn mute (&self, mute: bool) {
        self.registers.lock().unwrap().mute = mute;
    }
}

async fn serve (mut io: DuplexStream, registers: Arc<Mutex<Registers>>) {
    let mut request = [0_u8; 8];
    while io.read_exact (&mut request).await.is_ok() {
        let (response, delay) = {
            let mut registers = registers.lock().unwrap();
            let response = registers.respond (&request);
            (response, registers.delay_next.take())
        };
        if let Some(delay) = delay {
            tokio::time::sleep (delay).await;
        }
        if let Some(frame) = response {
            if io.write_all (&frame).await.is_err() {
                break;
            }
        }
    }
}
