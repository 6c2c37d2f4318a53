#[macro_use]
extern crate clap;
extern crate dpsctl;

use std::{fs, process};
use std::path::PathBuf;
use error_chain::ChainedError;
use tokio::sync::oneshot;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::info;
use tracing_subscriber::EnvFilter;
use dpsctl::constants::*;
use dpsctl::call::SystemShell;
use dpsctl::device::Device;
use dpsctl::engine::{Engine, Outcome};
use dpsctl::errors::*;
use dpsctl::recorder::Recorder;
use dpsctl::script::{self, Program};

const DOCUMENTATION: &'static str = r#"SCRIPT SYNTAX:
    [LABEL:] OPCODE PARAM1 [PARAM2 [PARAM3]]     # comment

    SET V|C value          set output voltage / current
    INC V|C delta          add delta to the voltage / current setting
    MAX V|C|P value        set over-voltage / current / power protection
    OUTPUT ON|OFF          switch the output
    IF V|C|P op value      condition (< <= == >= >) for the next WAIT or GOTO
    WAIT seconds           wait; with a condition: timeout (0 = none)
    GOTO label             jump, conditionally after IF
    RECORD 0..3 interval   0 off, 1 instructions, 2 periodic, 3 on change
    CALL cmd arg1 arg2     run cmd+arg1+arg2 while recording; arguments
                           expand $D date, $N call number, $F temp file,
                           $R recording name, $$ a dollar sign

    The module output is switched off when the program is interrupted
    (Ctrl-C) or a protection trips.
"#;

/// First CH340 adapter found, or the platform's usual first serial port.
fn default_port() -> String {
    let detected = tokio_serial::available_ports().ok().and_then (|ports| {
        ports.into_iter().find (|port| match port.port_type {
            SerialPortType::UsbPort (ref usb) => usb.vid == ADAPTER_VID,
            _ => false
        })
    });
    match detected {
        Some(port) => port.port_name,
        None if cfg!(windows) => "COM6".to_owned(),
        None => "/dev/ttyUSB0".to_owned()
    }
}

fn init_logging (level: u8) {
    let default = match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace"
    };
    tracing_subscriber::fmt()
        .with_env_filter (
            EnvFilter::try_from_default_env().unwrap_or_else (|_| EnvFilter::new (default))
        )
        .with_target (false)
        .init();
}

fn main() {
    let port = default_port();
    let args = clap_app!(dpsctl =>
        (@setting DeriveDisplayOrder)
        (version: crate_version!())
        (about: "Runs control scripts against DPS power supply modules")
        (after_help: DOCUMENTATION)
        (@arg script: * "Script file to run")
        (@arg port: -p --port +takes_value default_value(&port) "Serial port/device")
        (@arg speed: -s --speed +takes_value default_value("19200") {
            |s: String| s.parse::<u32>()
                .map (|_| ())
                .map_err (|_| "must be numeric".to_string())
        } "Serial speed (baud)")
        (@arg address: -a --address +takes_value default_value("1") {
            // Ensures that the argument is a valid slave address.
            |s: String| s.parse::<u8>()
                .map_err (|_| ())
                .and_then (|n| if n > 0 { Ok(()) } else { Err(()) })
                .map_err (|_| "must be numeric, >= 1 and <= 255".to_string())
        } "Address of the module")
        (@arg debug: -d --debug +takes_value default_value("1") {
            |s: String| s.parse::<u8>()
                .map (|_| ())
                .map_err (|_| "must be numeric".to_string())
        } "Verbosity: 0 warnings only, 1 operations, 2 compiled program, 3 frames")
        (@arg output_dir: -o --("output-dir") +takes_value default_value(".")
            "Directory for recordings and call results")
        (@arg check: --check "Compiles and lists the program without running it")
    ).get_matches();

    // validators guarantee these parse
    let level = value_t!(args, "debug", u8).unwrap_or (1);
    init_logging (level);

    if let Err(error) = run (&args) {
        eprintln!("{}", error.display_chain());
        process::exit (1);
    }
}

fn run (args: &clap::ArgMatches) -> Result<()> {
    let path = args.value_of ("script").unwrap_or_default();
    let source = fs::read_to_string (path)
        .chain_err (|| format!("unable to read script {}", path))?;
    let program = script::compile (&source)
        .chain_err (|| "program execution stopped")?;

    if args.is_present ("check") {
        print!("{}", program);
        return Ok(());
    }
    tracing::debug!("compiled program:\n{}", program);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on (execute (args, program))
}

async fn execute (args: &clap::ArgMatches<'_>, program: Program) -> Result<()> {
    let port = args.value_of ("port").unwrap_or_default();
    let speed = value_t!(args, "speed", u32).unwrap_or (DEFAULT_SPEED);
    let slave = value_t!(args, "address", u8).unwrap_or (DEFAULT_SLAVE);
    let dir = PathBuf::from (args.value_of ("output_dir").unwrap_or ("."));

    let serial = tokio_serial::new (port, speed)
        .data_bits (tokio_serial::DataBits::Eight)
        .parity (tokio_serial::Parity::None)
        .stop_bits (tokio_serial::StopBits::One)
        .open_native_async()
        .chain_err (|| format!("could not open {}", port))?;
    info!("running {} operations on {} at {} baud", program.len(), port, speed);

    let (interrupt, interrupted) = oneshot::channel();
    tokio::spawn (async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt.send (());
        }
    });

    let mut engine = Engine::new (program, Device::new (serial, slave), Recorder::new (dir),
        SystemShell);
    match engine.run (interrupted).await? {
        Outcome::Completed => info!("program completed"),
        Outcome::Interrupted => info!("program interrupted, output switched off")
    }
    Ok(())
}
