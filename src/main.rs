// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Half-duplex ENQ/ACK packet link
mod arbiter;
mod codec;
mod config;
mod error;
mod protocol;
mod receiver;
mod sender;
mod serial;
mod session;
mod staging;
mod stats;

use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use log::{error, info};
use serialport::{DataBits, Parity, StopBits};
use arbiter::PriorityConfig;
use config::LinkConfig;
use error::LinkError;
use serial::RealSerialPort;
use session::{Session, SessionEvent};

#[derive(Parser)]
#[command(name = "rmlink")]
#[command(about = "Half-duplex ENQ/ACK packet link over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Delay in milliseconds between sending each byte of a packet
    #[arg(long, default_value = "0", value_name = "MS")]
    byte_delay: u8,

    /// Wait for the peer's ENQ after a receive cycle
    #[arg(long)]
    sender_priority: bool,

    /// Go straight back to idle after sending
    #[arg(long)]
    receiver_priority: bool,

    /// Attempts to confirm the line for each packet
    #[arg(long, default_value = "1", value_name = "N")]
    line_tries: u32,

    /// Attempts to deliver each packet
    #[arg(long, default_value = "1", value_name = "N")]
    send_tries: u32,

    /// How long to wait for the ACK to an ENQ
    #[arg(long, default_value = "500", value_name = "MS")]
    confirm_timeout_ms: u64,

    /// How long to wait for the peer's ENQ after an exchange
    #[arg(long, default_value = "200", value_name = "MS")]
    enq_timeout_ms: u64,

    /// How long to wait for a packet or for the ACK to a packet
    #[arg(long, default_value = "2000", value_name = "MS")]
    packet_timeout_ms: u64,

    /// Idle line polling interval
    #[arg(long, default_value = "50", value_name = "MS")]
    idle_poll_ms: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a text file over the link
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Listen for packets and print the reassembled text
    Receive {
        /// Also append received text to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Interactive two-way session, one transfer per input line
    Chat,
}

impl Cli {
    fn link_config(&self) -> LinkConfig {
        LinkConfig {
            priority: PriorityConfig {
                sender_priority: self.sender_priority,
                receiver_priority: self.receiver_priority,
            },
            line_tries: self.line_tries,
            send_tries: self.send_tries,
            confirm_timeout: Duration::from_millis(self.confirm_timeout_ms),
            enq_wait_timeout: Duration::from_millis(self.enq_timeout_ms),
            packet_timeout: Duration::from_millis(self.packet_timeout_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            byte_delay: self.byte_delay,
        }
    }
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let line_settings = parse_data_bits(cli.data_bits).and_then(|data_bits| {
        let parity = parse_parity(&cli.parity)?;
        let stop_bits = parse_stop_bits(cli.stop_bits)?;
        Ok((data_bits, parity, stop_bits))
    });
    let (data_bits, parity, stop_bits) = match line_settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = cli.link_config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("Opening serial port: {}", cli.port);
    info!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(source) => {
            let e = LinkError::ChannelOpen { port: cli.port.clone(), source };
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Send { file } => send_file(serial_port, config, file),
        Commands::Receive { output } => receive_text(serial_port, config, output),
        Commands::Chat => chat(serial_port, config),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn open_session(serial_port: RealSerialPort, config: LinkConfig) -> Result<(Session, Receiver<SessionEvent>), LinkError> {
    let (mut session, events) = Session::new(Box::new(serial_port), config)?;
    session.connect();
    Ok((session, events))
}

/// Returns false when the transfer was abandoned.
fn send_file(serial_port: RealSerialPort, config: LinkConfig, file: PathBuf) -> Result<bool, LinkError> {
    let text = std::fs::read_to_string(&file)?;
    let (mut session, _events) = open_session(serial_port, config)?;

    println!("Sending file: {}", file.display());
    let frames = session.start_transfer(&text)?;
    let report = session.wait_transfer().unwrap_or_default();

    println!(
        "{} of {} packet(s) acknowledged, {} lost",
        report.acked, frames, report.lost
    );
    println!("{}", session.statistics());
    session.disconnect();

    Ok(!report.abandoned)
}

/// Runs until the receive engine stops.
fn receive_text(serial_port: RealSerialPort, config: LinkConfig, output: Option<PathBuf>) -> Result<bool, LinkError> {
    let mut output_file = match &output {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };
    let (_session, events) = open_session(serial_port, config)?;
    println!("Listening, press Ctrl-C to stop");

    for event in events.iter() {
        match event {
            SessionEvent::Fragment(fragment) => {
                let text = String::from_utf8_lossy(&fragment);
                print!("{}", text);
                std::io::stdout().flush()?;
                if let Some(file) = output_file.as_mut() {
                    file.write_all(&fragment)?;
                }
            }
            SessionEvent::ReceiverStopped(reason) => {
                error!("Receiver stopped: {}", reason);
                return Ok(false);
            }
            _ => {}
        }
    }

    Ok(true)
}

fn print_events(events: Receiver<SessionEvent>) {
    for event in events.iter() {
        match event {
            SessionEvent::Fragment(fragment) => {
                println!("<< {}", String::from_utf8_lossy(&fragment).trim_end());
            }
            SessionEvent::Progress { acked, total } => info!("Sent {}/{}", acked, total),
            SessionEvent::TransferFinished(report) if report.abandoned => {
                println!("!! transfer abandoned after {} of {} packet(s)", report.acked, report.frames);
            }
            SessionEvent::ReceiverStopped(reason) => {
                println!("!! receiver stopped: {}", reason);
                break;
            }
            _ => {}
        }
    }
}

fn chat(serial_port: RealSerialPort, config: LinkConfig) -> Result<bool, LinkError> {
    let (mut session, events) = open_session(serial_port, config)?;
    thread::spawn(move || print_events(events));

    println!("Type a line to send it. Commands: :stats :clear :text :forget :quit");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            ":quit" => break,
            ":stats" => println!("{}", session.statistics()),
            ":clear" => session.clear_statistics(),
            ":text" => println!("{}", session.received_text()),
            ":forget" => session.clear_received(),
            _ => {
                if !session.is_connected() {
                    println!("!! not connected");
                    break;
                }
                // one transfer at a time, typed lines queue behind it
                session.wait_transfer();
                if let Err(e) = session.start_transfer(&format!("{}\n", line)) {
                    println!("!! {}", e);
                }
            }
        }
    }

    session.wait_transfer();
    session.disconnect();
    Ok(true)
}
