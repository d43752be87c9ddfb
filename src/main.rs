use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sx127x_lora::{init_logger, RadioConfig};

#[derive(Parser)]
#[command(name = "lora-cli")]
#[command(about = "CLI tool for SX127x LoRa radios")]
struct Cli {
    /// JSON radio configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print all registers
    Dump,
    /// Transmit one packet
    Send {
        /// Treat the payload as hex
        #[arg(long)]
        hex: bool,
        payload: String,
    },
    /// Print received packets
    Listen {
        /// Stop after this many packets
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Seconds to wait for each packet
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
    /// Run channel activity detection once
    Cad,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RadioConfig::from_json_file(path)?,
        None => RadioConfig::default(),
    };

    if let Commands::ShowConfig = cli.command {
        println!("{}", config.to_json_string()?);
        return Ok(());
    }

    hardware::run(cli.command, &config).await
}

#[cfg(feature = "raspberry-pi")]
mod hardware {
    use std::io;
    use std::time::Duration;

    use anyhow::{bail, Context};
    use sx127x_lora::radio::hal::{Dio0Line, RaspberryPiHal};
    use sx127x_lora::util::hex::{decode_hex, pretty_hex};
    use sx127x_lora::{log_info, AsyncLoRa, LoRa, PacketRadio, RadioConfig};

    use super::Commands;

    pub async fn run(command: Commands, config: &RadioConfig) -> anyhow::Result<()> {
        let hal = RaspberryPiHal::from_config(config).context("opening SPI")?;
        let mut builder = LoRa::builder(hal).config(config);
        if config.dio0_pin.is_some() {
            builder = builder.event_line(Dio0Line::from_config(config).context("opening DIO0")?);
        }
        let radio = builder.build();
        radio.begin_with_config(config)?;

        match command {
            Commands::Dump => {
                radio.dump_registers(&mut io::stdout())?;
            }
            Commands::Send { hex, payload } => {
                let data = if hex {
                    decode_hex(&payload)?
                } else {
                    payload.into_bytes()
                };
                radio.begin_packet(false)?;
                let accepted = radio.write_bytes(&data)?;
                if accepted < data.len() {
                    bail!("payload of {} bytes does not fit one packet", data.len());
                }
                radio.end_packet(false)?;
                log_info(&format!("Sent {accepted} bytes"));
            }
            Commands::Listen { count, timeout } => {
                let mut radio = AsyncLoRa::new(radio)?;
                let wait = Duration::from_secs(timeout);
                let mut received = 0;

                while count.map_or(true, |limit| received < limit) {
                    match radio.next_packet(wait).await? {
                        Some(packet) => {
                            received += 1;
                            println!(
                                "RSSI {} dBm  SNR {:.1} dB  freq error {} Hz",
                                packet.metrics.rssi_dbm,
                                packet.metrics.snr_db,
                                packet.metrics.frequency_error_hz
                            );
                            println!("{}", pretty_hex(&packet.data, 16));
                        }
                        None => log_info(&format!("No packet in {timeout} s")),
                    }
                }
            }
            Commands::Cad => {
                let mut radio = AsyncLoRa::new(radio)?;
                let clear = radio.is_channel_clear(Duration::from_secs(1)).await?;
                println!("{}", if clear { "channel clear" } else { "activity detected" });
            }
            Commands::ShowConfig => {}
        }

        Ok(())
    }
}

#[cfg(not(feature = "raspberry-pi"))]
mod hardware {
    use sx127x_lora::RadioConfig;

    use super::Commands;

    pub async fn run(_command: Commands, _config: &RadioConfig) -> anyhow::Result<()> {
        anyhow::bail!("built without hardware support; rebuild with --features raspberry-pi")
    }
}
