use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use usbd_msc::{Identity, MscConfig, ScratchConfig};

use crate::commands::Session;
use crate::image::ImageDisk;

mod commands;
mod image;
mod progress_bar;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Opts {
    /// Verbose
    #[clap(short, long)]
    verbose: bool,

    /// Hide the progress bar
    #[clap(short, long)]
    quiet: bool,

    /// Disk image served as logical unit 0
    image: PathBuf,

    /// Logical block size of the image
    #[clap(short, long, default_value_t = 512, value_parser = num_parser)]
    block_size: u32,

    /// Create the image, or grow it, to this many blocks
    #[clap(long, value_parser = num_parser)]
    create: Option<u32>,

    /// Serve the image write protected
    #[clap(short, long)]
    read_only: bool,

    /// Bulk endpoint packet size (64 full speed, 512 high speed)
    #[clap(long, default_value_t = 64, value_parser = num_parser)]
    packet_size: u32,

    /// Pipeline scratch buffer size in bytes
    #[clap(long, default_value_t = 4096, value_parser = num_parser)]
    scratch: u32,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print INQUIRY data, the serial number and the highest LUN
    Inquiry,
    /// Print READ CAPACITY data
    Capacity,
    /// Read blocks, to a file or as a hex dump
    Read {
        #[clap(value_parser = num_parser)]
        lba: u32,
        #[clap(default_value_t = 1, value_parser = num_parser)]
        blocks: u32,
        /// Output file
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a file starting at a block, zero padding the last block
    Write {
        #[clap(value_parser = num_parser)]
        lba: u32,
        /// Input file
        input: PathBuf,
    },
    /// VERIFY a range of blocks
    Verify {
        #[clap(value_parser = num_parser)]
        lba: u32,
        #[clap(default_value_t = 1, value_parser = num_parser)]
        blocks: u32,
    },
    /// Print the current sense data
    Sense,
    /// Eject the medium
    Eject {
        /// Allow medium removal first
        #[clap(short, long)]
        force: bool,
    },
}

// allow user to pass hex formatted numbers (typically the format used for block addresses)
fn num_parser(s: &str) -> Result<u32, &'static str> {
    match s.get(0..2) {
        Some("0x") => u32::from_str_radix(&s[2..], 16).map_err(|_| "invalid hex number"),
        Some("0b") => u32::from_str_radix(&s[2..], 2).map_err(|_| "invalid binary number"),
        _ => s.parse::<u32>().map_err(|_| "invalid decimal number"),
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let filter = if opts.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    let disk = ImageDisk::open(
        &opts.image,
        opts.block_size,
        opts.create.map(u64::from),
        opts.read_only,
    )?;
    let config = MscConfig {
        packet_size: u16::try_from(opts.packet_size).unwrap_or(u16::MAX),
        scratch: ScratchConfig::Allocate(opts.scratch as usize),
        identity: Identity {
            product: "msc-sim",
            ..Identity::default()
        },
        ..MscConfig::default()
    };
    let mut session = Session::new(disk, config)?;

    match opts.command {
        Command::Inquiry => session.inquiry(),
        Command::Capacity => session.capacity(),
        Command::Read { lba, blocks, output } => {
            // The hex dump goes to stdout, so the bar only shows for files.
            let mut progress = progress_bar::reporter(!opts.quiet && output.is_some());
            session.read(lba, blocks, output.as_deref(), progress.as_mut())
        }
        Command::Write { lba, input } => {
            let mut progress = progress_bar::reporter(!opts.quiet);
            session.write(lba, &input, progress.as_mut())
        }
        Command::Verify { lba, blocks } => session.verify(lba, u16::try_from(blocks)?),
        Command::Sense => session.sense(),
        Command::Eject { force } => session.eject(force),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn numbers_accept_hex_and_binary() {
        assert_eq!(num_parser("0x10"), Ok(16));
        assert_eq!(num_parser("0b101"), Ok(5));
        assert_eq!(num_parser("42"), Ok(42));
        assert!(num_parser("0xzz").is_err());
    }

    #[test]
    pub fn subcommands_parse() {
        let opts = Opts::try_parse_from(["msc-sim", "disk.img", "--create", "0x800", "read", "0x10", "4"]).unwrap();
        assert_eq!(opts.create, Some(0x800));
        assert!(matches!(opts.command, Command::Read { lba: 16, blocks: 4, output: None }));
    }
}
