use std::fs::File;
use std::io::{Read as _, Write as _};
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use thiserror::Error;
use usbd_msc::bot::{CommandBlock, CommandStatus};
use usbd_msc::scsi::capacity::ReadCapacity10Data;
use usbd_msc::scsi::inquiry::{InquiryData, vpd};
use usbd_msc::scsi::sense::{SENSE_DATA_LEN, SenseData};
use usbd_msc::scsi::Sense;
use usbd_msc::sim::commands::{
    InquiryCommand, PreventAllowMediumRemovalCommand, Read10Command, ReadCapacity10Command, RequestSenseCommand,
    StartStopUnitCommand, TestUnitReadyCommand, Verify10Command, Write10Command,
};
use usbd_msc::sim::{Host, LoopbackTransport, Response};
use usbd_msc::{LogicalUnit, Msc, MscConfig};

use crate::image::ImageDisk;
use crate::progress_bar::ProgressReporter;

/// Blocks moved per READ(10) or WRITE(10).
const CHUNK_BLOCKS: u32 = 64;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{command} failed: {sense}")]
    Failed { command: &'static str, sense: Sense },
    #[error("{command} ended in a phase error")]
    PhaseError { command: &'static str },
    #[error("{command} returned an unknown status {status:#04x}")]
    Status { command: &'static str, status: u8 },
    #[error("{command} returned {got} bytes, at least {expected} were expected")]
    Short {
        command: &'static str,
        expected: usize,
        got: usize,
    },
}

/// A configured driver serving one image, and the host talking to it.
pub struct Session {
    msc: Msc<'static, LoopbackTransport, ImageDisk>,
    host: Host,
}

impl Session {
    pub fn new(disk: ImageDisk, config: MscConfig<'static>) -> Result<Self> {
        let mut msc = Msc::new(LoopbackTransport::new(), [LogicalUnit::new(disk)], config)?;
        let mut host = Host::attach(&msc);
        host.configure(&mut msc);
        debug!("device configured, packet size {}", msc.packet_size());
        Ok(Self { msc, host })
    }

    fn block_size(&self) -> u32 {
        self.msc.unit(0).map_or(512, LogicalUnit::block_size)
    }

    /// Turn a failed status into an error carrying the unit's sense.
    fn check(&mut self, command: &'static str, response: Response) -> Result<Response> {
        match response.status() {
            Ok(CommandStatus::Passed) => Ok(response),
            Ok(CommandStatus::Failed) => {
                let sense = self.request_sense()?;
                Err(SessionError::Failed { command, sense }.into())
            }
            Ok(CommandStatus::PhaseError) => {
                self.host.reset_recovery(&mut self.msc)?;
                Err(SessionError::PhaseError { command }.into())
            }
            Err(status) => Err(SessionError::Status { command, status }.into()),
        }
    }

    fn request_sense(&mut self) -> Result<Sense> {
        let command = RequestSenseCommand::new(SENSE_DATA_LEN as u8);
        let response = self.host.read(&mut self.msc, 0, &command, SENSE_DATA_LEN as u32)?;
        SenseData::parse(&response.data).ok_or_else(|| {
            SessionError::Short {
                command: "REQUEST SENSE",
                expected: SENSE_DATA_LEN,
                got: response.data.len(),
            }
            .into()
        })
    }

    fn read_command<C: CommandBlock>(&mut self, name: &'static str, command: &C, length: u32) -> Result<Vec<u8>> {
        let response = self.host.read(&mut self.msc, 0, command, length)?;
        Ok(self.check(name, response)?.data)
    }

    fn no_data_command<C: CommandBlock>(&mut self, name: &'static str, command: &C) -> Result<()> {
        let response = self.host.execute(&mut self.msc, 0, command)?;
        self.check(name, response)?;
        Ok(())
    }

    pub fn inquiry(&mut self) -> Result<()> {
        let data = self.read_command("INQUIRY", &InquiryCommand::new(36), 36)?;
        let inquiry = InquiryData::parse(&data).ok_or(SessionError::Short {
            command: "INQUIRY",
            expected: 36,
            got: data.len(),
        })?;
        println!("Vendor:     {}", inquiry.vendor());
        println!("Product:    {}", inquiry.product());
        println!("Revision:   {}", inquiry.revision());
        println!("Removable:  {}", inquiry.is_removable());
        println!("Type:       {:?}", inquiry.peripheral_device_type());

        let page = self.read_command("INQUIRY", &InquiryCommand::vpd(vpd::UNIT_SERIAL_NUMBER, 255), 255)?;
        if page.len() > 4 {
            println!("Serial:     {}", String::from_utf8_lossy(&page[4..]));
        }
        let max_lun = self.host.get_max_lun(&mut self.msc)?;
        println!("Max LUN:    {max_lun}");
        Ok(())
    }

    pub fn capacity(&mut self) -> Result<()> {
        self.no_data_command("TEST UNIT READY", &TestUnitReadyCommand)?;
        let data = self.read_command("READ CAPACITY", &ReadCapacity10Command::new(0), 8)?;
        let capacity = ReadCapacity10Data::parse(&data).ok_or(SessionError::Short {
            command: "READ CAPACITY",
            expected: 8,
            got: data.len(),
        })?;
        println!("Last LBA:   {}", capacity.last_logical_block_address);
        println!("Block size: {}", capacity.block_length_bytes);
        println!("Capacity:   {} bytes", capacity.total_capacity_bytes());
        Ok(())
    }

    pub fn sense(&mut self) -> Result<()> {
        let sense = self.request_sense()?;
        println!("{sense}");
        Ok(())
    }

    pub fn read(
        &mut self,
        lba: u32,
        blocks: u32,
        output: Option<&Path>,
        progress: &mut dyn ProgressReporter,
    ) -> Result<()> {
        let block_size = self.block_size();
        let mut out: Box<dyn std::io::Write> = match output {
            Some(path) => Box::new(File::create(path).with_context(|| format!("creating {}", path.display()))?),
            None => Box::new(HexDump::new(lba as u64 * block_size as u64)),
        };

        progress.start(blocks as usize * block_size as usize);
        let mut done = 0;
        while done < blocks {
            let count = (blocks - done).min(CHUNK_BLOCKS);
            let command = Read10Command::new(0, lba + done, count as u16);
            let data = self.read_command("READ(10)", &command, count * block_size)?;
            out.write_all(&data)?;
            progress.advance(data.len());
            done += count;
        }
        progress.finish();
        out.flush()?;
        info!("read {blocks} blocks from lba {lba}");
        Ok(())
    }

    pub fn write(&mut self, lba: u32, input: &Path, progress: &mut dyn ProgressReporter) -> Result<()> {
        let block_size = self.block_size() as usize;
        let mut data = Vec::new();
        File::open(input)
            .with_context(|| format!("opening {}", input.display()))?
            .read_to_end(&mut data)?;
        if data.is_empty() {
            bail!("{} is empty", input.display());
        }
        // Pad the last block with zeros.
        data.resize(data.len().div_ceil(block_size) * block_size, 0);

        progress.start(data.len());
        let mut lba = lba;
        for chunk in data.chunks(CHUNK_BLOCKS as usize * block_size) {
            let count = (chunk.len() / block_size) as u16;
            let response = self.host.write(&mut self.msc, 0, &Write10Command::new(0, lba, count), chunk)?;
            self.check("WRITE(10)", response)?;
            progress.advance(chunk.len());
            lba += count as u32;
        }
        progress.finish();
        info!("wrote {} bytes from {}", data.len(), input.display());
        Ok(())
    }

    pub fn verify(&mut self, lba: u32, blocks: u16) -> Result<()> {
        self.no_data_command("VERIFY(10)", &Verify10Command::new(lba, blocks))?;
        println!("Verified {blocks} blocks from LBA {lba}");
        Ok(())
    }

    pub fn eject(&mut self, force: bool) -> Result<()> {
        if force {
            self.no_data_command("PREVENT ALLOW MEDIUM REMOVAL", &PreventAllowMediumRemovalCommand::new(false))?;
        }
        self.no_data_command("START STOP UNIT", &StartStopUnitCommand::eject())?;
        println!("Medium ejected");
        Ok(())
    }
}

/// Canonical hex plus ASCII dump to stdout.
struct HexDump {
    offset: u64,
    line: Vec<u8>,
}

impl HexDump {
    fn new(offset: u64) -> Self {
        Self {
            offset,
            line: Vec::with_capacity(16),
        }
    }

    fn emit(&mut self) -> std::io::Result<()> {
        if self.line.is_empty() {
            return Ok(());
        }
        let mut text = format!("{:08x} ", self.offset);
        for i in 0..16 {
            match self.line.get(i) {
                Some(byte) => text.push_str(&format!(" {byte:02x}")),
                None => text.push_str("   "),
            }
            if i == 7 {
                text.push(' ');
            }
        }
        text.push_str("  |");
        text.extend(self.line.iter().map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' }));
        text.push('|');
        writeln!(std::io::stdout(), "{text}")?;
        self.offset += self.line.len() as u64;
        self.line.clear();
        Ok(())
    }
}

impl std::io::Write for HexDump {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &byte in buf {
            self.line.push(byte);
            if self.line.len() == 16 {
                self.emit()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.emit()?;
        std::io::stdout().flush()
    }
}
