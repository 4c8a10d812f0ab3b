use crate::card_info::{CardInfo, CardKind};
use crate::error::{Error, Result};
use crate::layout::{MemoryLayout, Page, BLOCK_SIZE, PAGE_SIZE};
use crate::transport::Transport;

/// Length requested for every status and identification response.
const STATUS_LENGTH: usize = 0x40;

/// Device descriptor of a Skybound programmer which is ready to use.
pub(crate) const DEVICE_DESCRIPTOR: [u8; 18] = [
    0x12, 0x01, 0x10, 0x01, 0xFF, 0x83, 0xFF, 0x40, 0x39, 0x0E, 0x50, 0x12, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x01,
];

/// Full configuration descriptor of a Skybound programmer. Its first nine bytes are the short
/// configuration descriptor.
pub(crate) const CONFIGURATION_DESCRIPTOR: [u8; 32] = [
    0x09, 0x02, 0x20, 0x00, 0x01, 0x01, 0x00, 0x80, 0x0F, 0x09, 0x04, 0x00, 0x00, 0x02, 0x00,
    0x00, 0x00, 0x00, 0x07, 0x05, 0x81, 0x02, 0x40, 0x00, 0x05, 0x07, 0x05, 0x02, 0x02, 0x40,
    0x00, 0x05,
];

/// Operations a card programmer has to support so database transfers can be run on it.
///
/// Block I/O works on the page chosen with [`select_page`]: every [`read_block`] or
/// [`write_block`] moves on to the next block in that page, so a page has to be selected again
/// after [`BLOCKS_PER_PAGE`] blocks.
///
/// [`select_page`]: #tymethod.select_page
/// [`read_block`]: #tymethod.read_block
/// [`write_block`]: #tymethod.write_block
/// [`BLOCKS_PER_PAGE`]: constant.BLOCKS_PER_PAGE.html
pub trait DeviceProtocol {
    /// Checks the USB descriptors to make sure the device is what it claims to be and in a
    /// usable state.
    fn identify(&mut self) -> Result<()>;

    /// Firmware version string.
    fn version(&mut self) -> Result<String>;

    /// Whether a card is inserted.
    fn has_card(&mut self) -> Result<bool>;

    /// Reads both identifiers from the inserted card.
    fn card_info(&mut self) -> Result<CardInfo>;

    /// Identifies the inserted card and switches to its memory layout.
    fn init_data_card(&mut self) -> Result<CardKind>;

    /// The layout in use. [`MemoryLayout::UNKNOWN`] until a card has been initialised.
    ///
    /// [`MemoryLayout::UNKNOWN`]: struct.MemoryLayout.html#associatedconstant.UNKNOWN
    fn memory_layout(&self) -> MemoryLayout;

    fn set_led(&mut self, on: bool) -> Result<()>;

    /// Has to be sent once before a sequence of reads.
    fn before_read(&mut self) -> Result<()>;

    /// Has to be sent once before a sequence of writes or erases.
    fn before_write(&mut self) -> Result<()>;

    fn select_page(&mut self, page: Page) -> Result<()>;

    fn read_block(&mut self) -> Result<Vec<u8>>;

    /// Programs the next block. `data` must be exactly [`BLOCK_SIZE`] bytes long.
    ///
    /// [`BLOCK_SIZE`]: constant.BLOCK_SIZE.html
    fn write_block(&mut self, data: &[u8]) -> Result<()>;

    /// Erases the selected page.
    fn erase_page(&mut self) -> Result<()>;

    fn total_pages(&self) -> u16 {
        self.memory_layout().total_pages()
    }

    fn total_size(&self) -> usize {
        usize::from(self.total_pages()) * PAGE_SIZE
    }

    /// Pages available for the database. The last page of the card holds the metadata.
    fn data_pages(&self) -> u16 {
        self.total_pages().saturating_sub(1)
    }

    /// The page holding the metadata string.
    fn metadata_page(&self) -> Page {
        Page::from_index(self.data_pages())
    }

    /// Called before every unit of a long operation: blinks the LED and aborts with
    /// [`Error::CardMissing`] if the card has been pulled out.
    ///
    /// [`Error::CardMissing`]: enum.Error.html#variant.CardMissing
    fn heartbeat(&mut self, iteration: usize) -> Result<()> {
        self.set_led(iteration % 2 == 0)?;
        if self.has_card()? {
            Ok(())
        } else {
            log::error!("Data card has disappeared");
            Err(Error::CardMissing)
        }
    }
}

/// Commands understood by the Skybound programmer. Some of them take a sub-command or argument
/// bytes, which are appended when sending.
#[derive(Clone, Copy, Debug)]
enum Command {
    LedOn = 0x12,
    LedOff = 0x13,
    HasCard = 0x18,
    ReadBlock = 0x28,
    WriteBlock = 0x2A,
    SelectPage = 0x30,
    BeforeRead = 0x40,
    BeforeWrite = 0x42,
    Identifier = 0x50,
    ErasePage = 0x52,
    Version = 0x60,
}

/// Sub-command of [`Command::Identifier`] which returns the IID.
const IDENTIFIER_IID: u8 = 0x04;

/// Sub-command of [`Command::Identifier`] whose meaning is unknown.
const IDENTIFIER_UNKNOWN: u8 = 0x03;

/// Bank argument for programming and erasing.
const BANK: u8 = 0x04;

/// Protocol engine for the Skybound USB card programmer.
pub struct Skybound<X: Transport> {
    transport: X,
    memory_layout: MemoryLayout,
}

impl<X: Transport> Skybound<X> {
    pub fn new(transport: X) -> Self {
        Skybound {
            transport,
            memory_layout: MemoryLayout::UNKNOWN,
        }
    }

    /// Overrides the memory layout, e.g. for a card whose IID is not recognised.
    pub fn set_memory_layout(&mut self, memory_layout: MemoryLayout) {
        self.memory_layout = memory_layout;
    }

    /// Selects a page by its physical number, bypassing the memory layout.
    pub fn select_physical_page(&mut self, physical: u16) -> Result<()> {
        let [lo, hi] = physical.to_le_bytes();
        self.send_command(Command::SelectPage, &[0x00, 0x00, lo, hi])
    }

    /// The IID of the inserted card.
    pub fn iid(&mut self) -> Result<u32> {
        self.read_identifier(IDENTIFIER_IID)
    }

    /// A second identifier of the inserted card whose meaning is not known.
    pub fn unknown_identifier(&mut self) -> Result<u32> {
        self.read_identifier(IDENTIFIER_UNKNOWN)
    }

    fn read_identifier(&mut self, which: u8) -> Result<u32> {
        self.select_page(Page::from_index(0))?;
        self.before_read()?;
        self.send_command(Command::Identifier, &[which])?;
        let response = self.transport.read(STATUS_LENGTH)?;
        match response.as_slice() {
            [a, b, c, d, ..] => Ok(u32::from_le_bytes([*a, *b, *c, *d])),
            _ => Err(Error::UnexpectedResponse(response)),
        }
    }

    /// Reads a descriptor via a standard GET_DESCRIPTOR request and compares it to the expected
    /// bytes.
    fn expect_descriptor(&mut self, value: u16, expected: &[u8]) -> Result<()> {
        let descriptor = self
            .transport
            .control_read(0x80, 0x06, value, 0x0000, expected.len())?;
        if descriptor == expected {
            Ok(())
        } else {
            Err(Error::UnexpectedResponse(descriptor))
        }
    }

    fn send_command(&mut self, cmd: Command, args: &[u8]) -> Result<()> {
        log::trace!("{:?} {:02x?}", cmd, args);
        let mut packet = Vec::with_capacity(args.len() + 1);
        packet.push(cmd as u8);
        packet.extend_from_slice(args);
        self.transport.write(&packet)
    }
}

impl<X: Transport> DeviceProtocol for Skybound<X> {
    fn identify(&mut self) -> Result<()> {
        self.expect_descriptor(0x0100, &DEVICE_DESCRIPTOR)?;
        self.expect_descriptor(0x0200, &CONFIGURATION_DESCRIPTOR[..9])?;
        self.expect_descriptor(0x0200, &CONFIGURATION_DESCRIPTOR)?;
        log::debug!("Skybound programmer identified");
        Ok(())
    }

    fn version(&mut self) -> Result<String> {
        self.send_command(Command::Version, &[])?;
        let response = self.transport.read(STATUS_LENGTH)?;
        Ok(String::from_utf8_lossy(&response)
            .trim_end_matches('\0')
            .to_string())
    }

    fn has_card(&mut self) -> Result<bool> {
        self.send_command(Command::HasCard, &[])?;
        let response = self.transport.read(STATUS_LENGTH)?;
        match response.as_slice() {
            [0x00] => Ok(true),
            [0x01] => Ok(false),
            _ => Err(Error::UnexpectedResponse(response)),
        }
    }

    fn card_info(&mut self) -> Result<CardInfo> {
        let iid = self.iid()?;
        let unknown = self.unknown_identifier()?;
        Ok(CardInfo::new(iid, unknown))
    }

    fn init_data_card(&mut self) -> Result<CardKind> {
        if !self.has_card()? {
            return Err(Error::CardMissing);
        }

        // Primed once more than reading the IID needs, as the vendor software does.
        self.select_page(Page::from_index(0))?;
        self.before_read()?;
        let iid = self.iid()?;
        let kind = CardKind::from_iid(iid)?;
        log::info!("Detected data card: {}", kind);
        self.memory_layout = kind.memory_layout();
        Ok(kind)
    }

    fn memory_layout(&self) -> MemoryLayout {
        self.memory_layout
    }

    fn set_led(&mut self, on: bool) -> Result<()> {
        let cmd = if on { Command::LedOn } else { Command::LedOff };
        self.send_command(cmd, &[])
    }

    // Neither of these is known to do anything, but the vendor software sends them.
    fn before_read(&mut self) -> Result<()> {
        self.send_command(Command::BeforeRead, &[])
    }

    fn before_write(&mut self) -> Result<()> {
        self.send_command(Command::BeforeWrite, &[])
    }

    fn select_page(&mut self, page: Page) -> Result<()> {
        let physical = self.memory_layout.translate(page)?;
        self.select_physical_page(physical)
    }

    fn read_block(&mut self) -> Result<Vec<u8>> {
        self.send_command(Command::ReadBlock, &[])?;
        let block = self.transport.read(BLOCK_SIZE)?;
        if block.len() != BLOCK_SIZE {
            return Err(Error::UnexpectedResponse(block));
        }
        Ok(block)
    }

    fn write_block(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(Error::InvalidArgument("block must be exactly 4096 bytes"));
        }

        self.send_command(Command::WriteBlock, &[BANK])?;
        self.transport.write(data)?;

        // The programmer echoes the last byte it received.
        let response = self.transport.read(STATUS_LENGTH)?;
        match response.as_slice() {
            [last, 0x00, 0x00, 0x00] if *last == data[BLOCK_SIZE - 1] => Ok(()),
            _ => Err(Error::UnexpectedResponse(response)),
        }
    }

    fn erase_page(&mut self) -> Result<()> {
        self.send_command(Command::ErasePage, &[BANK])?;
        let response = self.transport.read(STATUS_LENGTH)?;
        if response == [BANK] {
            Ok(())
        } else {
            Err(Error::UnexpectedResponse(response))
        }
    }
}
