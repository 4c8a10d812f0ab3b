//! In-memory Skybound programmer for tests.
//!
//! Understands the same command bytes as the real device. Flash behaves like the real thing:
//! erasing sets a page to `0xFF` and programming can only clear bits.

use crate::error::{Error, Result};
use crate::layout::{BLOCKS_PER_PAGE, BLOCK_SIZE, PAGE_SIZE};
use crate::protocol::{CONFIGURATION_DESCRIPTOR, DEVICE_DESCRIPTOR};
use crate::transport::Transport;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Commands seen by the simulated device, in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Led(bool),
    HasCard,
    Version,
    SelectPage(u16),
    BeforeRead,
    BeforeWrite,
    Iid,
    Unknown,
    ReadBlock(u16, usize),
    WriteBlock(u16, usize),
    ErasePage(u16),
    Control(u16, usize),
}

pub struct SimState {
    pub card_present: bool,
    /// Number of further presence checks answered positively before the card disappears.
    pub remove_after: Option<usize>,
    pub iid: u32,
    pub unknown: u32,
    pub version: &'static str,
    /// Answer every erase with this status instead of `0x04`.
    pub erase_status: Option<Vec<u8>>,
    /// Answer every block write with this status instead of the echo.
    pub write_status: Option<Vec<u8>>,
    /// Answer presence checks with this status byte.
    pub has_card_status: Option<u8>,
    /// Cut every block read short by one byte.
    pub short_block: bool,
    /// Number of further bulk reads answered before the device stops responding.
    pub fail_after: Option<usize>,
    /// Corrupt the descriptor returned by the handshake.
    pub bad_descriptor: bool,
    pub events: Vec<Event>,
    pub released: usize,
    pages: HashMap<u16, Vec<u8>>,
    selected: Option<u16>,
    cursor: usize,
    pending_write: bool,
    responses: VecDeque<Vec<u8>>,
}

impl SimState {
    /// Contents of a physical page.
    pub fn page(&self, physical: u16) -> Vec<u8> {
        self.pages
            .get(&physical)
            .cloned()
            .unwrap_or_else(|| vec![0xFF; PAGE_SIZE])
    }

    /// Overwrites a physical page without going through the protocol.
    pub fn set_page(&mut self, physical: u16, data: &[u8]) {
        let mut page = vec![0xFF; PAGE_SIZE];
        page[..data.len()].copy_from_slice(data);
        self.pages.insert(physical, page);
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }

    /// Events which touch card contents.
    pub fn block_io(&self) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::ReadBlock(..) | Event::WriteBlock(..) | Event::ErasePage(_)
                )
            })
            .cloned()
            .collect()
    }

    fn check_card(&mut self) -> bool {
        match self.remove_after {
            Some(0) => self.card_present = false,
            Some(n) => self.remove_after = Some(n - 1),
            None => {}
        }
        self.card_present
    }

    fn current_block(&self) -> Result<(u16, usize)> {
        match self.selected {
            Some(page) if self.cursor < BLOCKS_PER_PAGE => Ok((page, self.cursor)),
            _ => Err(Error::Usb(rusb::Error::Pipe)),
        }
    }

    fn program(&mut self, data: &[u8]) -> Result<()> {
        let (page, block) = self.current_block()?;
        let mut contents = self.page(page);
        for (cell, byte) in contents[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE]
            .iter_mut()
            .zip(data)
        {
            *cell &= byte;
        }
        self.pages.insert(page, contents);
        self.events.push(Event::WriteBlock(page, block));
        self.cursor += 1;
        let status = self
            .write_status
            .clone()
            .unwrap_or_else(|| vec![data[data.len() - 1], 0, 0, 0]);
        self.responses.push_back(status);
        Ok(())
    }

    fn handle(&mut self, data: &[u8]) -> Result<()> {
        if self.pending_write {
            self.pending_write = false;
            if data.len() != BLOCK_SIZE {
                return Err(Error::Usb(rusb::Error::Pipe));
            }
            return self.program(data);
        }

        match data {
            [0x12] => self.events.push(Event::Led(true)),
            [0x13] => self.events.push(Event::Led(false)),
            [0x18] => {
                self.events.push(Event::HasCard);
                let present = self.check_card();
                let status = match self.has_card_status {
                    Some(status) => status,
                    None if present => 0x00,
                    None => 0x01,
                };
                self.responses.push_back(vec![status]);
            }
            [0x28] => {
                let (page, block) = self.current_block()?;
                self.events.push(Event::ReadBlock(page, block));
                let contents = self.page(page);
                let end = if self.short_block {
                    (block + 1) * BLOCK_SIZE - 1
                } else {
                    (block + 1) * BLOCK_SIZE
                };
                self.responses
                    .push_back(contents[block * BLOCK_SIZE..end].to_vec());
                self.cursor += 1;
            }
            [0x2A, 0x04] => self.pending_write = true,
            [0x30, 0x00, 0x00, lo, hi] => {
                let page = u16::from_le_bytes([*lo, *hi]);
                self.events.push(Event::SelectPage(page));
                self.selected = Some(page);
                self.cursor = 0;
            }
            [0x40] => self.events.push(Event::BeforeRead),
            [0x42] => self.events.push(Event::BeforeWrite),
            [0x50, 0x04] => {
                self.events.push(Event::Iid);
                self.responses.push_back(self.iid.to_le_bytes().to_vec());
            }
            [0x50, 0x03] => {
                self.events.push(Event::Unknown);
                self.responses.push_back(self.unknown.to_le_bytes().to_vec());
            }
            [0x52, 0x04] => {
                let page = self.selected.ok_or(Error::Usb(rusb::Error::Pipe))?;
                self.events.push(Event::ErasePage(page));
                self.pages.insert(page, vec![0xFF; PAGE_SIZE]);
                let status = self.erase_status.clone().unwrap_or_else(|| vec![0x04]);
                self.responses.push_back(status);
            }
            [0x60] => {
                self.events.push(Event::Version);
                self.responses.push_back(self.version.as_bytes().to_vec());
            }
            _ => return Err(Error::Usb(rusb::Error::Pipe)),
        }
        Ok(())
    }
}

pub struct SimTransport {
    state: Rc<RefCell<SimState>>,
}

impl SimTransport {
    /// Creates a device with a 16MB WAAS card inserted. The returned state stays accessible
    /// after the transport has been moved into a device or session.
    pub fn new() -> (Self, Rc<RefCell<SimState>>) {
        let state = Rc::new(RefCell::new(SimState {
            card_present: true,
            remove_after: None,
            iid: 0x0100_4100,
            unknown: 0x0000_0089,
            version: "SKYBOUND 2.31",
            erase_status: None,
            write_status: None,
            has_card_status: None,
            short_block: false,
            fail_after: None,
            bad_descriptor: false,
            events: Vec::new(),
            released: 0,
            pages: HashMap::new(),
            selected: None,
            cursor: 0,
            pending_write: false,
            responses: VecDeque::new(),
        }));
        (
            SimTransport {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl Transport for SimTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.state.borrow_mut().handle(data)
    }

    fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        match state.fail_after {
            Some(0) => return Err(Error::Usb(rusb::Error::Timeout)),
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }
        let mut response = state
            .responses
            .pop_front()
            .ok_or(Error::Usb(rusb::Error::Timeout))?;
        response.truncate(length);
        Ok(response)
    }

    fn control_read(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::Control(value, length));
        if request_type != 0x80 || request != 0x06 {
            return Err(Error::Usb(rusb::Error::Pipe));
        }
        let mut descriptor = match value {
            0x0100 => DEVICE_DESCRIPTOR.to_vec(),
            0x0200 => CONFIGURATION_DESCRIPTOR.to_vec(),
            _ => return Err(Error::Usb(rusb::Error::Pipe)),
        };
        if state.bad_descriptor {
            descriptor[1] ^= 0xFF;
        }
        descriptor.truncate(length);
        Ok(descriptor)
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.state.borrow_mut().released += 1;
    }
}
