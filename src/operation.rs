//! Long-running transfers between a card and an image.
//!
//! Every transfer is an iterator which performs one unit of work (a block, or a page when erasing)
//! per call to `next` and yields the number of bytes it handled. Before each unit, the LED is
//! toggled and the card's presence is checked, and each new page is selected before its first
//! block. An iterator is fused after the first error.

use std::io::{Read, Write};

use super::error::{Error, Result};
use super::layout::{Page, BLOCKS_PER_PAGE, BLOCK_SIZE, PAGE_SIZE};
use super::protocol::DeviceProtocol;

pub trait Operation: Iterator<Item = Result<usize>> {
    /// Number of bytes the operation handles if it runs to completion.
    fn total(&self) -> usize;

    fn execute(&mut self) -> Result<()> {
        self.execute_with_progress(|_| ())
    }

    /// Runs the operation to completion, passing the size of each finished unit to `progress`.
    fn execute_with_progress<F: FnMut(usize)>(&mut self, mut progress: F) -> Result<()> {
        for step in self {
            progress(step?);
        }
        Ok(())
    }
}

/// Turns the outcome of a step into an iterator item. `Ok(None)` ends the iteration, errors end
/// it after being yielded.
fn finish(done: &mut bool, step: Result<Option<usize>>) -> Option<Result<usize>> {
    match step {
        Ok(Some(length)) => Some(Ok(length)),
        Ok(None) => {
            *done = true;
            None
        }
        Err(error) => {
            *done = true;
            Some(Err(error))
        }
    }
}

fn check_page_count<P: DeviceProtocol>(device: &P, pages: u16) -> Result<()> {
    if pages > device.data_pages() {
        Err(Error::InvalidArgument("page count exceeds the card's data area"))
    } else {
        Ok(())
    }
}

/// Reads the next block from an image, padded with `0xFF` if the image ends early.
fn read_padded_block<R: Read>(source: &mut R) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(BLOCK_SIZE);
    source.take(BLOCK_SIZE as u64).read_to_end(&mut block)?;
    block.resize(BLOCK_SIZE, 0xFF);
    Ok(block)
}

/// Per-unit preamble shared by all block transfers: heartbeat, then select the page when a new
/// one starts.
fn prepare_block<P: DeviceProtocol>(device: &mut P, block: usize) -> Result<()> {
    device.heartbeat(block)?;
    if block % BLOCKS_PER_PAGE == 0 {
        device.select_page(Page::from_block(block))?;
    }
    Ok(())
}

/// Copies the database from the card into a writer. Stops at the first block which is entirely
/// `0xFF`, since nothing has been written beyond that point.
pub struct ReadDatabase<'a, P: DeviceProtocol, W: Write> {
    device: &'a mut P,
    sink: W,
    blocks: usize,
    position: usize,
    started: bool,
    done: bool,
}

impl<'a, P: DeviceProtocol, W: Write> ReadDatabase<'a, P, W> {
    pub fn new(device: &'a mut P, pages: u16, sink: W) -> Result<Self> {
        check_page_count(device, pages)?;
        Ok(Self {
            device,
            sink,
            blocks: usize::from(pages) * BLOCKS_PER_PAGE,
            position: 0,
            started: false,
            done: false,
        })
    }

    fn step(&mut self) -> Result<Option<usize>> {
        if !self.started {
            self.device.before_read()?;
            self.started = true;
        }
        if self.position >= self.blocks {
            return Ok(None);
        }

        prepare_block(self.device, self.position)?;
        let block = self.device.read_block()?;
        self.position += 1;

        if block.iter().all(|&b| b == 0xFF) {
            log::debug!("Found an empty block at {}, stopping", self.position - 1);
            return Ok(None);
        }

        self.sink.write_all(&block)?;
        Ok(Some(block.len()))
    }
}

impl<P: DeviceProtocol, W: Write> Iterator for ReadDatabase<'_, P, W> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step();
        finish(&mut self.done, step)
    }
}

impl<P: DeviceProtocol, W: Write> Operation for ReadDatabase<'_, P, W> {
    fn total(&self) -> usize {
        self.blocks * BLOCK_SIZE
    }
}

/// Programs an image onto the card, block by block. The area has to be erased beforehand. The
/// last block is padded with `0xFF` if the image is not a multiple of the block size.
pub struct WriteDatabase<'a, P: DeviceProtocol, R: Read> {
    device: &'a mut P,
    source: R,
    blocks: usize,
    position: usize,
    started: bool,
    done: bool,
}

impl<'a, P: DeviceProtocol, R: Read> WriteDatabase<'a, P, R> {
    pub fn new(device: &'a mut P, pages: u16, source: R) -> Result<Self> {
        check_page_count(device, pages)?;
        Ok(Self {
            device,
            source,
            blocks: usize::from(pages) * BLOCKS_PER_PAGE,
            position: 0,
            started: false,
            done: false,
        })
    }

    fn step(&mut self) -> Result<Option<usize>> {
        if !self.started {
            self.device.before_write()?;
            self.started = true;
        }
        if self.position >= self.blocks {
            return Ok(None);
        }

        let block = read_padded_block(&mut self.source)?;
        prepare_block(self.device, self.position)?;
        self.device.write_block(&block)?;
        self.position += 1;
        Ok(Some(block.len()))
    }
}

impl<P: DeviceProtocol, R: Read> Iterator for WriteDatabase<'_, P, R> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step();
        finish(&mut self.done, step)
    }
}

impl<P: DeviceProtocol, R: Read> Operation for WriteDatabase<'_, P, R> {
    fn total(&self) -> usize {
        self.blocks * BLOCK_SIZE
    }
}

/// Compares the card contents against an image, padded with `0xFF` the same way as when
/// writing. Fails with [`Error::VerificationMismatch`] at the first differing block.
///
/// [`Error::VerificationMismatch`]: enum.Error.html#variant.VerificationMismatch
pub struct VerifyDatabase<'a, P: DeviceProtocol, R: Read> {
    device: &'a mut P,
    source: R,
    blocks: usize,
    position: usize,
    started: bool,
    done: bool,
}

impl<'a, P: DeviceProtocol, R: Read> VerifyDatabase<'a, P, R> {
    pub fn new(device: &'a mut P, pages: u16, source: R) -> Result<Self> {
        check_page_count(device, pages)?;
        Ok(Self {
            device,
            source,
            blocks: usize::from(pages) * BLOCKS_PER_PAGE,
            position: 0,
            started: false,
            done: false,
        })
    }

    fn step(&mut self) -> Result<Option<usize>> {
        if !self.started {
            self.device.before_read()?;
            self.started = true;
        }
        if self.position >= self.blocks {
            return Ok(None);
        }

        let file_block = read_padded_block(&mut self.source)?;
        prepare_block(self.device, self.position)?;
        let card_block = self.device.read_block()?;
        if card_block != file_block {
            log::error!("Verification failed at block {}", self.position);
            return Err(Error::VerificationMismatch(self.position));
        }
        self.position += 1;
        Ok(Some(file_block.len()))
    }
}

impl<P: DeviceProtocol, R: Read> Iterator for VerifyDatabase<'_, P, R> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step();
        finish(&mut self.done, step)
    }
}

impl<P: DeviceProtocol, R: Read> Operation for VerifyDatabase<'_, P, R> {
    fn total(&self) -> usize {
        self.blocks * BLOCK_SIZE
    }
}

/// Erases the first `pages` pages of the card.
///
/// The last page of the card is always erased first, before the requested pages in ascending
/// order. That page holds the metadata, so an interrupted transfer never leaves valid metadata
/// next to a half-written database.
pub struct Erase<'a, P: DeviceProtocol> {
    device: &'a mut P,
    count: u16,
    position: u16,
    started: bool,
    done: bool,
}

impl<'a, P: DeviceProtocol> Erase<'a, P> {
    pub fn pages(device: &'a mut P, pages: u16) -> Result<Self> {
        check_page_count(device, pages)?;
        Ok(Self {
            device,
            count: pages,
            position: 0,
            started: false,
            done: false,
        })
    }

    fn step(&mut self) -> Result<Option<usize>> {
        if !self.started {
            self.device.before_write()?;
            let last = Page::from_index(self.device.total_pages() - 1);
            self.device.select_page(last)?;
            self.device.erase_page()?;
            self.started = true;
        }
        if self.position >= self.count {
            return Ok(None);
        }

        self.device.heartbeat(usize::from(self.position))?;
        self.device.select_page(Page::from_index(self.position))?;
        self.device.erase_page()?;
        self.position += 1;
        Ok(Some(PAGE_SIZE))
    }
}

impl<P: DeviceProtocol> Iterator for Erase<'_, P> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step();
        finish(&mut self.done, step)
    }
}

impl<P: DeviceProtocol> Operation for Erase<'_, P> {
    fn total(&self) -> usize {
        usize::from(self.count) * PAGE_SIZE
    }
}

/// Reads the metadata string from the card's metadata page. Trailing `0xFF` bytes are removed.
pub fn read_metadata<P: DeviceProtocol>(device: &mut P) -> Result<String> {
    device.before_read()?;
    let page = device.metadata_page();
    device.select_page(page)?;

    let mut contents = Vec::with_capacity(PAGE_SIZE);
    for i in 0..BLOCKS_PER_PAGE {
        device.heartbeat(i)?;
        contents.extend(device.read_block()?);
    }

    let length = contents
        .iter()
        .rposition(|&b| b != 0xFF)
        .map_or(0, |last| last + 1);
    contents.truncate(length);
    String::from_utf8(contents).map_err(|e| Error::UnexpectedResponse(e.into_bytes()))
}

/// Erases the metadata page, marking the card as holding no valid database.
pub fn clear_metadata<P: DeviceProtocol>(device: &mut P) -> Result<()> {
    device.before_write()?;
    let page = device.metadata_page();
    device.select_page(page)?;
    device.erase_page()
}

/// Replaces the metadata string, e.g. `2303~12345678`.
pub fn write_metadata<P: DeviceProtocol>(device: &mut P, metadata: &str) -> Result<()> {
    if metadata.len() > PAGE_SIZE {
        return Err(Error::InvalidArgument("metadata does not fit in a page"));
    }
    let mut contents = metadata.as_bytes().to_vec();
    contents.resize(PAGE_SIZE, 0xFF);

    device.before_write()?;
    let page = device.metadata_page();
    device.select_page(page)?;

    // Programming can only clear bits, so the page has to be erased first.
    device.erase_page()?;

    for (i, block) in contents.chunks(BLOCK_SIZE).enumerate() {
        device.heartbeat(i)?;
        device.write_block(block)?;
    }
    Ok(())
}
