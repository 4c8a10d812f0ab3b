//! This crate programs Garmin aviation database cards with a Skybound card programmer connected
//! via USB. It takes care of identifying the programmer and the card, maps the card's logical
//! pages onto the physical pages the programmer expects, and runs reads, writes, verification and
//! erasure one block at a time while watching out for the card being pulled out.
//!
//! # Example: Transferring a database
//! ```rust, no_run
//! use skybound::{Context, Operation, PAGE_SIZE};
//! use std::fs::File;
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut database = Vec::new();
//! File::open("dgrw72_2302_742ae60e.bin")?.read_to_end(&mut database)?;
//! let pages = ((database.len() + PAGE_SIZE - 1) / PAGE_SIZE) as u16;
//!
//! // Find the programmer and identify the inserted card
//! let context = Context::new()?;
//! let mut session = context.open(true)?;
//!
//! // Invalidate the old metadata and make room for the new database
//! session.clear_metadata()?;
//! session.erase_database(pages)?.execute()?;
//!
//! // Program the database, reporting progress as we go
//! let mut written = 0;
//! session
//!     .write_database(pages, database.as_slice())?
//!     .execute_with_progress(|bytes| written += bytes)?;
//!
//! // Check the result and mark the database as valid
//! session.verify_database(pages, database.as_slice())?.execute()?;
//! session.write_metadata("2302~742ae60e")?;
//!
//! session.close()?;
//! println!("Done!");
//! # Ok(())
//! # }
//! ```
//!
//! Every error aborts the operation it occurred in and leaves the card in an unspecified state,
//! so a failed transfer has to be started over. Dropping the session always switches the
//! programmer's LED off and releases the USB device.

extern crate crc_any;
extern crate rusb;

mod card_info;
mod checksum;
mod context;
mod error;
mod layout;
mod operation;
mod protocol;
mod session;
#[cfg(test)]
mod sim;
mod transport;

pub use card_info::{CardInfo, CardKind};
pub use checksum::{crc32_q, Crc32Q};
pub use context::{Context, DeviceInfo, DeviceKind, UsbSession};
pub use error::{Error, Result};
pub use layout::{
    translate, MemoryLayout, Page, BLOCKS_PER_PAGE, BLOCK_SIZE, MEMORY_OFFSETS, PAGES_PER_OFFSET,
    PAGE_SIZE,
};
pub use operation::{
    clear_metadata, read_metadata, write_metadata, Erase, Operation, ReadDatabase,
    VerifyDatabase, WriteDatabase,
};
pub use protocol::{DeviceProtocol, Skybound};
pub use rusb::UsbContext;
pub use session::{Session, SessionState};
pub use transport::{Transport, UsbTransport};

/// Timeout for all usb transactions.
const TIMEOUT: std::time::Duration = std::time::Duration::from_millis(3000);
