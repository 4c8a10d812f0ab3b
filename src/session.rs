use crate::card_info::{CardInfo, CardKind};
use crate::error::{Error, Result};
use crate::operation::{self, Erase, ReadDatabase, VerifyDatabase, WriteDatabase};
use crate::protocol::DeviceProtocol;
use std::io::{Read, Write};

/// Stages of an open session. A `Session` only exists between a successful handshake and
/// teardown, so there is no state for a closed device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// The handshake succeeded, the card has not been looked at yet.
    Identified,

    /// A card is inserted but has not been identified.
    CardDetected,

    /// No card is inserted.
    CardAbsent,

    /// The card has been identified and database operations can be run.
    InUse,
}

/// Exclusive use of an identified programmer.
///
/// On every way out, whether [`close`] or dropping the session after an error, the LED is
/// switched off exactly once and the device is released.
///
/// [`close`]: #method.close
pub struct Session<P: DeviceProtocol> {
    device: P,
    state: SessionState,
    card: Option<CardKind>,
    closed: bool,
}

impl<P: DeviceProtocol> Session<P> {
    /// Runs the identification handshake and checks for a card. With `need_card`, a missing or
    /// unknown card is an error; otherwise card detection can be repeated with [`init_card`].
    ///
    /// [`init_card`]: #method.init_card
    pub fn start(mut device: P, need_card: bool) -> Result<Self> {
        // The device is dropped, and thereby released, if this fails. Nothing else is sent to a
        // device which could not be identified.
        device.identify()?;

        let mut session = Session {
            device,
            state: SessionState::Identified,
            card: None,
            closed: false,
        };

        if need_card {
            session.init_card()?;
        } else {
            session.state = if session.device.has_card()? {
                SessionState::CardDetected
            } else {
                SessionState::CardAbsent
            };
        }
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Type of the identified card, once the session is `InUse`.
    pub fn card_kind(&self) -> Option<CardKind> {
        self.card
    }

    /// Direct access to the protocol engine.
    pub fn device(&mut self) -> &mut P {
        &mut self.device
    }

    /// Identifies the inserted card and makes the session ready for database operations.
    pub fn init_card(&mut self) -> Result<CardKind> {
        match self.device.init_data_card() {
            Ok(kind) => {
                self.card = Some(kind);
                self.state = SessionState::InUse;
                Ok(kind)
            }
            Err(Error::CardMissing) => {
                self.state = SessionState::CardAbsent;
                Err(Error::CardMissing)
            }
            Err(e) => {
                self.state = SessionState::CardDetected;
                Err(e)
            }
        }
    }

    pub fn version(&mut self) -> Result<String> {
        self.device.version()
    }

    pub fn has_card(&mut self) -> Result<bool> {
        self.device.has_card()
    }

    /// Reads the identifiers of the inserted card. Works for unknown cards as well.
    pub fn card_info(&mut self) -> Result<CardInfo> {
        if !self.device.has_card()? {
            return Err(Error::CardMissing);
        }
        self.device.card_info()
    }

    /// Number of pages available for the database.
    pub fn data_pages(&self) -> u16 {
        self.device.data_pages()
    }

    pub fn total_size(&self) -> usize {
        self.device.total_size()
    }

    pub fn read_database<W: Write>(
        &mut self,
        pages: u16,
        sink: W,
    ) -> Result<ReadDatabase<'_, P, W>> {
        self.check_card()?;
        ReadDatabase::new(&mut self.device, pages, sink)
    }

    pub fn write_database<R: Read>(
        &mut self,
        pages: u16,
        source: R,
    ) -> Result<WriteDatabase<'_, P, R>> {
        self.check_card()?;
        WriteDatabase::new(&mut self.device, pages, source)
    }

    pub fn verify_database<R: Read>(
        &mut self,
        pages: u16,
        source: R,
    ) -> Result<VerifyDatabase<'_, P, R>> {
        self.check_card()?;
        VerifyDatabase::new(&mut self.device, pages, source)
    }

    pub fn erase_database(&mut self, pages: u16) -> Result<Erase<'_, P>> {
        self.check_card()?;
        Erase::pages(&mut self.device, pages)
    }

    pub fn read_metadata(&mut self) -> Result<String> {
        self.check_card()?;
        operation::read_metadata(&mut self.device)
    }

    pub fn write_metadata(&mut self, metadata: &str) -> Result<()> {
        self.check_card()?;
        operation::write_metadata(&mut self.device, metadata)
    }

    pub fn clear_metadata(&mut self) -> Result<()> {
        self.check_card()?;
        operation::clear_metadata(&mut self.device)
    }

    /// Switches the LED off and ends the session.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn check_card(&self) -> Result<()> {
        if self.state == SessionState::InUse {
            Ok(())
        } else {
            Err(Error::CardMissing)
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log::debug!("Closing session");
        self.device.set_led(false)
    }
}

impl<P: DeviceProtocol> Drop for Session<P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Could not switch off the LED: {}", e);
        }
    }
}
