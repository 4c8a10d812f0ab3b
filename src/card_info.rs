//! Contains data structures for information a card reports back about itself.

use crate::error::{Error, Result};
use crate::layout::MemoryLayout;
use std::fmt;

/// Data card types with a known memory layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CardKind {
    /// 16MB card with WAAS support.
    Waas16Mb,

    /// 4MB card without WAAS support.
    NonWaas4Mb,
}

impl CardKind {
    /// IID reported by 16MB WAAS cards.
    pub const IID_WAAS_16MB: u32 = 0x0100_4100;

    /// IID reported by 4MB non-WAAS cards.
    pub const IID_NON_WAAS_4MB: u32 = 0x0100_ad00;

    /// Looks up the card type for an IID.
    pub fn from_iid(iid: u32) -> Result<Self> {
        match iid {
            Self::IID_WAAS_16MB => Ok(CardKind::Waas16Mb),
            Self::IID_NON_WAAS_4MB => Ok(CardKind::NonWaas4Mb),
            _ => Err(Error::UnknownCard(iid)),
        }
    }

    /// The memory layout used by this card type.
    pub fn memory_layout(self) -> MemoryLayout {
        match self {
            CardKind::Waas16Mb => MemoryLayout::WAAS_16MB,
            CardKind::NonWaas4Mb => MemoryLayout::NON_WAAS_4MB,
        }
    }
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardKind::Waas16Mb => f.write_str("16MB WAAS"),
            CardKind::NonWaas4Mb => f.write_str("4MB non-WAAS"),
        }
    }
}

/// Identification read back from an inserted card.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardInfo {
    /// Identifier which determines the card type.
    pub iid: u32,

    /// Second identifier the card reports. Its meaning is not known.
    pub unknown: u32,

    /// Card type, if the IID is a known one.
    pub kind: Option<CardKind>,
}

impl CardInfo {
    /// Bundles both identifiers and resolves the card type.
    pub fn new(iid: u32, unknown: u32) -> Self {
        CardInfo {
            iid,
            unknown,
            kind: CardKind::from_iid(iid).ok(),
        }
    }
}

impl fmt::Display for CardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "IID: 0x{:x}", self.iid)?;
        writeln!(f, "Unknown identifier: 0x{:x}", self.unknown)?;
        match self.kind {
            Some(kind) => writeln!(f, "Card type: {}", kind),
            None => writeln!(f, "Card type: unknown"),
        }
    }
}
