//! Card geometry and the mapping from logical pages to the physical pages the programmer selects.

use crate::error::{Error, Result};

/// Size of a block, the unit of reading and writing.
pub const BLOCK_SIZE: usize = 0x1000;

/// Number of blocks in a page.
pub const BLOCKS_PER_PAGE: usize = 0x10;

/// Size of a page, the unit of erasing.
pub const PAGE_SIZE: usize = BLOCK_SIZE * BLOCKS_PER_PAGE;

/// Number of consecutive logical pages mapped onto the same physical base offset.
pub const PAGES_PER_OFFSET: u16 = 0x20;

/// Physical page numbers at which each offset group starts.
pub const MEMORY_OFFSETS: [u16; 8] = [
    0x00E0, 0x02E0, 0x0160, 0x0360, 0x01A0, 0x03A0, 0x01C0, 0x03C0,
];

/// A logical page on the card, counted from 0 across the whole memory layout.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Page(u16);

impl Page {
    /// Creates a page from its logical index.
    pub fn from_index(index: u16) -> Self {
        Self(index)
    }

    /// Refers to the page containing the given block.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use skybound::{Page, BLOCKS_PER_PAGE};
    ///
    /// assert_eq!(Page::from_block(BLOCKS_PER_PAGE - 1), Page::from_index(0));
    /// assert_eq!(Page::from_block(BLOCKS_PER_PAGE), Page::from_index(1));
    /// ```
    pub fn from_block(block: usize) -> Self {
        Self((block / BLOCKS_PER_PAGE) as u16)
    }

    /// The logical index of this page.
    pub fn index(&self) -> u16 {
        self.0
    }

    /// Index of the first block in this page.
    pub fn first_block(&self) -> usize {
        usize::from(self.0) * BLOCKS_PER_PAGE
    }
}

impl From<Page> for u16 {
    fn from(val: Page) -> Self {
        val.0
    }
}

/// Maps groups of [`PAGES_PER_OFFSET`] logical pages onto entries of [`MEMORY_OFFSETS`]. Each
/// card type has its own layout; the length of the layout determines the card's capacity.
///
/// [`PAGES_PER_OFFSET`]: constant.PAGES_PER_OFFSET.html
/// [`MEMORY_OFFSETS`]: constant.MEMORY_OFFSETS.html
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryLayout(&'static [u8]);

impl MemoryLayout {
    /// Used until a card has been identified. Only covers the first offset group.
    pub const UNKNOWN: MemoryLayout = MemoryLayout(&[0]);

    /// 4MB non-WAAS card.
    pub const NON_WAAS_4MB: MemoryLayout = MemoryLayout(&[0, 2]);

    /// 16MB WAAS card.
    pub const WAAS_16MB: MemoryLayout = MemoryLayout(&[0, 1, 2, 3, 4, 5, 6, 7]);

    /// Creates a layout from a list of offset group indices.
    pub fn new(groups: &'static [u8]) -> Result<Self> {
        if groups.is_empty() {
            return Err(Error::InvalidArgument("memory layout is empty"));
        }
        if groups
            .iter()
            .any(|&group| usize::from(group) >= MEMORY_OFFSETS.len())
        {
            return Err(Error::InvalidArgument("offset group index out of range"));
        }
        if groups.len() * usize::from(PAGES_PER_OFFSET) > usize::from(u16::MAX) {
            return Err(Error::InvalidArgument("memory layout is too large"));
        }
        Ok(Self(groups))
    }

    /// The offset group index of each group of pages.
    pub fn groups(&self) -> &'static [u8] {
        self.0
    }

    /// Number of logical pages covered by this layout.
    pub fn total_pages(&self) -> u16 {
        self.0.len() as u16 * PAGES_PER_OFFSET
    }

    /// Capacity in bytes.
    pub fn total_size(&self) -> usize {
        usize::from(self.total_pages()) * PAGE_SIZE
    }

    /// Returns the physical page number the programmer expects for a logical page.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use skybound::{MemoryLayout, Page};
    ///
    /// let layout = MemoryLayout::NON_WAAS_4MB;
    /// assert_eq!(layout.translate(Page::from_index(0)).unwrap(), 0x00E0);
    /// assert_eq!(layout.translate(Page::from_index(0x21)).unwrap(), 0x0161);
    /// assert!(layout.translate(Page::from_index(0x40)).is_err());
    /// ```
    pub fn translate(&self, page: Page) -> Result<u16> {
        let index = page.index();
        let group = self
            .0
            .get(usize::from(index / PAGES_PER_OFFSET))
            .ok_or(Error::PageOutOfRange(index))?;
        MEMORY_OFFSETS[usize::from(*group)]
            .checked_add(index % PAGES_PER_OFFSET)
            .ok_or(Error::InvalidArgument("physical page does not fit in 16 bits"))
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        MemoryLayout::UNKNOWN
    }
}

/// Free-standing form of [`MemoryLayout::translate`].
///
/// [`MemoryLayout::translate`]: struct.MemoryLayout.html#method.translate
pub fn translate(layout: &MemoryLayout, page: Page) -> Result<u16> {
    layout.translate(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_all_pages() {
        let layouts = [
            MemoryLayout::UNKNOWN,
            MemoryLayout::NON_WAAS_4MB,
            MemoryLayout::WAAS_16MB,
            MemoryLayout::new(&[7, 3, 3, 0, 5]).unwrap(),
        ];
        for layout in layouts.iter() {
            for index in 0..layout.total_pages() {
                let expected = u32::from(
                    MEMORY_OFFSETS[usize::from(layout.groups()[usize::from(index / 32)])],
                ) + u32::from(index % 32);
                let physical = translate(layout, Page::from_index(index)).unwrap();
                assert_eq!(u32::from(physical), expected);
                assert!(expected <= 0xFFFF);
            }
        }
    }

    #[test]
    fn test_translate_16mb() {
        let layout = MemoryLayout::WAAS_16MB;
        assert_eq!(layout.translate(Page::from_index(0x1F)).unwrap(), 0x00FF);
        assert_eq!(layout.translate(Page::from_index(0x20)).unwrap(), 0x02E0);
        assert_eq!(layout.translate(Page::from_index(0xFF)).unwrap(), 0x03DF);
    }

    #[test]
    fn test_translate_out_of_range() {
        let layout = MemoryLayout::UNKNOWN;
        assert!(matches!(
            layout.translate(Page::from_index(32)),
            Err(Error::PageOutOfRange(32))
        ));
    }

    #[test]
    fn test_sizes() {
        assert_eq!(PAGE_SIZE, 0x10000);
        assert_eq!(MemoryLayout::UNKNOWN.total_pages(), 32);
        assert_eq!(MemoryLayout::NON_WAAS_4MB.total_size(), 4 * 1024 * 1024);
        assert_eq!(MemoryLayout::WAAS_16MB.total_size(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(MemoryLayout::new(&[]).is_err());
        assert!(MemoryLayout::new(&[0, 8]).is_err());
    }

    #[test]
    fn test_page_blocks() {
        let page = Page::from_index(3);
        assert_eq!(page.first_block(), 48);
        assert_eq!(Page::from_block(page.first_block() + 15), page);
    }
}
