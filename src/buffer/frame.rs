use std::fmt;

use crate::storage::disk::file::DbFile;
use crate::storage::page::PageId;

pub type FrameId = u32;

/// Per-frame bookkeeping: which page occupies the frame, how many clients
/// hold it, and the bits consulted by the replacement policy.
pub struct FrameDesc {
    pub(crate) frame_no: FrameId,
    pub(crate) file: Option<DbFile>,
    pub(crate) page_no: PageId,
    pub(crate) pin_count: u32,
    pub(crate) dirty: bool,
    pub(crate) refbit: bool,
    pub(crate) valid: bool,
}

impl FrameDesc {
    pub(crate) fn new(frame_no: FrameId) -> Self {
        FrameDesc {
            frame_no,
            file: None,
            page_no: 0,
            pin_count: 0,
            dirty: false,
            refbit: false,
            valid: false,
        }
    }

    /// Stamps the frame with a freshly staged page, pinned once.
    pub(crate) fn set(&mut self, file: DbFile, page_no: PageId) {
        self.file = Some(file);
        self.page_no = page_no;
        self.pin_count = 1;
        self.dirty = false;
        self.refbit = false;
        self.valid = true;
    }

    /// Returns the frame to its unoccupied state.
    pub(crate) fn clear(&mut self) {
        self.file = None;
        self.page_no = 0;
        self.pin_count = 0;
        self.dirty = false;
        self.refbit = false;
        self.valid = false;
    }

    pub fn frame_no(&self) -> FrameId {
        self.frame_no
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl fmt::Display for FrameDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return write!(f, "frame {}: invalid", self.frame_no);
        }
        let filename = match &self.file {
            Some(file) => file.filename(),
            None => String::from("?"),
        };
        write!(
            f,
            "frame {}: file {} page {} pin={} dirty={} ref={}",
            self.frame_no, filename, self.page_no, self.pin_count, self.dirty, self.refbit
        )
    }
}
