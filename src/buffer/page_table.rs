use std::collections::HashMap;

use crate::buffer::frame::FrameId;
use crate::storage::disk::file::FileId;
use crate::storage::page::PageId;

/// Resident-page index: maps `(file, page number)` to the frame currently
/// holding that page. Keys are unique; a page is resident in at most one
/// frame at a time.
#[derive(Default)]
pub struct PageTable {
    // File id to per-file page map. Empty per-file maps are pruned on
    // removal so iteration never visits dead files.
    map: HashMap<FileId, HashMap<PageId, FrameId>>,
}

impl PageTable {
    pub fn new() -> Self {
        PageTable::default()
    }

    pub fn lookup(&self, file_id: FileId, page_no: PageId) -> Option<FrameId> {
        self.map
            .get(&file_id)
            .and_then(|pages| pages.get(&page_no))
            .copied()
    }

    pub fn insert(&mut self, file_id: FileId, page_no: PageId, frame_no: FrameId) {
        self.map.entry(file_id).or_default().insert(page_no, frame_no);
    }

    /// Removes the entry for the key, returning the frame it mapped to.
    /// Removing an absent key is a no-op.
    pub fn remove(&mut self, file_id: FileId, page_no: PageId) -> Option<FrameId> {
        let pages = self.map.get_mut(&file_id)?;
        let frame_no = pages.remove(&page_no)?;
        if pages.is_empty() {
            self.map.remove(&file_id);
        }
        Some(frame_no)
    }

    pub fn len(&self) -> usize {
        self.map.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (FileId, PageId, FrameId)> + '_ {
        self.map.iter().flat_map(|(file_id, pages)| {
            pages
                .iter()
                .map(move |(page_no, frame_no)| (*file_id, *page_no, *frame_no))
        })
    }
}
