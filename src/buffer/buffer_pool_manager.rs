use std::{cell::RefCell, rc::Rc};

use log::{debug, warn};

use crate::{
    buffer::{
        frame::{FrameDesc, FrameId},
        page_table::PageTable,
    },
    errors::BufferError,
    storage::{
        disk::file::DbFile,
        page::{Page, PageId},
    },
};

/// Shared handle to a resident page.
///
/// Clones of the handle alias the same underlying bytes for as long as the
/// page stays resident. Holders must balance every `read_page`/`alloc_page`
/// with an `unpin_page` and must not touch the bytes afterwards.
pub type PageHandle = Rc<RefCell<Page>>;

/// Caches pages of paged files in a bounded pool of in-memory frames.
///
/// Frames are handed out by a clock (second-chance) sweep over the
/// descriptor table: the hand skips pinned frames, gives recently touched
/// frames one more revolution by clearing their reference bit, and evicts
/// the first unpinned, unreferenced frame it meets, writing the page back
/// through its owning file first when it is dirty. Write-back of dirty
/// pages is otherwise deferred to `flush_file` or drop.
pub struct BufferPoolManager {
    num_frames: u32,
    pool: Vec<PageHandle>,
    descriptors: Vec<FrameDesc>,
    page_table: PageTable,
    clock_hand: FrameId,
}

impl BufferPoolManager {
    /// Builds a pool of `num_frames` empty frames. The clock hand starts on
    /// the last frame so the first allocation inspects frame 0.
    pub fn new(num_frames: u32) -> Self {
        assert!(num_frames > 0, "buffer pool needs at least one frame");

        let pool = (0..num_frames)
            .map(|_| Rc::new(RefCell::new(Page::new(0))))
            .collect();
        let descriptors = (0..num_frames).map(FrameDesc::new).collect();

        BufferPoolManager {
            num_frames,
            pool,
            descriptors,
            page_table: PageTable::new(),
            clock_hand: num_frames - 1,
        }
    }

    fn advance_clock(&mut self) {
        if self.clock_hand == self.num_frames - 1 {
            self.clock_hand = 0;
        } else {
            self.clock_hand += 1;
        }
    }

    /// Picks a free frame, evicting a resident page if necessary.
    ///
    /// Two full revolutions bound the sweep: the first clears any stale
    /// reference bits, the second then finds a victim if one exists. The
    /// victim's descriptor is cleared and its index entry removed before
    /// the frame id is handed back; the caller re-populates both.
    fn alloc_buf(&mut self) -> Result<FrameId, BufferError> {
        for _ in 0..2 * self.num_frames {
            self.advance_clock();
            let hand = self.clock_hand as usize;

            if !self.descriptors[hand].valid {
                return Ok(self.clock_hand);
            }
            if self.descriptors[hand].pin_count > 0 {
                continue;
            }
            if self.descriptors[hand].refbit {
                self.descriptors[hand].refbit = false;
                continue;
            }

            // Unpinned and unreferenced: this frame is the victim.
            if let Some(file) = self.descriptors[hand].file.clone() {
                if self.descriptors[hand].dirty {
                    debug!(
                        "evicting dirty page {} of {}, writing back",
                        self.descriptors[hand].page_no,
                        file.filename()
                    );
                    file.write_page(&self.pool[hand].borrow())?;
                }
                self.page_table
                    .remove(file.file_id(), self.descriptors[hand].page_no);
            }
            self.descriptors[hand].clear();
            return Ok(self.clock_hand);
        }

        Err(BufferError::BufferFull {
            num_frames: self.num_frames,
        })
    }

    /// Returns a pinned handle to the page, reading it from the file if it
    /// is not already resident. A hit bumps the pin count and sets the
    /// frame's reference bit; a miss stages the page into a freshly
    /// allocated frame with one pin.
    pub fn read_page(&mut self, file: &DbFile, page_no: PageId) -> Result<PageHandle, BufferError> {
        if let Some(frame_no) = self.page_table.lookup(file.file_id(), page_no) {
            let slot = frame_no as usize;
            self.descriptors[slot].refbit = true;
            self.descriptors[slot].pin_count += 1;
            return Ok(Rc::clone(&self.pool[slot]));
        }

        let frame_no = self.alloc_buf()?;
        let page = file.read_page(page_no)?;
        let slot = frame_no as usize;
        self.pool[slot] = Rc::new(RefCell::new(page));
        self.page_table.insert(file.file_id(), page_no, frame_no);
        self.descriptors[slot].set(file.clone(), page_no);
        Ok(Rc::clone(&self.pool[slot]))
    }

    /// Allocates a new page on the file and stages it resident, pinned
    /// once. Returns the assigned page number alongside the handle.
    pub fn alloc_page(&mut self, file: &DbFile) -> Result<(PageId, PageHandle), BufferError> {
        let page = file.allocate_page()?;
        let frame_no = self.alloc_buf()?;
        let page_no = page.page_number();
        let slot = frame_no as usize;
        self.pool[slot] = Rc::new(RefCell::new(page));
        self.page_table.insert(file.file_id(), page_no, frame_no);
        self.descriptors[slot].set(file.clone(), page_no);
        Ok((page_no, Rc::clone(&self.pool[slot])))
    }

    /// Releases one pin on the page. A true `dirty` hint sticks until the
    /// page leaves the pool. Unpinning a page that is not resident is a
    /// silent no-op; clients legitimately race with flushes.
    pub fn unpin_page(
        &mut self,
        file: &DbFile,
        page_no: PageId,
        dirty: bool,
    ) -> Result<(), BufferError> {
        let Some(frame_no) = self.page_table.lookup(file.file_id(), page_no) else {
            return Ok(());
        };

        let desc = &mut self.descriptors[frame_no as usize];
        if desc.pin_count == 0 {
            return Err(BufferError::PageNotPinned {
                file: file.filename(),
                page_no,
                frame_no,
            });
        }
        desc.pin_count -= 1;
        if dirty {
            desc.dirty = true;
        }
        Ok(())
    }

    /// Writes back and releases every resident page of the file.
    ///
    /// Fails with `PagePinned` on the first frame still held by a client
    /// and `BadBuffer` on a frame tagged with the file but invalid. Frames
    /// processed before a failure stay released.
    pub fn flush_file(&mut self, file: &DbFile) -> Result<(), BufferError> {
        debug!("flushing {}", file.filename());

        for frame_no in 0..self.num_frames {
            let slot = frame_no as usize;
            match &self.descriptors[slot].file {
                Some(owner) if owner == file => {}
                _ => continue,
            }

            if !self.descriptors[slot].valid {
                return Err(BufferError::BadBuffer {
                    file: file.filename(),
                    frame_no,
                });
            }
            if self.descriptors[slot].pin_count > 0 {
                return Err(BufferError::PagePinned {
                    file: file.filename(),
                    page_no: self.descriptors[slot].page_no,
                    frame_no,
                });
            }
            if self.descriptors[slot].dirty {
                file.write_page(&self.pool[slot].borrow())?;
            }
            self.page_table
                .remove(file.file_id(), self.descriptors[slot].page_no);
            self.descriptors[slot].clear();
        }
        Ok(())
    }

    /// Drops the resident copy of the page without writing it back, then
    /// deletes the page on the file. A page that was never read needs no
    /// eviction.
    pub fn dispose_page(&mut self, file: &DbFile, page_no: PageId) -> Result<(), BufferError> {
        if let Some(frame_no) = self.page_table.remove(file.file_id(), page_no) {
            debug!(
                "discarding frame {} holding page {} of {}",
                frame_no,
                page_no,
                file.filename()
            );
            self.descriptors[frame_no as usize].clear();
        }
        file.delete_page(page_no)?;
        Ok(())
    }

    /// Prints every frame descriptor and the number of valid frames.
    pub fn print_self(&self) {
        let mut valid_frames = 0;
        for desc in &self.descriptors {
            println!("{desc}");
            if desc.valid {
                valid_frames += 1;
            }
        }
        println!("total number of valid frames: {valid_frames}");
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    /// Pin count of the page if it is resident.
    pub fn pin_count(&self, file: &DbFile, page_no: PageId) -> Option<u32> {
        let frame_no = self.page_table.lookup(file.file_id(), page_no)?;
        Some(self.descriptors[frame_no as usize].pin_count)
    }

    pub(crate) fn descriptor(&self, frame_no: FrameId) -> &FrameDesc {
        &self.descriptors[frame_no as usize]
    }

    pub(crate) fn page_table(&self) -> &PageTable {
        &self.page_table
    }
}

impl Drop for BufferPoolManager {
    /// Writes back whatever is still dirty. Failures are logged; there is
    /// nobody left to propagate them to.
    fn drop(&mut self) {
        for slot in 0..self.descriptors.len() {
            let desc = &self.descriptors[slot];
            if !desc.valid || !desc.dirty {
                continue;
            }
            if desc.pin_count > 0 {
                warn!(
                    "page {} still pinned {} times while its pool is dropped",
                    desc.page_no, desc.pin_count
                );
            }
            if let Some(file) = &desc.file {
                if let Err(err) = file.write_page(&self.pool[slot].borrow()) {
                    warn!(
                        "failed to write back page {} of {}: {}",
                        desc.page_no,
                        file.filename(),
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, DbFile) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let file = DbFile::create(dir.path().join("clock.db")).unwrap();
        (dir, file)
    }

    #[test]
    fn hand_starts_before_frame_zero() {
        let mut bpm = BufferPoolManager::new(5);
        assert_eq!(bpm.clock_hand, 4);

        // Invalid frames are free; consecutive allocations walk the table
        // in order and wrap.
        assert_eq!(bpm.alloc_buf().unwrap(), 0);
        assert_eq!(bpm.alloc_buf().unwrap(), 1);
        assert_eq!(bpm.alloc_buf().unwrap(), 2);
    }

    #[test]
    fn sweep_gives_referenced_frames_a_second_chance() {
        let (_dir, file) = scratch();
        for _ in 0..4 {
            file.allocate_page().unwrap();
        }

        let mut bpm = BufferPoolManager::new(3);
        for page_no in 0..3 {
            bpm.read_page(&file, page_no).unwrap();
            bpm.unpin_page(&file, page_no, false).unwrap();
        }
        // Touch page 0 again so frame 0 carries a reference bit.
        bpm.read_page(&file, 0).unwrap();
        bpm.unpin_page(&file, 0, false).unwrap();

        // The sweep clears frame 0's bit and victimizes frame 1 instead.
        bpm.read_page(&file, 3).unwrap();
        assert_eq!(bpm.page_table.lookup(file.file_id(), 3), Some(1));
        assert_eq!(bpm.page_table.lookup(file.file_id(), 0), Some(0));
        assert_eq!(bpm.page_table.lookup(file.file_id(), 1), None);
        assert!(!bpm.descriptors[0].refbit);
    }

    #[test]
    fn exhausted_pool_reports_buffer_full() {
        let (_dir, file) = scratch();
        for _ in 0..2 {
            file.allocate_page().unwrap();
        }

        let mut bpm = BufferPoolManager::new(1);
        let _pinned = bpm.read_page(&file, 0).unwrap();
        assert!(matches!(
            bpm.read_page(&file, 1),
            Err(BufferError::BufferFull { num_frames: 1 })
        ));
    }
}
