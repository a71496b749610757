use std::{
    cell::RefCell,
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    rc::Rc,
};

use hashlink::LinkedHashMap;
use log::debug;

use crate::errors::FileError;
use crate::storage::page::{page_constants::PAGE_SIZE, Page, PageId};

pub type FileId = u64;

#[derive(Debug)]
struct FileInner {
    io: File,
    path: PathBuf,
    file_id: FileId,
    // Page number to on-disk offset. Deallocated pages are marked None so
    // their slot can be handed back out by allocate_page.
    pages: LinkedHashMap<PageId, Option<u64>>,
    // Recycled (page number, offset) pairs of deallocated pages.
    free_slots: VecDeque<(PageId, u64)>,
    reads: u64,
    writes: u64,
    allocations: u64,
    deletions: u64,
}

/// Handle to a paged file on disk.
///
/// The handle is cheap to clone; clones share the open descriptor and the
/// page map. Two handles compare equal iff they name the same underlying
/// on-disk file (by inode number).
#[derive(Clone, Debug)]
pub struct DbFile {
    inner: Rc<RefCell<FileInner>>,
}

impl DbFile {
    /// Creates a new paged file. Refuses to overwrite an existing one.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<DbFile, FileError> {
        let path = path.as_ref();
        let io = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => {
                    FileError::AlreadyExists(path.display().to_string())
                }
                _ => FileError::Io(err),
            })?;
        let file_id = io.metadata()?.ino();

        Ok(DbFile {
            inner: Rc::new(RefCell::new(FileInner {
                io,
                path: path.to_path_buf(),
                file_id,
                pages: LinkedHashMap::new(),
                free_slots: VecDeque::new(),
                reads: 0,
                writes: 0,
                allocations: 0,
                deletions: 0,
            })),
        })
    }

    /// Opens an existing paged file, rebuilding the page map from its
    /// length. Knowledge of deallocated slots is not durable, so every page
    /// below the high-water mark comes back as allocated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DbFile, FileError> {
        let path = path.as_ref();
        let io = OpenOptions::new().read(true).write(true).open(path)?;
        let meta = io.metadata()?;
        let num_pages = (meta.len() as usize / PAGE_SIZE) as PageId;

        let mut pages = LinkedHashMap::new();
        for page_no in 0..num_pages {
            pages.insert(page_no, Some(page_no as u64 * PAGE_SIZE as u64));
        }

        Ok(DbFile {
            inner: Rc::new(RefCell::new(FileInner {
                io,
                path: path.to_path_buf(),
                file_id: meta.ino(),
                pages,
                free_slots: VecDeque::new(),
                reads: 0,
                writes: 0,
                allocations: 0,
                deletions: 0,
            })),
        })
    }

    /// Allocates a page, recycling a deallocated slot when one exists. The
    /// returned page is zeroed and carries its freshly assigned number.
    pub fn allocate_page(&self) -> Result<Page, FileError> {
        let mut inner = self.inner.borrow_mut();

        let (page_no, offset) = match inner.free_slots.pop_front() {
            Some((page_no, offset)) => {
                inner.pages.replace(page_no, Some(offset));
                // Scrub the recycled slot so the page reads back zeroed.
                inner.io.seek(SeekFrom::Start(offset))?;
                inner.io.write_all(&[0u8; PAGE_SIZE])?;
                (page_no, offset)
            }
            None => {
                let page_no = inner.pages.len() as PageId;
                let offset = inner.pages.len() as u64 * PAGE_SIZE as u64;
                inner.pages.insert(page_no, Some(offset));
                inner.io.set_len(offset + PAGE_SIZE as u64)?;
                (page_no, offset)
            }
        };

        inner.allocations += 1;
        debug!(
            "allocated page {} of {} at offset {}",
            page_no,
            inner.path.display(),
            offset
        );
        Ok(Page::new(page_no))
    }

    /// Reads the bytes of the indicated page into a fresh page value.
    pub fn read_page(&self, page_no: PageId) -> Result<Page, FileError> {
        let mut inner = self.inner.borrow_mut();
        let offset = Self::offset_of(&inner, page_no)?;

        let mut page = Page::new(page_no);
        inner.io.seek(SeekFrom::Start(offset))?;
        inner.io.read_exact(page.data_mut())?;
        inner.reads += 1;
        Ok(page)
    }

    /// Persists the bytes of `page` to the slot identified by its number.
    pub fn write_page(&self, page: &Page) -> Result<(), FileError> {
        let mut inner = self.inner.borrow_mut();
        let offset = Self::offset_of(&inner, page.page_number())?;

        inner.io.seek(SeekFrom::Start(offset))?;
        inner.io.write_all(page.data())?;
        inner.io.flush()?;
        inner.writes += 1;
        Ok(())
    }

    /// Releases a page number back to the file for later recycling.
    pub fn delete_page(&self, page_no: PageId) -> Result<(), FileError> {
        let mut inner = self.inner.borrow_mut();
        let offset = Self::offset_of(&inner, page_no)?;

        inner.pages.replace(page_no, None);
        inner.free_slots.push_back((page_no, offset));
        inner.deletions += 1;
        debug!("deleted page {} of {}", page_no, inner.path.display());
        Ok(())
    }

    fn offset_of(inner: &FileInner, page_no: PageId) -> Result<u64, FileError> {
        match inner.pages.get(&page_no) {
            Some(Some(offset)) => Ok(*offset),
            Some(None) => Err(FileError::PageDeallocated {
                file: inner.path.display().to_string(),
                page_no,
            }),
            None => Err(FileError::PageNotAllocated {
                file: inner.path.display().to_string(),
                page_no,
            }),
        }
    }

    pub fn filename(&self) -> String {
        self.inner.borrow().path.display().to_string()
    }

    pub fn file_id(&self) -> FileId {
        self.inner.borrow().file_id
    }

    /// Number of currently allocated pages.
    pub fn num_pages(&self) -> usize {
        self.inner
            .borrow()
            .pages
            .values()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn reads(&self) -> u64 {
        self.inner.borrow().reads
    }

    pub fn writes(&self) -> u64 {
        self.inner.borrow().writes
    }

    pub fn allocations(&self) -> u64 {
        self.inner.borrow().allocations
    }

    pub fn deletions(&self) -> u64 {
        self.inner.borrow().deletions
    }
}

impl PartialEq for DbFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_id() == other.file_id()
    }
}

impl Eq for DbFile {}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> (tempfile::TempDir, DbFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = DbFile::create(dir.path().join(name)).unwrap();
        (dir, file)
    }

    #[test]
    fn write_read_round_trip() {
        let (_dir, file) = scratch_file("round_trip.db");

        let mut page = file.allocate_page().unwrap();
        assert_eq!(page.page_number(), 0);
        page.data_mut()[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        file.write_page(&page).unwrap();

        let read_back = file.read_page(0).unwrap();
        assert_eq!(&read_back.data()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(file.writes(), 1);
        assert_eq!(file.reads(), 1);
    }

    #[test]
    fn allocation_recycles_deleted_slots() {
        let (_dir, file) = scratch_file("recycle.db");

        let p0 = file.allocate_page().unwrap();
        let p1 = file.allocate_page().unwrap();
        let p2 = file.allocate_page().unwrap();
        assert_eq!(
            (p0.page_number(), p1.page_number(), p2.page_number()),
            (0, 1, 2)
        );

        let mut dirty = file.read_page(1).unwrap();
        dirty.data_mut().fill(0xFF);
        file.write_page(&dirty).unwrap();

        file.delete_page(1).unwrap();
        assert!(matches!(
            file.read_page(1),
            Err(FileError::PageDeallocated { page_no: 1, .. })
        ));

        // The freed slot comes back with the same number and zeroed bytes.
        let recycled = file.allocate_page().unwrap();
        assert_eq!(recycled.page_number(), 1);
        assert!(file.read_page(1).unwrap().data().iter().all(|b| *b == 0));
        assert_eq!(file.num_pages(), 3);
        assert_eq!(file.deletions(), 1);
    }

    #[test]
    fn read_of_unallocated_page_fails() {
        let (_dir, file) = scratch_file("unallocated.db");
        assert!(matches!(
            file.read_page(3),
            Err(FileError::PageNotAllocated { page_no: 3, .. })
        ));
    }

    #[test]
    fn create_refuses_existing_file() {
        let (dir, _file) = scratch_file("exists.db");
        assert!(matches!(
            DbFile::create(dir.path().join("exists.db")),
            Err(FileError::AlreadyExists(_))
        ));
    }

    #[test]
    fn reopen_recovers_pages_from_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        {
            let file = DbFile::create(&path).unwrap();
            let mut page = file.allocate_page().unwrap();
            file.allocate_page().unwrap();
            page.data_mut()[0] = 9;
            file.write_page(&page).unwrap();
        }

        let reopened = DbFile::open(&path).unwrap();
        assert_eq!(reopened.num_pages(), 2);
        assert_eq!(reopened.read_page(0).unwrap().data()[0], 9);
    }

    #[test]
    fn handles_compare_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let file = DbFile::create(dir.path().join("a.db")).unwrap();
        let other = DbFile::create(dir.path().join("b.db")).unwrap();

        assert_eq!(file, file.clone());
        assert_ne!(file, other);
    }
}
