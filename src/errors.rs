use std::io;

use crate::buffer::frame::FrameId;
use crate::storage::page::PageId;

/// Errors raised by the paged file layer.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("file {0} already exists")]
    AlreadyExists(String),
    #[error("page {page_no} of {file} has not been allocated")]
    PageNotAllocated { file: String, page_no: PageId },
    #[error("page {page_no} of {file} has been deallocated")]
    PageDeallocated { file: String, page_no: PageId },
}

/// Errors raised by the buffer pool manager.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer pool exceeded, all {num_frames} frames are pinned")]
    BufferFull { num_frames: u32 },
    #[error("page {page_no} of {file} in frame {frame_no} is not pinned")]
    PageNotPinned {
        file: String,
        page_no: PageId,
        frame_no: FrameId,
    },
    #[error("page {page_no} of {file} in frame {frame_no} is still pinned")]
    PagePinned {
        file: String,
        page_no: PageId,
        frame_no: FrameId,
    },
    #[error("frame {frame_no} is tagged with {file} but holds no valid page")]
    BadBuffer { file: String, frame_no: FrameId },
    #[error(transparent)]
    File(#[from] FileError),
}
