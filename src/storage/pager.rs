//! Fixed-size paged storage with CRC-validated page I/O over a single file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, StrandError};
use crate::storage::checksum;
use crate::storage::{PageId, PageType, DEFAULT_PAGE_SIZE};

/// Page header size in bytes.
pub const PAGE_HEADER_SIZE: u32 = 24;

/// Header layout (24 bytes, little-endian):
/// `{id:u64, lsn:u64, type:u16, reserved:u16, crc:u32}`.
#[derive(Debug, Clone, Copy, Default)]
struct PageHeader {
    id: PageId,
    lsn: u64,
    page_type: u16,
    reserved: u16,
    crc: u32,
}

impl PageHeader {
    fn to_bytes(self) -> [u8; PAGE_HEADER_SIZE as usize] {
        let mut buf = [0u8; PAGE_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf[16..18].copy_from_slice(&self.page_type.to_le_bytes());
        buf[18..20].copy_from_slice(&self.reserved.to_le_bytes());
        buf[20..24].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            lsn: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            page_type: u16::from_le_bytes(buf[16..18].try_into().unwrap()),
            reserved: u16::from_le_bytes(buf[18..20].try_into().unwrap()),
            crc: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        }
    }
}

/// In-memory page representation. `payload` must be exactly
/// `payload_size` bytes when handed to [`Pager::write`].
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub page_type: PageType,
    pub lsn: u64,
    pub payload: Vec<u8>,
}

/// Paged file manager. Pages live at offset `id * page_size`; the header CRC
/// covers the header with a zeroed CRC field followed by the payload.
pub struct Pager {
    data_path: PathBuf,
    file: File,
    page_size: u32,
    payload_size: u32,
    next_page_id: PageId,
}

impl Pager {
    /// Open or create a page file. Fails if an existing file's size is not a
    /// multiple of `page_size`, or if `page_size` cannot hold the header.
    pub fn open(data_path: &Path, page_size: u32) -> Result<Self> {
        if page_size <= PAGE_HEADER_SIZE {
            return Err(StrandError::InvalidInput(format!(
                "page_size {} too small for {}-byte header",
                page_size, PAGE_HEADER_SIZE
            )));
        }

        if let Some(parent) = data_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(data_path)?;

        let file_size = file.metadata()?.len();
        if file_size % page_size as u64 != 0 {
            return Err(StrandError::Corruption {
                location: data_path.display().to_string(),
                details: format!(
                    "file size {} is not a multiple of page size {}",
                    file_size, page_size
                ),
            });
        }

        Ok(Self {
            data_path: data_path.to_path_buf(),
            file,
            page_size,
            payload_size: page_size - PAGE_HEADER_SIZE,
            next_page_id: file_size / page_size as u64,
        })
    }

    /// Open with the default page size.
    pub fn open_default(data_path: &Path) -> Result<Self> {
        Self::open(data_path, DEFAULT_PAGE_SIZE)
    }

    /// Allocate the next page id and write a zero-filled page of `page_type`.
    pub fn allocate(&mut self, page_type: PageType) -> Result<PageId> {
        let page_id = self.next_page_id;
        self.next_page_id += 1;

        let page = Page {
            id: page_id,
            page_type,
            lsn: 0,
            payload: vec![0u8; self.payload_size as usize],
        };
        self.write(&page)?;
        Ok(page_id)
    }

    /// Write a page at its slot. The payload length must equal
    /// `payload_size` exactly.
    pub fn write(&self, page: &Page) -> Result<()> {
        if page.payload.len() != self.payload_size as usize {
            return Err(StrandError::InvalidInput(format!(
                "page payload must be {} bytes, got {}",
                self.payload_size,
                page.payload.len()
            )));
        }

        let mut header = PageHeader {
            id: page.id,
            lsn: page.lsn,
            page_type: page.page_type as u16,
            reserved: 0,
            crc: 0,
        };
        header.crc = Self::compute_crc(&header, &page.payload);

        let mut buf = Vec::with_capacity(self.page_size as usize);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&page.payload);

        self.file.write_all_at(&buf, self.offset_for(page.id))?;
        Ok(())
    }

    /// Read a page. Returns `None` when the id is past the end of the file,
    /// the read comes up short, or the stored CRC does not match.
    pub fn read(&self, page_id: PageId) -> Option<Page> {
        if page_id >= self.next_page_id {
            return None;
        }

        let mut buf = vec![0u8; self.page_size as usize];
        if self
            .file
            .read_exact_at(&mut buf, self.offset_for(page_id))
            .is_err()
        {
            return None;
        }

        let header = PageHeader::from_bytes(&buf[..PAGE_HEADER_SIZE as usize]);
        let payload = buf[PAGE_HEADER_SIZE as usize..].to_vec();

        let expected = Self::compute_crc(
            &PageHeader {
                crc: 0,
                ..header
            },
            &payload,
        );
        if expected != header.crc {
            tracing::warn!(page_id, "page checksum mismatch, treating as missing");
            return None;
        }

        Some(Page {
            id: header.id,
            page_type: PageType::from(header.page_type),
            lsn: header.lsn,
            payload,
        })
    }

    /// Force buffered writes to durable media.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn page_count(&self) -> PageId {
        self.next_page_id
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn offset_for(&self, page_id: PageId) -> u64 {
        page_id * self.page_size as u64
    }

    fn compute_crc(header: &PageHeader, payload: &[u8]) -> u32 {
        let mut hasher = checksum::Hasher::new();
        hasher.update(&header.to_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}
