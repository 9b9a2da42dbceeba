//! On-disk persistence for segments and link content.
//!
//! The store's directory holds a single segment image plus one content file
//! per distinct link digest:
//!
//! ```text
//! <root>/segments.img      length-prefixed big-endian element records
//! <root>/contents/<hex>    raw link content, named by SHA-256 digest
//! ```
//!
//! The image starts with a magic/version header and a CRC-32 of the body,
//! and is written to a temp file then renamed, so a torn flush never
//! replaces a good image. The checksum-to-addresses index is in-memory
//! only; it is rebuilt from link elements when an image is loaded.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::context::MemoryContext;
use crate::element::{Element, ELEMENT_LEN};
use crate::error::{Result, StoreError};
use crate::segment::Segment;
use crate::storage::table::SegmentTable;
use crate::types::{Addr, Checksum};

const IMAGE_MAGIC: [u8; 4] = *b"SGIM";
const IMAGE_VERSION: u16 = 1;
const IMAGE_HDR_LEN: usize = 4 + 2 + 4 + 4; // magic + version + segment count + crc32

pub struct FileStorage {
    root: PathBuf,
    index: Mutex<HashMap<Checksum, Vec<Addr>>>,
}

impl FileStorage {
    /// Opens (or creates) the storage directory. `clear` wipes any
    /// persisted image and contents.
    pub fn initialize(path: &Path, clear: bool) -> Result<Self> {
        fs::create_dir_all(path)?;
        let storage = Self {
            root: path.to_path_buf(),
            index: Mutex::new(HashMap::new()),
        };
        if clear {
            let image = storage.image_path();
            if image.exists() {
                fs::remove_file(&image)?;
            }
            let contents = storage.contents_dir();
            if contents.exists() {
                fs::remove_dir_all(&contents)?;
            }
            info!(path = %path.display(), "fs.clear");
        }
        fs::create_dir_all(storage.contents_dir())?;
        Ok(storage)
    }

    fn image_path(&self) -> PathBuf {
        self.root.join("segments.img")
    }

    fn contents_dir(&self) -> PathBuf {
        self.root.join("contents")
    }

    fn content_path(&self, sum: &Checksum) -> PathBuf {
        self.contents_dir().join(sum.to_hex())
    }

    /// Reads the segment image, rebuilding segments and the content index.
    ///
    /// A missing image yields an empty store.
    pub fn load_segments(&self) -> Result<Vec<Arc<Segment>>> {
        let path = self.image_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if bytes.len() < IMAGE_HDR_LEN {
            return Err(StoreError::Corruption("segment image truncated"));
        }
        if bytes[0..4] != IMAGE_MAGIC {
            return Err(StoreError::Corruption("segment image bad magic"));
        }
        let version = u16::from_be_bytes(bytes[4..6].try_into().unwrap());
        if version != IMAGE_VERSION {
            return Err(StoreError::Corruption("segment image unknown version"));
        }
        let seg_count = u32::from_be_bytes(bytes[6..10].try_into().unwrap());
        let crc = u32::from_be_bytes(bytes[10..14].try_into().unwrap());
        let body = &bytes[IMAGE_HDR_LEN..];
        if crc32fast::hash(body) != crc {
            return Err(StoreError::Corruption("segment image checksum mismatch"));
        }

        let mut segments = Vec::with_capacity(seg_count as usize);
        let mut index = self.index.lock();
        let mut at = 0usize;
        for _ in 0..seg_count {
            if body.len() < at + 6 {
                return Err(StoreError::Corruption("segment image truncated"));
            }
            let num = u16::from_be_bytes(body[at..at + 2].try_into().unwrap());
            let live = u32::from_be_bytes(body[at + 2..at + 6].try_into().unwrap()) as usize;
            at += 6;
            let mut elements = Vec::with_capacity(live);
            for _ in 0..live {
                if body.len() < at + 2 + ELEMENT_LEN {
                    return Err(StoreError::Corruption("segment image truncated"));
                }
                let offset = u16::from_be_bytes(body[at..at + 2].try_into().unwrap());
                let el = Element::decode(&body[at + 2..at + 2 + ELEMENT_LEN])?;
                at += 2 + ELEMENT_LEN;
                if let Some(sum) = el.checksum() {
                    if *sum != Checksum::default() {
                        index.entry(*sum).or_default().push(Addr::new(num, offset));
                    }
                }
                elements.push((offset, el));
            }
            segments.push(Arc::new(Segment::from_elements(num, elements)));
        }
        info!(segments = segments.len(), links = index.len(), "fs.load");
        Ok(segments)
    }

    /// Writes every live element to the segment image.
    pub fn flush_segments(&self, ctx: &MemoryContext, table: &SegmentTable) -> Result<()> {
        let mut body = Vec::new();
        let mut seg_count = 0u32;
        for seg in table.iter() {
            let live = seg.collect_live(ctx);
            body.extend_from_slice(&seg.num().to_be_bytes());
            body.extend_from_slice(&(live.len() as u32).to_be_bytes());
            for (offset, el) in live {
                body.extend_from_slice(&offset.to_be_bytes());
                body.extend_from_slice(&el.encode());
            }
            seg_count += 1;
        }

        let mut out = Vec::with_capacity(IMAGE_HDR_LEN + body.len());
        out.extend_from_slice(&IMAGE_MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_be_bytes());
        out.extend_from_slice(&seg_count.to_be_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
        out.extend_from_slice(&body);

        let tmp = self.image_path().with_extension("img.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&out)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.image_path())?;
        info!(segments = seg_count, bytes = out.len(), "fs.flush");
        Ok(())
    }

    /// Stores link content under its digest and records the address.
    pub fn write_content(&self, addr: Addr, sum: &Checksum, data: &[u8]) -> Result<()> {
        let path = self.content_path(sum);
        if !path.exists() {
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, data)?;
            fs::rename(&tmp, &path)?;
        }
        let mut index = self.index.lock();
        let addrs = index.entry(*sum).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
        debug!(%addr, digest = %sum.to_hex(), len = data.len(), "fs.write_content");
        Ok(())
    }

    /// Reads the content stream stored under `sum`.
    pub fn read_content(&self, sum: &Checksum) -> Result<Vec<u8>> {
        match fs::read(self.content_path(sum)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound("link content"))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All link addresses whose content digests to `sum`.
    pub fn find_links(&self, sum: &Checksum) -> Result<Vec<Addr>> {
        Ok(self.index.lock().get(sum).cloned().unwrap_or_default())
    }

    /// Forgets `addr` as a holder of `sum`; deletes the content file when
    /// the last holder is gone.
    pub fn remove_content_ref(&self, addr: Addr, sum: &Checksum) {
        let mut index = self.index.lock();
        let Some(addrs) = index.get_mut(sum) else { return };
        addrs.retain(|a| *a != addr);
        if addrs.is_empty() {
            index.remove(sum);
            if let Err(err) = fs::remove_file(self.content_path(sum)) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(digest = %sum.to_hex(), %err, "fs.remove_content");
                }
            }
        }
    }
}
