//! The literal package archive format of spec §6.2: magic `"AMPK"`, a
//! version/compression/item-count header, a length-prefixed name/offset/size
//! index table, then concatenated item payloads. This is the wire format the
//! core's asset-loading collaborators agree on; the core itself never reads
//! it directly.

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::util::AssetError;

pub const MAGIC: &[u8; 4] = b"AMPK";
pub const VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    Zlib = 1,
}

impl Compression {
    fn from_byte(b: u8) -> Result<Self, AssetError> {
        match b {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zlib),
            other => Err(AssetError::InvalidPackage(format!("unknown compression algorithm {other}"))),
        }
    }
}

/// One entry of the index table: a name plus `(offset, size)` within the
/// payload region. `offset` is measured from the end of the header (i.e.
/// from the first byte of the payload), matching spec §6.2.
#[derive(Debug, Clone)]
pub struct ItemEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// In-memory item the writer packs; `body` is stored uncompressed and is
/// compressed once, at write time, if the package's compression mode asks
/// for it.
pub struct Item {
    pub name: String,
    pub body: Vec<u8>,
}

/// Builds a package file byte-for-byte per spec §6.2.
pub struct PackageWriter {
    compression: Compression,
    items: Vec<Item>,
}

impl PackageWriter {
    pub fn new(compression: Compression) -> Self {
        Self { compression, items: Vec::new() }
    }

    pub fn add_item(&mut self, name: impl Into<String>, body: Vec<u8>) -> &mut Self {
        self.items.push(Item { name: name.into(), body });
        self
    }

    /// Serializes the header, index table, and payload into `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), AssetError> {
        let bodies: Vec<Vec<u8>> = self
            .items
            .iter()
            .map(|item| compress(self.compression, &item.body))
            .collect::<Result<_, _>>()?;

        let mut index = Vec::new();
        let mut offset = 0u64;
        for (item, body) in self.items.iter().zip(&bodies) {
            write_name(&mut index, &item.name)?;
            index.extend_from_slice(&offset.to_le_bytes());
            index.extend_from_slice(&(body.len() as u64).to_le_bytes());
            offset += body.len() as u64;
        }

        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.push(self.compression as u8);
        out.extend_from_slice(&(self.items.len() as u64).to_le_bytes());
        out.extend_from_slice(&index);
        for body in &bodies {
            out.extend_from_slice(body);
        }
        Ok(())
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        File::create(path)?.write_all(&buf)?;
        Ok(())
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), AssetError> {
    let bytes = name.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(AssetError::InvalidPackage(format!("item name too long: {name}")));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn compress(mode: Compression, body: &[u8]) -> Result<Vec<u8>, AssetError> {
    match mode {
        Compression::None => Ok(body.to_vec()),
        Compression::Zlib => {
            use flate2::write::ZlibEncoder;
            use flate2::Compression as Level;
            let mut enc = ZlibEncoder::new(Vec::new(), Level::default());
            enc.write_all(body)?;
            Ok(enc.finish()?)
        }
    }
}

fn decompress(mode: Compression, body: &[u8]) -> Result<Vec<u8>, AssetError> {
    match mode {
        Compression::None => Ok(body.to_vec()),
        Compression::Zlib => {
            use flate2::read::ZlibDecoder;
            let mut dec = ZlibDecoder::new(body);
            let mut out = Vec::new();
            dec.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

enum Backing {
    Mmap(Mmap),
    Bytes(Vec<u8>),
}

impl std::ops::Deref for Backing {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mmap(m) => m,
            Backing::Bytes(b) => b,
        }
    }
}

/// Opens a package file (or an in-memory byte slice) and parses its header
/// and index table. Item bodies are read and decompressed on demand.
pub struct PackageReader {
    data: Backing,
    compression: Compression,
    payload_offset: u64,
    entries: std::collections::HashMap<String, ItemEntry>,
}

impl PackageReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let file = File::open(path)?;
        let backing = match unsafe { Mmap::map(&file) } {
            Ok(m) => Backing::Mmap(m),
            Err(_) => {
                let mut file = file;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Backing::Bytes(buf)
            }
        };
        Self::from_backing(backing)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AssetError> {
        Self::from_backing(Backing::Bytes(bytes))
    }

    fn from_backing(data: Backing) -> Result<Self, AssetError> {
        if data.len() < 15 {
            return Err(AssetError::InvalidPackage("file shorter than header".into()));
        }
        if &data[0..4] != MAGIC {
            return Err(AssetError::InvalidPackage("bad magic".into()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(AssetError::InvalidPackage(format!("unsupported package version {version}")));
        }
        let compression = Compression::from_byte(data[6])?;
        let item_count = u64::from_le_bytes(data[7..15].try_into().unwrap());

        let mut cursor = 15usize;
        let mut entries = std::collections::HashMap::with_capacity(item_count as usize);
        for _ in 0..item_count {
            if cursor + 2 > data.len() {
                return Err(AssetError::InvalidPackage("truncated index: name length".into()));
            }
            let name_len = u16::from_le_bytes([data[cursor], data[cursor + 1]]) as usize;
            cursor += 2;
            if cursor + name_len + 16 > data.len() {
                return Err(AssetError::InvalidPackage("truncated index entry".into()));
            }
            let name = std::str::from_utf8(&data[cursor..cursor + name_len])
                .map_err(|_| AssetError::InvalidPackage("item name is not valid UTF-8".into()))?
                .to_string();
            cursor += name_len;
            let offset = u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            let size = u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            entries.insert(name.clone(), ItemEntry { name, offset, size });
        }
        let payload_offset = cursor as u64;

        for entry in entries.values() {
            let end = payload_offset
                .checked_add(entry.offset)
                .and_then(|o| o.checked_add(entry.size))
                .ok_or_else(|| AssetError::InvalidPackage(format!("offset overflow for {}", entry.name)))?;
            if end > data.len() as u64 {
                return Err(AssetError::InvalidPackage(format!("item out of bounds: {}", entry.name)));
            }
        }

        Ok(Self { data, compression, payload_offset, entries })
    }

    pub fn list_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entry(&self, name: &str) -> Option<&ItemEntry> {
        self.entries.get(name)
    }

    /// Reads and decompresses one item's body.
    pub fn read_asset_bytes(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        let raw = self.read_raw(name)?;
        decompress(self.compression, raw)
    }

    /// Zero-copy for uncompressed packages; falls back to an owned,
    /// decompressed buffer when the package is zlib-compressed.
    pub fn read_asset_bytes_cow(&self, name: &str) -> Result<Cow<'_, [u8]>, AssetError> {
        let raw = self.read_raw(name)?;
        match self.compression {
            Compression::None => Ok(Cow::Borrowed(raw)),
            Compression::Zlib => Ok(Cow::Owned(decompress(self.compression, raw)?)),
        }
    }

    fn read_raw(&self, name: &str) -> Result<&[u8], AssetError> {
        let entry = self.entries.get(name).ok_or(AssetError::NotFound)?;
        let start = (self.payload_offset + entry.offset) as usize;
        let end = start + entry.size as usize;
        Ok(&self.data[start..end])
    }
}
