use crate::{CtlutilsError, CtlutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The magic number every "new ASCII" header starts with.
pub const MAGIC: &str = "070701";

/// The fixed length of a header, excluding the variable length name.
pub const HEADER_LEN: usize = 110;

/// Headers and payloads end on this boundary relative to the start of the stream.
pub const ALIGNMENT: u64 = 4;

/// The conventional name of the end-of-archive entry.
pub const TRAILER_NAME: &str = "TRAILER!!!";

/// The name of the synthetic entry some producers emit for the archive root.
pub const CURRENT_DIR_NAME: &str = ".";

/// The largest name field accepted, terminating NUL included.
pub const MAX_NAME_SIZE: usize = 4096;

/// Mask for the permission bits of the mode field.
const PERMISSION_MASK: u32 = 0o7777;

/// Field offsets. Every field is 8 hexadecimal digits wide.
const FIELD_WIDTH: usize = 8;
const INO_OFFSET: usize = 6;
const MODE_OFFSET: usize = 14;
const UID_OFFSET: usize = 22;
const GID_OFFSET: usize = 30;
const NLINK_OFFSET: usize = 38;
const MTIME_OFFSET: usize = 46;
const FILESIZE_OFFSET: usize = 54;
const DEV_MAJOR_OFFSET: usize = 62;
const DEV_MINOR_OFFSET: usize = 70;
const RDEV_MAJOR_OFFSET: usize = 78;
const RDEV_MINOR_OFFSET: usize = 86;
const NAMESIZE_OFFSET: usize = 94;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of an archive entry, taken from the high bits of the mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A regular file.
    Regular,

    /// A directory.
    Directory,

    /// Anything else (symlinks, devices, fifos, ...), keeping the raw type nibble.
    Other(u32),
}

/// A decoded entry header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// The path of the entry inside the archive.
    pub name: String,

    /// The permission bits.
    pub mode: u32,

    /// The entry type.
    pub entry_type: EntryType,

    /// The inode number. Entries sharing an inode are hard links.
    pub ino: u32,

    /// The owner id.
    pub uid: u32,

    /// The group id.
    pub gid: u32,

    /// The number of links.
    pub nlink: u32,

    /// The modification time in seconds since the epoch.
    pub mtime: u32,

    /// The payload size in bytes.
    pub size: u32,

    /// The major number of the device holding the file.
    pub dev_major: u32,

    /// The minor number of the device holding the file.
    pub dev_minor: u32,

    /// The major number of a device node entry.
    pub rdev_major: u32,

    /// The minor number of a device node entry.
    pub rdev_minor: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EntryType {
    const DIRECTORY_BITS: u32 = 0o04;
    const REGULAR_BITS: u32 = 0o10;

    /// Decodes the type nibble of a mode field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0xf {
            Self::DIRECTORY_BITS => EntryType::Directory,
            Self::REGULAR_BITS => EntryType::Regular,
            other => EntryType::Other(other),
        }
    }

    /// The type nibble stored in the high bits of the mode field.
    pub fn bits(&self) -> u32 {
        match self {
            EntryType::Directory => Self::DIRECTORY_BITS,
            EntryType::Regular => Self::REGULAR_BITS,
            EntryType::Other(bits) => bits & 0xf,
        }
    }
}

impl Header {
    /// A regular file entry with the given payload size.
    pub fn file(name: impl Into<String>, mode: u32, mtime: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            mode: mode & PERMISSION_MASK,
            entry_type: EntryType::Regular,
            ino: 0,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime,
            size,
            dev_major: 0,
            dev_minor: 0,
            rdev_major: 0,
            rdev_minor: 0,
        }
    }

    /// A directory entry.
    pub fn directory(name: impl Into<String>, mode: u32, mtime: u32) -> Self {
        Self {
            entry_type: EntryType::Directory,
            nlink: 2,
            ..Self::file(name, mode, mtime, 0)
        }
    }

    /// The end-of-archive sentinel.
    pub fn trailer() -> Self {
        Self::file(TRAILER_NAME, 0, 0, 0)
    }

    /// Whether this entry marks the end of the archive.
    pub fn is_trailer(&self) -> bool {
        self.name == TRAILER_NAME
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// The full mode field, type nibble included.
    pub fn raw_mode(&self) -> u32 {
        (self.entry_type.bits() << 12) | (self.mode & PERMISSION_MASK)
    }

    /// The size of the name field on the wire, terminating NUL included.
    pub fn name_size(&self) -> usize {
        self.name.len() + 1
    }

    /// Encodes the fixed-size part of the header.
    pub(crate) fn encode(&self) -> String {
        format!(
            "{}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
            MAGIC,
            self.ino,
            self.raw_mode(),
            self.uid,
            self.gid,
            self.nlink,
            self.mtime,
            self.size,
            self.dev_major,
            self.dev_minor,
            self.rdev_major,
            self.rdev_minor,
            self.name_size(),
            0,
        )
    }

    /// Decodes the fixed-size part of a header.
    ///
    /// Returns the header with an empty name, plus the size of the name field that follows.
    pub(crate) fn decode(raw: &[u8; HEADER_LEN]) -> CtlutilsResult<(Self, usize)> {
        if !raw.starts_with(MAGIC.as_bytes()) {
            return Err(CtlutilsError::InvalidHeader);
        }

        let mode = parse_field(raw, "mode", MODE_OFFSET)?;
        let name_size = parse_field(raw, "namesize", NAMESIZE_OFFSET)? as usize;

        let header = Self {
            name: String::new(),
            mode: mode & PERMISSION_MASK,
            entry_type: EntryType::from_bits(mode >> 12),
            ino: parse_field(raw, "ino", INO_OFFSET)?,
            uid: parse_field(raw, "uid", UID_OFFSET)?,
            gid: parse_field(raw, "gid", GID_OFFSET)?,
            nlink: parse_field(raw, "nlink", NLINK_OFFSET)?,
            mtime: parse_field(raw, "mtime", MTIME_OFFSET)?,
            size: parse_field(raw, "filesize", FILESIZE_OFFSET)?,
            dev_major: parse_field(raw, "devmajor", DEV_MAJOR_OFFSET)?,
            dev_minor: parse_field(raw, "devminor", DEV_MINOR_OFFSET)?,
            rdev_major: parse_field(raw, "rdevmajor", RDEV_MAJOR_OFFSET)?,
            rdev_minor: parse_field(raw, "rdevminor", RDEV_MINOR_OFFSET)?,
        };

        Ok((header, name_size))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn parse_field(raw: &[u8], field: &'static str, offset: usize) -> CtlutilsResult<u32> {
    let bytes = &raw[offset..offset + FIELD_WIDTH];
    let invalid = || CtlutilsError::HeaderField {
        field,
        value: String::from_utf8_lossy(bytes).into_owned(),
    };

    let text = std::str::from_utf8(bytes).map_err(|_| invalid())?;
    u32::from_str_radix(text, 16).map_err(|_| invalid())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
