//! Streaming codec for the "new ASCII" (`070701`) cpio archive format.
//!
//! The format is a sequence of entries, each a 110 byte hexadecimal header, a NUL terminated
//! name and a payload. Every header and every payload ends on a 4-byte boundary relative to
//! the start of the stream, and the archive is closed by an empty entry named
//! [`TRAILER_NAME`]. Directories are plain entries: nothing is created implicitly, so a
//! directory must be written before anything nested beneath it.

mod header;
mod reader;
mod writer;

use std::io::{self, Read, Write};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use header::*;
pub use reader::*;
pub use writer::*;

use crate::CtlutilsResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Transfers every entry from `src` to `dst` unchanged until the trailer is observed.
///
/// The synthetic [`CURRENT_DIR_NAME`] directory entry is dropped. The trailer itself is not
/// copied; it is written by [`Writer::finish`]. Returns the number of entries copied.
pub fn copy<W: Write, R: Read>(dst: &mut Writer<W>, src: &mut Reader<R>) -> CtlutilsResult<u64> {
    let mut copied = 0;
    loop {
        let header = src.next()?;
        if header.is_trailer() {
            break;
        }

        if header.is_dir() && header.name == CURRENT_DIR_NAME {
            continue;
        }

        dst.write_header(&header)?;
        io::copy(src, dst)?;
        copied += 1;
    }

    Ok(copied)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::CtlutilsError;

    fn encode(entries: &[(Header, Vec<u8>)]) -> Vec<u8> {
        let mut writer = Writer::new(Vec::new());
        for (header, payload) in entries {
            writer.write_header(header).unwrap();
            writer.write_all(payload).unwrap();
        }
        writer.finish().unwrap()
    }

    fn decode(bytes: &[u8]) -> Vec<(Header, Vec<u8>)> {
        let mut reader = Reader::new(Cursor::new(bytes));
        let mut entries = Vec::new();
        loop {
            let header = reader.next().unwrap();
            if header.is_trailer() {
                break;
            }
            let mut payload = Vec::new();
            reader.read_to_end(&mut payload).unwrap();
            entries.push((header, payload));
        }
        entries
    }

    fn file(name: &str, payload: &[u8]) -> (Header, Vec<u8>) {
        (
            Header::file(name, 0o644, 1_700_000_000, payload.len() as u32),
            payload.to_vec(),
        )
    }

    /// Hand-builds a header whose name field is exactly `name_field`.
    fn raw_entry(name_field: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut header = Header::file("", 0o644, 0, payload.len() as u32);
        header.name = "x".repeat(name_field.len() - 1);
        let mut raw = header.encode().into_bytes();
        raw.extend_from_slice(name_field);
        while raw.len() % 4 != 0 {
            raw.push(0);
        }
        raw.extend_from_slice(payload);
        while raw.len() % 4 != 0 {
            raw.push(0);
        }
        raw
    }

    #[test]
    fn test_cpio_roundtrip_preserves_entries() {
        let entries = vec![
            (Header::directory("usr", 0o755, 1_700_000_000), Vec::new()),
            (Header::directory("usr/share", 0o755, 1_700_000_000), Vec::new()),
            file("usr/share/motd", b"welcome\n"),
            file("usr/share/empty", b""),
            (
                Header {
                    entry_type: EntryType::Other(0o12),
                    ..Header::file("usr/share/link", 0o777, 0, 4)
                },
                b"motd".to_vec(),
            ),
        ];

        let decoded = decode(&encode(&entries));

        assert_eq!(decoded.len(), entries.len());
        for ((expected, expected_payload), (actual, actual_payload)) in
            entries.iter().zip(decoded.iter())
        {
            assert_eq!(actual.name, expected.name);
            assert_eq!(actual.mode, expected.mode);
            assert_eq!(actual.entry_type, expected.entry_type);
            assert_eq!(actual.size, expected.size);
            assert_eq!(actual_payload, expected_payload);
        }
    }

    #[test]
    fn test_cpio_alignment_for_every_payload_residue() {
        for size in 0..=5usize {
            let payload = vec![0xab; size];
            let mut writer = Writer::new(Vec::new());

            writer
                .write_header(&Header::file("f", 0o644, 0, size as u32))
                .unwrap();
            assert_eq!(writer.bytes_written() % 4, 0, "header boundary, size {size}");

            writer.write_all(&payload).unwrap();
            writer.write_header(&Header::file("g", 0o644, 0, 0)).unwrap();
            assert_eq!(writer.bytes_written() % 4, 0, "payload boundary, size {size}");

            let bytes = writer.finish().unwrap();
            assert_eq!(bytes.len() % 4, 0, "stream end, size {size}");

            let magic_offsets: Vec<usize> = bytes
                .windows(6)
                .enumerate()
                .filter(|(_, w)| *w == MAGIC.as_bytes())
                .map(|(i, _)| i)
                .collect();
            assert_eq!(magic_offsets.len(), 3);
            assert!(magic_offsets.iter().all(|offset| offset % 4 == 0));

            let decoded = decode(&bytes);
            assert_eq!(decoded[0].1, payload);
            assert_eq!(decoded[1].0.name, "g");
        }
    }

    #[test]
    fn test_cpio_reader_skips_unread_payload() {
        let bytes = encode(&[file("a", b"abcde"), file("b", b"xy")]);
        let mut reader = Reader::new(Cursor::new(bytes));

        assert_eq!(reader.next().unwrap().name, "a");
        let mut partial = [0u8; 2];
        reader.read_exact(&mut partial).unwrap();
        assert_eq!(&partial, b"ab");

        let second = reader.next().unwrap();
        assert_eq!(second.name, "b");
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).unwrap();
        assert_eq!(payload, b"xy");
        assert!(reader.next().unwrap().is_trailer());
    }

    #[test]
    fn test_cpio_reader_fences_payload_to_declared_size() {
        let mut bytes = raw_entry(b"a\0", b"abc");
        bytes.extend_from_slice(b"garbage-after-the-entry");
        let mut reader = Reader::new(Cursor::new(bytes));

        reader.next().unwrap();
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).unwrap();

        assert_eq!(payload, b"abc");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_cpio_reader_drops_last_byte_of_name_field() {
        let mut reader = Reader::new(Cursor::new(raw_entry(b"init\0", b"")));
        assert_eq!(reader.next().unwrap().name, "init");

        // The final byte goes even when it is not a NUL.
        let mut reader = Reader::new(Cursor::new(raw_entry(b"initX", b"")));
        assert_eq!(reader.next().unwrap().name, "init");
    }

    #[test]
    fn test_cpio_reader_rejects_oversized_names() {
        let mut bytes = raw_entry(b"init\0", b"");
        bytes[94..102].copy_from_slice(b"FFFFFFFF");
        let mut reader = Reader::new(Cursor::new(bytes));

        assert!(matches!(
            reader.next(),
            Err(CtlutilsError::HeaderField { field: "namesize", .. })
        ));
    }

    #[test]
    fn test_cpio_reader_rejects_bad_magic() {
        let mut bytes = encode(&[file("a", b"1")]);
        bytes[5] = b'7';
        let mut reader = Reader::new(Cursor::new(bytes));

        assert!(matches!(reader.next(), Err(CtlutilsError::InvalidHeader)));
    }

    #[test]
    fn test_cpio_writer_enforces_declared_size() {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_header(&Header::file("a", 0o644, 0, 2))
            .unwrap();
        assert!(writer.write_all(b"abc").is_err());

        let mut writer = Writer::new(Vec::new());
        writer
            .write_header(&Header::file("a", 0o644, 0, 2))
            .unwrap();
        writer.write_all(b"a").unwrap();
        assert!(matches!(
            writer.write_header(&Header::file("b", 0o644, 0, 0)),
            Err(CtlutilsError::ShortPayload { missing: 1, .. })
        ));
    }

    #[test]
    fn test_cpio_copy_skips_current_dir_entry() {
        let source = encode(&[
            (Header::directory(".", 0o755, 0), Vec::new()),
            (Header::directory("etc", 0o755, 0), Vec::new()),
            file("etc/hostname", b"core-01\n"),
        ]);

        let mut writer = Writer::new(Vec::new());
        writer.write_dir("usr", 0o755, 0).unwrap();
        let mut reader = Reader::new(Cursor::new(source));
        let copied = copy(&mut writer, &mut reader).unwrap();
        let decoded = decode(&writer.finish().unwrap());

        assert_eq!(copied, 2);
        let names: Vec<_> = decoded.iter().map(|(h, _)| h.name.as_str()).collect();
        assert_eq!(names, ["usr", "etc", "etc/hostname"]);
        assert_eq!(decoded[2].1, b"core-01\n");
    }
}
