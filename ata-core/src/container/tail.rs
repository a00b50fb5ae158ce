use crate::error::{AtaError, Result};
use crate::util::buf::ByteReader;
use std::io::{Read, Seek, SeekFrom, Write};

pub const TAIL_MAGIC: [u8; 4] = *b"ATAE";
/// manifest_offset (8) | manifest_len (8) | completion_flag (1) | magic (4)
pub const TAIL_LEN: u64 = 21;

pub const COMPLETE: u8 = 1;
pub const INCOMPLETE: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trailer {
    pub manifest_offset: u64,
    pub manifest_len: u64,
    pub complete: bool,
}

impl Trailer {
    pub fn encode(&self) -> [u8; TAIL_LEN as usize] {
        let mut out = [0u8; TAIL_LEN as usize];
        out[0..8].copy_from_slice(&self.manifest_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.manifest_len.to_le_bytes());
        out[16] = if self.complete { COMPLETE } else { INCOMPLETE };
        out[17..21].copy_from_slice(&TAIL_MAGIC);
        out
    }

    pub fn write_to<W: Write>(self, mut w: W) -> std::io::Result<()> {
        w.write_all(&self.encode())
    }

    /// Decode a trailer. A missing magic means the writer never got this far.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes, "trailer");
        let manifest_offset = r.u64_le()?;
        let manifest_len = r.u64_le()?;
        let flag = r.u8()?;
        let magic: [u8; 4] = r.array()?;
        if magic != TAIL_MAGIC {
            return Err(AtaError::IncompleteArchive(
                "trailer missing: archive was not finalized".into(),
            ));
        }
        let complete = match flag {
            COMPLETE => true,
            INCOMPLETE => false,
            other => {
                return Err(AtaError::Format(format!("bad completion flag {other}")));
            }
        };
        Ok(Self {
            manifest_offset,
            manifest_len,
            complete,
        })
    }
}

/// Locate the trailer by reading the last `TAIL_LEN` bytes of the file.
/// Returns the trailer and the total file length.
pub fn read_tail_at_eof<F: Read + Seek>(f: &mut F) -> Result<(Trailer, u64)> {
    let len = f.seek(SeekFrom::End(0))?;
    if len < TAIL_LEN {
        return Err(AtaError::IncompleteArchive("file too small for trailer".into()));
    }
    f.seek(SeekFrom::End(-(TAIL_LEN as i64)))?;
    let mut buf = [0u8; TAIL_LEN as usize];
    f.read_exact(&mut buf)?;
    Ok((Trailer::decode(&buf)?, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn trailer_layout() {
        let t = Trailer {
            manifest_offset: 0x20,
            manifest_len: 5,
            complete: true,
        };
        let b = t.encode();
        assert_eq!(&b[0..8], &0x20u64.to_le_bytes());
        assert_eq!(b[16], COMPLETE);
        assert_eq!(&b[17..], b"ATAE");
        assert_eq!(Trailer::decode(&b).unwrap(), t);
    }

    #[test]
    fn reads_from_end_of_file() {
        let mut data = vec![0xEEu8; 100];
        Trailer {
            manifest_offset: 40,
            manifest_len: 60,
            complete: false,
        }
        .write_to(&mut data)
        .unwrap();
        let (t, len) = read_tail_at_eof(&mut Cursor::new(&data)).unwrap();
        assert_eq!(len, 121);
        assert_eq!(t.manifest_offset, 40);
        assert!(!t.complete);
    }

    #[test]
    fn missing_trailer_is_incomplete() {
        let data = vec![0u8; 64];
        assert!(matches!(
            read_tail_at_eof(&mut Cursor::new(&data)),
            Err(AtaError::IncompleteArchive(_))
        ));
        assert!(matches!(
            read_tail_at_eof(&mut Cursor::new(&data[..3])),
            Err(AtaError::IncompleteArchive(_))
        ));
    }
}
