//! Append-only length-prefixed blob sidecar with logical delete, mirroring
//! `storage/TextFile.py`. Used both for `TEXT` fields (`T.<field>.text`) and
//! for `SOUND` fields' blob/histogram pair (`T.<field>.sound`, `T.<field>.hist`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use error::Result;

const LEN_PREFIX_SIZE: usize = 4;
const DELETED: i32 = -1;

/// A single sidecar file. Every operation opens and closes the file handle,
/// per the crate's "no long-lived handles" file-ownership model.
pub struct TextSidecar {
	path: PathBuf,
}

impl TextSidecar {
	/// Creates an empty sidecar file if one doesn't already exist.
	pub fn build(path: &Path) -> Result<()> {
		if !path.exists() {
			File::create(path)?;
		}
		Ok(())
	}

	pub fn open(path: &Path) -> TextSidecar {
		TextSidecar { path: path.to_owned() }
	}

	/// Appends `bytes`, returning the offset at which it was written.
	pub fn insert(&self, bytes: &[u8]) -> Result<i64> {
		let mut f = OpenOptions::new().append(true).open(&self.path)?;
		let offset = f.seek(SeekFrom::End(0))?;
		let mut header = [0u8; LEN_PREFIX_SIZE];
		LittleEndian::write_i32(&mut header, bytes.len() as i32);
		f.write_all(&header)?;
		f.write_all(bytes)?;
		Ok(offset as i64)
	}

	/// Marks the blob at `offset` as logically deleted.
	pub fn delete(&self, offset: i64) -> Result<()> {
		let mut f = OpenOptions::new().write(true).open(&self.path)?;
		f.seek(SeekFrom::Start(offset as u64))?;
		let mut header = [0u8; LEN_PREFIX_SIZE];
		LittleEndian::write_i32(&mut header, DELETED);
		f.write_all(&header)?;
		Ok(())
	}

	/// Reads the blob at `offset`, or `None` if it was logically deleted.
	pub fn read(&self, offset: i64) -> Result<Option<Vec<u8>>> {
		let mut f = File::open(&self.path)?;
		f.seek(SeekFrom::Start(offset as u64))?;
		let mut header = [0u8; LEN_PREFIX_SIZE];
		f.read_exact(&mut header)?;
		let len = LittleEndian::read_i32(&header);
		if len == DELETED {
			return Ok(None);
		}
		let mut content = vec![0u8; len as usize];
		f.read_exact(&mut content)?;
		Ok(Some(content))
	}

	/// Convenience wrapper reading and decoding a utf-8 text blob.
	pub fn read_text(&self, offset: i64) -> Result<Option<String>> {
		Ok(self.read(offset)?.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn insert_read_delete_roundtrip() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("widgets.notes.text");
		TextSidecar::build(&path).unwrap();
		let sidecar = TextSidecar::open(&path);

		let off1 = sidecar.insert(b"hello world").unwrap();
		let off2 = sidecar.insert(b"goodbye world").unwrap();

		assert_eq!(sidecar.read_text(off1).unwrap().as_deref(), Some("hello world"));
		assert_eq!(sidecar.read_text(off2).unwrap().as_deref(), Some("goodbye world"));

		sidecar.delete(off1).unwrap();
		assert_eq!(sidecar.read_text(off1).unwrap(), None);
		assert_eq!(sidecar.read_text(off2).unwrap().as_deref(), Some("goodbye world"));
	}

	#[test]
	fn offsets_stay_stable_across_deletes() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.f.text");
		TextSidecar::build(&path).unwrap();
		let sidecar = TextSidecar::open(&path);

		let off1 = sidecar.insert(b"a").unwrap();
		sidecar.delete(off1).unwrap();
		let off2 = sidecar.insert(b"b").unwrap();

		assert_ne!(off1, off2);
		assert_eq!(sidecar.read_text(off1).unwrap(), None);
		assert_eq!(sidecar.read_text(off2).unwrap().as_deref(), Some("b"));
	}
}
