//! Sequential index: a sorted main area plus a small unsorted auxiliary
//! area, periodically folded back into the main area, mirroring
//! `indexing/SequentialIndex.py`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use error::Result;
use index_record::{IndexRecord, Key};
use value::FieldFormat;

const METADATA_SIZE: usize = 12; // main_size, aux_size, max_aux_size: i32 x3

/// A sorted-main/unsorted-aux index file over a single field.
pub struct SequentialIndex {
	path: PathBuf,
	format: FieldFormat,
	entry_size: usize,
	main_size: i32,
	aux_size: i32,
	max_aux_size: i32,
}

impl SequentialIndex {
	fn header_bytes(main_size: i32, aux_size: i32, max_aux_size: i32) -> [u8; METADATA_SIZE] {
		let mut buf = [0u8; METADATA_SIZE];
		LittleEndian::write_i32(&mut buf[0..4], main_size);
		LittleEndian::write_i32(&mut buf[4..8], aux_size);
		LittleEndian::write_i32(&mut buf[8..12], max_aux_size);
		buf
	}

	/// Bulk-builds from `entries`, which must already be sorted by key.
	/// `max_aux_size = max(1, floor(log2(main_size)))`, per §4.3.
	pub fn build_index<I: IntoIterator<Item = (Key, i32)>>(path: PathBuf, format: FieldFormat, entries: I) -> Result<SequentialIndex> {
		let entry_size = IndexRecord::packed_len(&format)?;
		let sorted: Vec<(Key, i32)> = {
			let mut v: Vec<(Key, i32)> = entries.into_iter().collect();
			v.sort_by(|a, b| a.0.cmp_key(&b.0));
			v
		};
		let main_size = sorted.len() as i32;
		let max_aux_size = ((main_size.max(1) as f64).log2().floor() as i32).max(1);

		let mut f = File::create(&path)?;
		f.write_all(&SequentialIndex::header_bytes(main_size, 0, max_aux_size))?;
		for (key, offset) in &sorted {
			f.write_all(&IndexRecord::new(key.clone(), *offset).pack(&format)?)?;
		}

		Ok(SequentialIndex {
			path,
			format,
			entry_size,
			main_size,
			aux_size: 0,
			max_aux_size,
		})
	}

	pub fn open(path: PathBuf, format: FieldFormat) -> Result<SequentialIndex> {
		let entry_size = IndexRecord::packed_len(&format)?;
		let mut header = [0u8; METADATA_SIZE];
		File::open(&path)?.read_exact(&mut header)?;
		Ok(SequentialIndex {
			path,
			format,
			entry_size,
			main_size: LittleEndian::read_i32(&header[0..4]),
			aux_size: LittleEndian::read_i32(&header[4..8]),
			max_aux_size: LittleEndian::read_i32(&header[8..12]),
		})
	}

	fn main_offset(&self, pos: i32) -> u64 {
		METADATA_SIZE as u64 + pos as u64 * self.entry_size as u64
	}

	fn aux_offset(&self, pos: i32) -> u64 {
		METADATA_SIZE as u64 + self.main_size as u64 * self.entry_size as u64 + pos as u64 * self.entry_size as u64
	}

	fn read_entry(&self, f: &mut File, byte_offset: u64) -> Result<IndexRecord> {
		f.seek(SeekFrom::Start(byte_offset))?;
		let mut buf = vec![0u8; self.entry_size];
		f.read_exact(&mut buf)?;
		IndexRecord::unpack(&buf, &self.format)
	}

	fn write_entry(&self, f: &mut File, byte_offset: u64, rec: &IndexRecord) -> Result<()> {
		f.seek(SeekFrom::Start(byte_offset))?;
		f.write_all(&rec.pack(&self.format)?)?;
		Ok(())
	}

	fn write_header(&self, f: &mut File) -> Result<()> {
		f.seek(SeekFrom::Start(0))?;
		f.write_all(&SequentialIndex::header_bytes(self.main_size, self.aux_size, self.max_aux_size))?;
		Ok(())
	}

	/// Binary search over the main area for the leftmost entry with this key.
	fn main_lower_bound(&self, f: &mut File, key: &Key) -> Result<i32> {
		let (mut lo, mut hi) = (0i32, self.main_size);
		while lo < hi {
			let mid = lo + (hi - lo) / 2;
			let rec = self.read_entry(f, self.main_offset(mid))?;
			if rec.key.cmp_key(key) == ::std::cmp::Ordering::Less {
				lo = mid + 1;
			} else {
				hi = mid;
			}
		}
		Ok(lo)
	}

	/// All non-deleted offsets stored under `key`, scanning outward from the
	/// binary-search position in the main area and linearly through aux.
	pub fn search(&self, key: &Key) -> Result<Vec<i32>> {
		let mut f = OpenOptions::new().read(true).open(&self.path)?;
		let mut out = Vec::new();

		let mut pos = self.main_lower_bound(&mut f, key)?;
		while pos < self.main_size {
			let rec = self.read_entry(&mut f, self.main_offset(pos))?;
			if rec.key.cmp_key(key) != ::std::cmp::Ordering::Equal {
				break;
			}
			if !rec.is_tombstone(&self.format) {
				out.push(rec.offset);
			}
			pos += 1;
		}

		for i in 0..self.aux_size {
			let rec = self.read_entry(&mut f, self.aux_offset(i))?;
			if rec.key.cmp_key(key) == ::std::cmp::Ordering::Equal && !rec.is_tombstone(&self.format) {
				out.push(rec.offset);
			}
		}
		Ok(out)
	}

	/// All `(key, offset)` pairs with `start <= key <= end`.
	pub fn range_search(&self, start: &Key, end: &Key) -> Result<Vec<(Key, i32)>> {
		let mut f = OpenOptions::new().read(true).open(&self.path)?;
		let mut out = Vec::new();

		let mut pos = self.main_lower_bound(&mut f, start)?;
		while pos < self.main_size {
			let rec = self.read_entry(&mut f, self.main_offset(pos))?;
			if rec.key.cmp_key(end) == ::std::cmp::Ordering::Greater {
				break;
			}
			if !rec.is_tombstone(&self.format) {
				out.push((rec.key, rec.offset));
			}
			pos += 1;
		}

		for i in 0..self.aux_size {
			let rec = self.read_entry(&mut f, self.aux_offset(i))?;
			if rec.key.cmp_key(start) != ::std::cmp::Ordering::Less && rec.key.cmp_key(end) != ::std::cmp::Ordering::Greater && !rec.is_tombstone(&self.format) {
				out.push((rec.key, rec.offset));
			}
		}
		out.sort_by(|a, b| a.0.cmp_key(&b.0));
		Ok(out)
	}

	/// Appends to the aux area, rebuilding when it exceeds `max_aux_size`.
	pub fn insert(&mut self, key: Key, offset: i32) -> Result<()> {
		let mut f = OpenOptions::new().read(true).write(true).open(&self.path)?;
		let rec = IndexRecord::new(key, offset);
		self.write_entry(&mut f, self.aux_offset(self.aux_size), &rec)?;
		self.aux_size += 1;
		self.write_header(&mut f)?;

		if self.aux_size > self.max_aux_size {
			drop(f);
			self.rebuild()?;
		}
		Ok(())
	}

	/// Overwrites the matching `(key, offset)` entry with a tombstone,
	/// searching main then aux.
	pub fn delete(&mut self, key: &Key, offset: i32) -> Result<bool> {
		let mut f = OpenOptions::new().read(true).write(true).open(&self.path)?;

		let mut pos = self.main_lower_bound(&mut f, key)?;
		while pos < self.main_size {
			let byte_off = self.main_offset(pos);
			let rec = self.read_entry(&mut f, byte_off)?;
			if rec.key.cmp_key(key) != ::std::cmp::Ordering::Equal {
				break;
			}
			if rec.offset == offset && !rec.is_tombstone(&self.format) {
				self.write_entry(&mut f, byte_off, &IndexRecord::tombstone(&self.format))?;
				return Ok(true);
			}
			pos += 1;
		}

		for i in 0..self.aux_size {
			let byte_off = self.aux_offset(i);
			let rec = self.read_entry(&mut f, byte_off)?;
			if rec.key.cmp_key(key) == ::std::cmp::Ordering::Equal && rec.offset == offset && !rec.is_tombstone(&self.format) {
				self.write_entry(&mut f, byte_off, &IndexRecord::tombstone(&self.format))?;
				return Ok(true);
			}
		}
		Ok(false)
	}

	/// Merges live main+aux entries into a freshly sorted main area, written
	/// to a temp file and atomically renamed into place (§5).
	pub fn rebuild(&mut self) -> Result<()> {
		let mut f = OpenOptions::new().read(true).open(&self.path)?;
		let mut live = Vec::new();
		for pos in 0..self.main_size {
			let rec = self.read_entry(&mut f, self.main_offset(pos))?;
			if !rec.is_tombstone(&self.format) {
				live.push((rec.key, rec.offset));
			}
		}
		for i in 0..self.aux_size {
			let rec = self.read_entry(&mut f, self.aux_offset(i))?;
			if !rec.is_tombstone(&self.format) {
				live.push((rec.key, rec.offset));
			}
		}
		drop(f);
		live.sort_by(|a, b| a.0.cmp_key(&b.0));

		let tmp_path = tmp_path_for(&self.path);
		let new_main_size = live.len() as i32;
		let new_max_aux = ((new_main_size.max(1) as f64).log2().floor() as i32).max(1);
		{
			let mut tmp = File::create(&tmp_path)?;
			tmp.write_all(&SequentialIndex::header_bytes(new_main_size, 0, new_max_aux))?;
			for (key, offset) in &live {
				tmp.write_all(&IndexRecord::new(key.clone(), *offset).pack(&self.format)?)?;
			}
		}
		::std::fs::rename(&tmp_path, &self.path)?;

		self.main_size = new_main_size;
		self.aux_size = 0;
		self.max_aux_size = new_max_aux;
		Ok(())
	}
}

fn tmp_path_for(path: &Path) -> PathBuf {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(".tmp");
	PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn build_and_search() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.id.seq.idx");
		let entries: Vec<(Key, i32)> = (0..10).map(|i| (Key::Int(i * 10), i)).collect();
		let idx = SequentialIndex::build_index(path, FieldFormat::Int, entries).unwrap();
		assert_eq!(idx.search(&Key::Int(30)).unwrap(), vec![3]);
		assert!(idx.search(&Key::Int(31)).unwrap().is_empty());
	}

	#[test]
	fn insert_triggers_rebuild_on_aux_overflow() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.id.seq.idx");
		let entries: Vec<(Key, i32)> = (0..1024).map(|i| (Key::Int(i), i)).collect();
		let mut idx = SequentialIndex::build_index(path, FieldFormat::Int, entries).unwrap();
		assert_eq!(idx.max_aux_size, 10);

		for i in 0..10 {
			idx.insert(Key::Int(2000 + i), 2000 + i).unwrap();
		}
		assert_eq!(idx.aux_size, 10);
		assert_eq!(idx.main_size, 1024);

		idx.insert(Key::Int(3000), 3000).unwrap();
		assert_eq!(idx.aux_size, 0);
		assert_eq!(idx.main_size, 1035);
		assert_eq!(idx.search(&Key::Int(3000)).unwrap(), vec![3000]);
		assert_eq!(idx.search(&Key::Int(500)).unwrap(), vec![500]);
	}

	#[test]
	fn delete_then_search_empty() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.id.seq.idx");
		let entries: Vec<(Key, i32)> = (0..5).map(|i| (Key::Int(i), i)).collect();
		let mut idx = SequentialIndex::build_index(path, FieldFormat::Int, entries).unwrap();
		assert!(idx.delete(&Key::Int(2), 2).unwrap());
		assert!(idx.search(&Key::Int(2)).unwrap().is_empty());
		assert!(!idx.delete(&Key::Int(2), 2).unwrap());
	}

	#[test]
	fn range_search_spans_main_and_aux() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.id.seq.idx");
		let entries: Vec<(Key, i32)> = (0..20).map(|i| (Key::Int(i * 2), i)).collect();
		let mut idx = SequentialIndex::build_index(path, FieldFormat::Int, entries).unwrap();
		idx.insert(Key::Int(5), 999).unwrap();

		let range = idx.range_search(&Key::Int(0), &Key::Int(6)).unwrap();
		let keys: Vec<i32> = range
			.iter()
			.map(|(k, _)| match k {
				Key::Int(v) => *v,
				_ => unreachable!(),
			})
			.collect();
		assert_eq!(keys, vec![0, 2, 4, 5, 6]);
	}
}
