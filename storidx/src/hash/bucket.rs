//! Fixed-capacity bucket pages for the extendible hash index's page heap
//! (`T.<field>.hash.db`), linked into overflow chains when a page fills up.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use error::Result;
use index_record::{IndexRecord, Key};
use value::FieldFormat;

const PAGE_HEADER_SIZE: usize = 4 + 8; // count:i32, next_overflow:i64
const NO_PAGE: i64 = -1;

#[derive(Debug, Clone)]
pub struct BucketPage {
	pub offset: i64,
	pub entries: Vec<(Key, i32)>,
	pub next_overflow: i64,
}

pub fn page_size(format: &FieldFormat, capacity: usize) -> Result<usize> {
	Ok(PAGE_HEADER_SIZE + capacity * IndexRecord::packed_len(format)?)
}

pub fn build_db(path: &Path) -> Result<()> {
	File::create(path)?;
	Ok(())
}

pub fn open_db(path: &Path) -> Result<File> {
	Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

/// Appends a fresh, empty page and returns its byte offset.
pub fn alloc_page(f: &mut File, format: &FieldFormat, capacity: usize) -> Result<i64> {
	let offset = f.seek(SeekFrom::End(0))?;
	let mut buf = vec![0u8; page_size(format, capacity)?];
	LittleEndian::write_i64(&mut buf[4..12], NO_PAGE);
	f.write_all(&buf)?;
	Ok(offset as i64)
}

pub fn read_page(f: &mut File, offset: i64, format: &FieldFormat, capacity: usize) -> Result<BucketPage> {
	let size = page_size(format, capacity)?;
	f.seek(SeekFrom::Start(offset as u64))?;
	let mut buf = vec![0u8; size];
	f.read_exact(&mut buf)?;

	let count = LittleEndian::read_i32(&buf[0..4]) as usize;
	let next_overflow = LittleEndian::read_i64(&buf[4..12]);

	let entry_len = IndexRecord::packed_len(format)?;
	let mut entries = Vec::with_capacity(count);
	for i in 0..count {
		let start = PAGE_HEADER_SIZE + i * entry_len;
		let rec = IndexRecord::unpack(&buf[start..start + entry_len], format)?;
		entries.push((rec.key, rec.offset));
	}
	Ok(BucketPage { offset, entries, next_overflow })
}

pub fn write_page(f: &mut File, page: &BucketPage, format: &FieldFormat, capacity: usize) -> Result<()> {
	let size = page_size(format, capacity)?;
	let mut buf = vec![0u8; size];
	LittleEndian::write_i32(&mut buf[0..4], page.entries.len() as i32);
	LittleEndian::write_i64(&mut buf[4..12], page.next_overflow);

	let entry_len = IndexRecord::packed_len(format)?;
	for (i, (key, offset)) in page.entries.iter().enumerate() {
		let rec = IndexRecord::new(key.clone(), *offset);
		let packed = rec.pack(format)?;
		let start = PAGE_HEADER_SIZE + i * entry_len;
		buf[start..start + entry_len].copy_from_slice(&packed);
	}

	f.seek(SeekFrom::Start(page.offset as u64))?;
	f.write_all(&buf)?;
	Ok(())
}

pub const NO_OVERFLOW: i64 = NO_PAGE;
