//! Fixed-slot heap file with free-list reuse and tombstone semantics,
//! mirroring `storage/HeapFile.py`. Every operation opens the `.dat` file
//! fresh and closes it before returning, per the crate's file-ownership
//! model (§5): no long-lived handles, no process-wide cache.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use error::{ErrorKind, Result};
use record::Record;
use schema::{Field, Schema};
use text_sidecar::TextSidecar;
use value::{FieldFormat, Value};

const METADATA_SIZE: usize = 8; // heap_size:i32, free_head:i32
const PTR_SIZE: usize = 4; // next_free:i32
const FREE_HEAD_NONE: i32 = -1;

/// Locates the family of files that make up one table on disk.
#[derive(Debug, Clone)]
pub struct TablePaths {
	base: PathBuf,
}

impl TablePaths {
	pub fn new<P: Into<PathBuf>>(base: P) -> TablePaths {
		TablePaths { base: base.into() }
	}

	pub fn base(&self) -> &Path {
		&self.base
	}

	pub fn data(&self) -> PathBuf {
		self.with_ext("dat")
	}

	pub fn schema(&self) -> PathBuf {
		self.with_ext("schema.json")
	}

	pub fn text_sidecar(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "text")
	}

	pub fn sound_blob(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "sound")
	}

	pub fn sound_hist(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "hist")
	}

	pub fn seq_idx(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "seq.idx")
	}

	pub fn btree_idx(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "btree.idx")
	}

	/// Sidecar holding the tree's fixed `order`, since the node-paged `.idx`
	/// file itself has no room to carry it (§3.7's node layout is fixed per
	/// tree but not self-describing).
	pub fn btree_meta(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "btree.meta")
	}

	pub fn hash_marker(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "hash.idx")
	}

	pub fn hash_db(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "hash.db")
	}

	pub fn hash_tree(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "hash.tree")
	}

	pub fn rtree_idx(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "rtree.idx")
	}

	pub fn rtree_dat(&self, field: &str) -> PathBuf {
		self.with_field_ext(field, "rtree.dat")
	}

	fn with_ext(&self, ext: &str) -> PathBuf {
		let mut s = self.base.clone().into_os_string();
		s.push(".");
		s.push(ext);
		PathBuf::from(s)
	}

	fn with_field_ext(&self, field: &str, ext: &str) -> PathBuf {
		let mut s = self.base.clone().into_os_string();
		s.push(".");
		s.push(field);
		s.push(".");
		s.push(ext);
		PathBuf::from(s)
	}
}

/// A fixed-slot, schema-described heap file.
pub struct HeapFile {
	paths: TablePaths,
	schema: Schema,
	rec_data_size: usize,
	slot_size: usize,
	heap_size: i32,
	free_head: i32,
}

impl HeapFile {
	/// Creates `<base>.dat` and `<base>.schema.json`, plus a text sidecar for
	/// every `TEXT` field and blob/histogram sidecars for every `SOUND` field.
	pub fn build(paths: TablePaths, schema: &Schema) -> Result<()> {
		let mut header = [0u8; METADATA_SIZE];
		LittleEndian::write_i32(&mut header[0..4], 0);
		LittleEndian::write_i32(&mut header[4..8], FREE_HEAD_NONE);
		File::create(paths.data())?.write_all(&header)?;

		schema.save(&paths.schema())?;

		for field in &schema.fields {
			match field.format {
				FieldFormat::Text => TextSidecar::build(&paths.text_sidecar(&field.name))?,
				FieldFormat::Sound => {
					TextSidecar::build(&paths.sound_blob(&field.name))?;
					TextSidecar::build(&paths.sound_hist(&field.name))?;
				}
				_ => {}
			}
		}
		Ok(())
	}

	/// Opens an existing heap file, loading its schema and header.
	pub fn open(paths: TablePaths) -> Result<HeapFile> {
		let schema = Schema::load(&paths.schema())?;
		let rec_data_size = schema.record_byte_len();
		let slot_size = rec_data_size + PTR_SIZE;

		let mut header = [0u8; METADATA_SIZE];
		File::open(paths.data())?.read_exact(&mut header)?;
		let heap_size = LittleEndian::read_i32(&header[0..4]);
		let free_head = LittleEndian::read_i32(&header[4..8]);

		Ok(HeapFile {
			paths,
			schema,
			rec_data_size,
			slot_size,
			heap_size,
			free_head,
		})
	}

	pub fn schema(&self) -> &Schema {
		&self.schema
	}

	pub fn paths(&self) -> &TablePaths {
		&self.paths
	}

	pub fn heap_size(&self) -> i32 {
		self.heap_size
	}

	fn pk_field(&self) -> Result<(usize, &Field)> {
		let idx = self
			.schema
			.primary_key_index()
			.ok_or_else(|| ErrorKind::NoPrimaryKey(self.schema.table_name.clone()))?;
		Ok((idx, &self.schema.fields[idx]))
	}

	fn write_header(&self, f: &mut File) -> Result<()> {
		let mut header = [0u8; METADATA_SIZE];
		LittleEndian::write_i32(&mut header[0..4], self.heap_size);
		LittleEndian::write_i32(&mut header[4..8], self.free_head);
		f.seek(SeekFrom::Start(0))?;
		f.write_all(&header)?;
		Ok(())
	}

	fn slot_offset_bytes(&self, slot: i32) -> u64 {
		METADATA_SIZE as u64 + slot as u64 * self.slot_size as u64
	}

	/// Replaces `Text`/`Sound` logical values with their sidecar offsets
	/// before the record is packed into a slot.
	fn materialize_for_storage(&self, record: &mut Record) -> Result<()> {
		for (i, field) in self.schema.fields.iter().enumerate() {
			match field.format {
				FieldFormat::Text => {
					let text = match record.values[i] {
						Value::Text(ref s) => s.clone(),
						Value::Str(ref s) => s.clone(),
						_ => bail!(ErrorKind::TypeMismatch("text".into(), format!("{:?}", record.values[i]))),
					};
					let sidecar = TextSidecar::open(&self.paths.text_sidecar(&field.name));
					let offset = sidecar.insert(text.as_bytes())?;
					record.values[i] = Value::Int(offset as i32);
				}
				FieldFormat::Sound => {
					let (blob, histogram) = match record.values[i] {
						Value::Sound { ref blob, ref histogram } => (blob.clone(), histogram.clone()),
						_ => bail!(ErrorKind::TypeMismatch("sound".into(), format!("{:?}", record.values[i]))),
					};
					let blob_sidecar = TextSidecar::open(&self.paths.sound_blob(&field.name));
					let hist_sidecar = TextSidecar::open(&self.paths.sound_hist(&field.name));
					let blob_off = blob_sidecar.insert(&blob)?;
					let mut hist_bytes = vec![0u8; histogram.len() * 4];
					for (j, &v) in histogram.iter().enumerate() {
						LittleEndian::write_f32(&mut hist_bytes[j * 4..j * 4 + 4], v);
					}
					let hist_off = hist_sidecar.insert(&hist_bytes)?;
					record.values[i] = Value::TupleInt(vec![blob_off as i32, hist_off as i32]);
				}
				_ => {}
			}
		}
		Ok(())
	}

	/// Reads `Text`/`Sound` sidecar content back into the record in place of
	/// the in-row offsets, for records returned to callers.
	fn dematerialize(&self, record: &mut Record) -> Result<()> {
		for (i, field) in self.schema.fields.iter().enumerate() {
			match field.format {
				FieldFormat::Text => {
					let offset = match record.values[i] {
						Value::Int(v) => v as i64,
						_ => continue,
					};
					let sidecar = TextSidecar::open(&self.paths.text_sidecar(&field.name));
					let text = sidecar.read_text(offset)?.unwrap_or_default();
					record.values[i] = Value::Text(text);
				}
				FieldFormat::Sound => {
					let (blob_off, hist_off) = match record.values[i] {
						Value::TupleInt(ref v) if v.len() == 2 => (v[0] as i64, v[1] as i64),
						_ => continue,
					};
					let blob_sidecar = TextSidecar::open(&self.paths.sound_blob(&field.name));
					let hist_sidecar = TextSidecar::open(&self.paths.sound_hist(&field.name));
					let blob = blob_sidecar.read(blob_off)?.unwrap_or_default();
					let hist_raw = hist_sidecar.read(hist_off)?.unwrap_or_default();
					let histogram = hist_raw.chunks(4).map(LittleEndian::read_f32).collect();
					record.values[i] = Value::Sound { blob, histogram };
				}
				_ => {}
			}
		}
		Ok(())
	}

	fn check_pk_duplicate(&self, pk_idx: usize, pk_value: &Value) -> Result<()> {
		let mut f = File::open(self.paths.data())?;
		f.seek(SeekFrom::Start(METADATA_SIZE as u64))?;
		let mut buf = vec![0u8; self.rec_data_size];
		for _ in 0..self.heap_size {
			f.read_exact(&mut buf)?;
			let rec = Record::unpack(&buf, &self.schema)?;
			if &rec.values[pk_idx] == pk_value {
				bail!(ErrorKind::DuplicateKey(pk_value.display()));
			}
			f.seek(SeekFrom::Current(PTR_SIZE as i64))?;
		}
		Ok(())
	}

	fn insert_inner(&mut self, mut record: Record, check_pk: bool) -> Result<i32> {
		if record.values.len() != self.schema.fields.len() {
			bail!(ErrorKind::SchemaMismatch(
				format!("{} fields", self.schema.fields.len()),
				format!("{} values", record.values.len())
			));
		}

		if check_pk {
			if let Ok((pk_idx, field)) = self.pk_field() {
				let pk_value = record.values[pk_idx].clone();
				if pk_value.is_sentinel(&field.format) {
					bail!(ErrorKind::SentinelNotAllowed(field.name.clone()));
				}
				self.check_pk_duplicate(pk_idx, &pk_value)?;
			}
		}

		self.materialize_for_storage(&mut record)?;
		let packed = record.pack(&self.schema)?;

		let mut f = OpenOptions::new().read(true).write(true).open(self.paths.data())?;
		let slot_off = if self.free_head == FREE_HEAD_NONE {
			let slot_off = self.heap_size;
			f.seek(SeekFrom::End(0))?;
			f.write_all(&packed)?;
			f.write_all(&[0u8; PTR_SIZE])?;
			self.heap_size += 1;
			slot_off
		} else {
			let slot_off = self.free_head;
			let byte_off = self.slot_offset_bytes(slot_off);
			f.seek(SeekFrom::Start(byte_off + self.rec_data_size as u64))?;
			let mut next_buf = [0u8; PTR_SIZE];
			f.read_exact(&mut next_buf)?;
			self.free_head = LittleEndian::read_i32(&next_buf);
			f.seek(SeekFrom::Start(byte_off))?;
			f.write_all(&packed)?;
			f.write_all(&[0u8; PTR_SIZE])?;
			slot_off
		};
		self.write_header(&mut f)?;
		debug!("heap[{}]: inserted at slot {}", self.schema.table_name, slot_off);
		Ok(slot_off)
	}

	/// Inserts a record, rejecting on a duplicate primary key (linear scan).
	pub fn insert(&mut self, record: Record) -> Result<i32> {
		self.insert_inner(record, true)
	}

	/// Inserts a record without checking primary-key uniqueness; used when a
	/// secondary index has already proven uniqueness, or none is required.
	pub fn insert_free(&mut self, record: Record) -> Result<i32> {
		self.insert_inner(record, false)
	}

	/// Deletes the first live record whose primary key equals `key`.
	pub fn delete_by_pk(&mut self, key: &Value) -> Result<(i32, Record)> {
		let (pk_idx, _) = self.pk_field()?;

		let mut f = OpenOptions::new().read(true).write(true).open(self.paths.data())?;
		let mut buf = vec![0u8; self.rec_data_size];
		for pos in 0..self.heap_size {
			let byte_off = self.slot_offset_bytes(pos);
			f.seek(SeekFrom::Start(byte_off))?;
			f.read_exact(&mut buf)?;
			let mut rec = Record::unpack(&buf, &self.schema)?;
			if &rec.values[pk_idx] != key {
				continue;
			}

			let mut old_rec = rec.clone();
			self.dematerialize(&mut old_rec)?;

			for (i, field) in self.schema.fields.iter().enumerate() {
				if field.format == FieldFormat::Text {
					if let Value::Int(offset) = rec.values[i] {
						TextSidecar::open(&self.paths.text_sidecar(&field.name)).delete(offset as i64)?;
					}
				}
			}

			let sentinel = Value::sentinel_for(&self.schema.fields[pk_idx].format)
				.expect("primary key format is always sentinel-capable");
			rec.values[pk_idx] = sentinel;

			f.seek(SeekFrom::Start(byte_off))?;
			f.write_all(&rec.pack(&self.schema)?)?;
			let mut next_buf = [0u8; PTR_SIZE];
			LittleEndian::write_i32(&mut next_buf, self.free_head);
			f.write_all(&next_buf)?;
			self.free_head = pos;
			self.write_header(&mut f)?;
			debug!("heap[{}]: deleted slot {}", self.schema.table_name, pos);
			return Ok((pos, old_rec));
		}
		bail!(ErrorKind::NotFound(format!("primary key {}", key.display())));
	}

	fn is_tombstone(&self, rec: &Record, pk_idx: usize) -> bool {
		rec.values[pk_idx].is_sentinel(&self.schema.fields[pk_idx].format)
	}

	/// Linear scan for all live records whose `field` equals `value`. Stops
	/// at the first match when `field` is the primary key.
	pub fn search_by_field(&self, field: &str, value: &Value) -> Result<Vec<Record>> {
		let fld_idx = self.schema.field_index(field)?;
		let pk_idx = self.schema.primary_key_index();
		let stop_early = self.schema.primary_key_name() == Some(field);

		let mut f = File::open(self.paths.data())?;
		f.seek(SeekFrom::Start(METADATA_SIZE as u64))?;
		let mut buf = vec![0u8; self.rec_data_size];
		let mut results = Vec::new();

		for _ in 0..self.heap_size {
			f.read_exact(&mut buf)?;
			let rec = Record::unpack(&buf, &self.schema)?;
			f.seek(SeekFrom::Current(PTR_SIZE as i64))?;

			if let Some(pk_idx) = pk_idx {
				if self.is_tombstone(&rec, pk_idx) {
					continue;
				}
			}

			if &rec.values[fld_idx] == value {
				let mut materialized = rec;
				self.dematerialize(&mut materialized)?;
				results.push(materialized);
				if stop_early {
					break;
				}
			}
		}
		Ok(results)
	}

	/// Reads the slot at logical `offset`. Returns materialized text/sound
	/// content. Works on freed offsets too (caller's responsibility).
	pub fn fetch_by_offset(&self, offset: i32) -> Result<Record> {
		if offset < 0 || offset >= self.heap_size {
			bail!(ErrorKind::OutOfRange(offset as i64, self.heap_size as i64));
		}
		let mut f = File::open(self.paths.data())?;
		f.seek(SeekFrom::Start(self.slot_offset_bytes(offset)))?;
		let mut buf = vec![0u8; self.rec_data_size];
		f.read_exact(&mut buf)?;
		let mut rec = Record::unpack(&buf, &self.schema)?;
		self.dematerialize(&mut rec)?;
		Ok(rec)
	}

	/// Linear scan emitting `(value, offset)` for every live slot, used to
	/// bulk-load secondary indexes.
	pub fn extract_index(&self, field: &str) -> Result<Vec<(Value, i32)>> {
		let fld_idx = self.schema.field_index(field)?;
		let pk_idx = self.schema.primary_key_index();

		let mut f = File::open(self.paths.data())?;
		f.seek(SeekFrom::Start(METADATA_SIZE as u64))?;
		let mut buf = vec![0u8; self.rec_data_size];
		let mut out = Vec::new();

		for pos in 0..self.heap_size {
			f.read_exact(&mut buf)?;
			let rec = Record::unpack(&buf, &self.schema)?;
			f.seek(SeekFrom::Current(PTR_SIZE as i64))?;

			if let Some(pk_idx) = pk_idx {
				if self.is_tombstone(&rec, pk_idx) {
					continue;
				}
			}
			out.push((rec.values[fld_idx].clone(), pos));
		}
		Ok(out)
	}

	/// Every live record, with its slot offset, text/sound fields materialized.
	pub fn live_records(&self) -> Result<Vec<(i32, Record)>> {
		let pk_idx = self.schema.primary_key_index();
		let mut f = File::open(self.paths.data())?;
		f.seek(SeekFrom::Start(METADATA_SIZE as u64))?;
		let mut buf = vec![0u8; self.rec_data_size];
		let mut out = Vec::new();

		for pos in 0..self.heap_size {
			f.read_exact(&mut buf)?;
			let mut rec = Record::unpack(&buf, &self.schema)?;
			f.seek(SeekFrom::Current(PTR_SIZE as i64))?;

			if let Some(pk_idx) = pk_idx {
				if self.is_tombstone(&rec, pk_idx) {
					continue;
				}
			}
			self.dematerialize(&mut rec)?;
			out.push((pos, rec));
		}
		Ok(out)
	}

	/// `(doc_id, concatenated text)` for every live record, used by the
	/// SPIMI builder. `doc_id` is the record's primary key.
	pub fn text_documents(&self) -> Result<Vec<(i32, String)>> {
		let (pk_idx, _) = self.pk_field()?;
		let text_fields: Vec<usize> = self
			.schema
			.fields
			.iter()
			.enumerate()
			.filter(|&(_, f)| f.format == FieldFormat::Text)
			.map(|(i, _)| i)
			.collect();

		let mut out = Vec::new();
		for (_, rec) in self.live_records()? {
			let doc_id = match rec.values[pk_idx] {
				Value::Int(v) => v,
				_ => bail!(ErrorKind::UnsupportedFormat("non-int primary key".into(), "SPIMI doc id")),
			};
			let text = text_fields
				.iter()
				.map(|&i| match rec.values[i] {
					Value::Text(ref s) => s.as_str(),
					_ => "",
				})
				.collect::<Vec<_>>()
				.join(" ");
			out.push((doc_id, text));
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use schema::Schema;
	use tempfile::tempdir;

	fn build(dir: &Path, name: &str, fields: &[(&str, &str)], pk: Option<&str>) -> HeapFile {
		let schema = Schema::new(name, fields, pk).unwrap();
		let paths = TablePaths::new(dir.join(name));
		HeapFile::build(paths.clone(), &schema).unwrap();
		HeapFile::open(paths).unwrap()
	}

	#[test]
	fn insert_search_delete_reuses_slot() {
		let dir = tempdir().unwrap();
		let mut heap = build(dir.path(), "widgets", &[("id", "i"), ("name", "20s"), ("price", "f")], Some("id"));

		let off1 = heap
			.insert(Record::new(vec![Value::Int(1), Value::Str("Galletas".into()), Value::Float(3.5)]))
			.unwrap();
		let off2 = heap
			.insert(Record::new(vec![Value::Int(2), Value::Str("Chocolate".into()), Value::Float(5.2)]))
			.unwrap();
		let off3 = heap
			.insert(Record::new(vec![Value::Int(3), Value::Str("Caramelos".into()), Value::Float(1.75)]))
			.unwrap();
		assert_eq!((off1, off2, off3), (0, 1, 2));

		let found = heap.search_by_field("id", &Value::Int(2)).unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].values[1], Value::Str("Chocolate".into()));

		let (freed_off, _) = heap.delete_by_pk(&Value::Int(2)).unwrap();
		assert_eq!(freed_off, 1);
		assert!(heap.search_by_field("id", &Value::Int(2)).unwrap().is_empty());

		let off4 = heap
			.insert(Record::new(vec![Value::Int(4), Value::Str("Cereal".into()), Value::Float(4.0)]))
			.unwrap();
		assert_eq!(off4, freed_off);
	}

	#[test]
	fn rejects_duplicate_pk() {
		let dir = tempdir().unwrap();
		let mut heap = build(dir.path(), "t", &[("id", "i")], Some("id"));
		heap.insert(Record::new(vec![Value::Int(1)])).unwrap();
		assert!(heap.insert(Record::new(vec![Value::Int(1)])).is_err());
	}

	#[test]
	fn rejects_sentinel_pk() {
		let dir = tempdir().unwrap();
		let mut heap = build(dir.path(), "t", &[("id", "i")], Some("id"));
		assert!(heap.insert(Record::new(vec![Value::Int(-1)])).is_err());
	}

	#[test]
	fn text_field_materializes_on_read() {
		let dir = tempdir().unwrap();
		let mut heap = build(dir.path(), "notes", &[("id", "i"), ("body", "text")], Some("id"));
		heap.insert(Record::new(vec![Value::Int(1), Value::Text("hello world".into())])).unwrap();

		let found = heap.search_by_field("id", &Value::Int(1)).unwrap();
		assert_eq!(found[0].values[1], Value::Text("hello world".into()));
	}

	#[test]
	fn extract_index_skips_tombstones() {
		let dir = tempdir().unwrap();
		let mut heap = build(dir.path(), "t", &[("id", "i")], Some("id"));
		heap.insert(Record::new(vec![Value::Int(1)])).unwrap();
		heap.insert(Record::new(vec![Value::Int(2)])).unwrap();
		heap.delete_by_pk(&Value::Int(1)).unwrap();

		let entries = heap.extract_index("id").unwrap();
		assert_eq!(entries, vec![(Value::Int(2), 1)]);
	}

	#[test]
	fn out_of_range_fetch_errors() {
		let dir = tempdir().unwrap();
		let heap = build(dir.path(), "t", &[("id", "i")], Some("id"));
		assert!(heap.fetch_by_offset(0).is_err());
	}
}
