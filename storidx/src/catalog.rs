//! Catalog & Router: maps `(table, field)` to whichever secondary indexes
//! exist, by checking for the marker files named in §6.1, and fans write
//! operations out to all of them, mirroring the dispatch role the original
//! `executor`/`Database` layer plays around `HeapFile` and the index
//! classes.

use std::fs;
use std::path::PathBuf;

use fs2::FileExt;
use log::info;

use btree::BTreeIndex;
use error::{ErrorKind, Result};
use hash::HashIndex;
use heap::{HeapFile, TablePaths};
use index_record::Key;
use options::{BTreeOptions, HashOptions};
use record::Record;
use rtree::SpatialIndex;
use schema::Schema;
use seq_index::SequentialIndex;
use value::{FieldFormat, Value};

/// The kinds of secondary index a field may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
	BTree,
	Hash,
	Sequential,
	RTree,
}

const ALL_KINDS: [IndexKind; 4] = [IndexKind::BTree, IndexKind::Hash, IndexKind::Sequential, IndexKind::RTree];

impl IndexKind {
	fn marker(&self, paths: &TablePaths, field: &str) -> PathBuf {
		match *self {
			IndexKind::BTree => paths.btree_idx(field),
			IndexKind::Hash => paths.hash_marker(field),
			IndexKind::Sequential => paths.seq_idx(field),
			IndexKind::RTree => paths.rtree_idx(field),
		}
	}

	fn tag(&self) -> &'static str {
		match *self {
			IndexKind::BTree => "b+tree",
			IndexKind::Hash => "hash",
			IndexKind::Sequential => "sequential",
			IndexKind::RTree => "r-tree",
		}
	}
}

fn write_u32_file(path: &::std::path::Path, value: u32) -> Result<()> {
	use std::io::Write;
	fs::File::create(path)?.write_all(&value.to_le_bytes())?;
	Ok(())
}

fn read_u32_file(path: &::std::path::Path) -> Result<u32> {
	use std::io::Read;
	let mut buf = [0u8; 4];
	fs::File::open(path)?.read_exact(&mut buf)?;
	Ok(u32::from_le_bytes(buf))
}

pub(crate) fn key_from_value(value: &Value) -> Result<Key> {
	Ok(match *value {
		Value::Int(v) => Key::Int(v),
		Value::Float(v) => Key::Float(v),
		Value::Str(ref v) => Key::Str(v.clone()),
		Value::TupleInt(ref v) => Key::TupleInt(v.clone()),
		Value::TupleFloat(ref v) => Key::TupleFloat(v.clone()),
		ref other => bail!(ErrorKind::TypeMismatch("indexable value".into(), format!("{:?}", other))),
	})
}

/// Maps tables under a root directory to their on-disk file family and
/// present indexes, and fans writes out across them.
pub struct Catalog {
	root: PathBuf,
}

/// Advisory, opt-in lock over one table's directory, per §5: callers that
/// want protection against a second external process MAY acquire this; the
/// catalog never requires it. Released on drop.
pub struct TableLock {
	file: fs::File,
}

impl Drop for TableLock {
	fn drop(&mut self) {
		let _ = self.file.unlock();
	}
}

impl Catalog {
	pub fn new<P: Into<PathBuf>>(root: P) -> Catalog {
		Catalog { root: root.into() }
	}

	fn table_paths(&self, table: &str) -> TablePaths {
		TablePaths::new(self.root.join(table))
	}

	/// Acquires an exclusive advisory lock on `table`'s `.lock` file. Never
	/// called implicitly by any other `Catalog` method.
	pub fn open_locked(&self, table: &str) -> Result<TableLock> {
		fs::create_dir_all(&self.root)?;
		let lock_path = self.root.join(format!("{}.lock", table));
		let file = fs::OpenOptions::new().write(true).create(true).open(&lock_path)?;
		file.try_lock_exclusive().map_err(|_| ErrorKind::TableLocked(table.to_owned()))?;
		Ok(TableLock { file })
	}

	pub fn create_table(&self, schema: &Schema) -> Result<()> {
		fs::create_dir_all(&self.root)?;
		let paths = self.table_paths(&schema.table_name);
		HeapFile::build(paths, schema)?;
		info!("catalog: created table `{}`", schema.table_name);
		Ok(())
	}

	pub fn check_table_exists(&self, table: &str) -> bool {
		self.table_paths(table).data().exists()
	}

	pub fn get_table_schema(&self, table: &str) -> Result<Schema> {
		Schema::load(&self.table_paths(table).schema())
	}

	fn open_heap(&self, table: &str) -> Result<HeapFile> {
		HeapFile::open(self.table_paths(table))
	}

	pub fn check_idx(&self, table: &str, field: &str, kind: IndexKind) -> Result<bool> {
		let paths = self.table_paths(table);
		Ok(kind.marker(&paths, field).exists())
	}

	/// Reopens the B+ tree on `(table, field)` with its persisted `order`.
	pub fn open_btree(&self, table: &str, field: &str) -> Result<BTreeIndex> {
		let paths = self.table_paths(table);
		let format = self.get_table_schema(table)?.field(field)?.format;
		let order = self.btree_order(&paths, field)?;
		Ok(BTreeIndex::open(paths.btree_idx(field), format, order))
	}

	/// Reopens the hash index on `(table, field)` with its persisted bucket capacity.
	pub fn open_hash(&self, table: &str, field: &str) -> Result<HashIndex> {
		let paths = self.table_paths(table);
		let format = self.get_table_schema(table)?.field(field)?.format;
		let capacity = self.hash_capacity(&paths, field)?;
		Ok(HashIndex::open(paths.hash_db(field), paths.hash_tree(field), format, capacity))
	}

	/// Reopens the sequential index on `(table, field)`.
	pub fn open_seq(&self, table: &str, field: &str) -> Result<SequentialIndex> {
		let paths = self.table_paths(table);
		let format = self.get_table_schema(table)?.field(field)?.format;
		SequentialIndex::open(paths.seq_idx(field), format)
	}

	/// Reopens the r-tree index on `(table, field)`.
	pub fn open_rtree(&self, table: &str, field: &str) -> Result<SpatialIndex> {
		let paths = self.table_paths(table);
		let format = self.get_table_schema(table)?.field(field)?.format;
		SpatialIndex::open(paths.rtree_dat(field), format)
	}

	/// Builds a B+ tree index on `field` by bulk-extracting from the heap.
	pub fn create_btree_idx(&self, table: &str, field: &str, opts: BTreeOptions) -> Result<()> {
		let internal = opts.validate()?;
		let heap = self.open_heap(table)?;
		let paths = heap.paths().clone();
		if paths.btree_idx(field).exists() {
			bail!(ErrorKind::IndexExists(table.to_owned(), field.to_owned(), "b+tree"));
		}
		let format = heap.schema().field(field)?.format;
		let entries = extract_keyed(&heap, field)?;
		BTreeIndex::build_index(paths.btree_idx(field), format, internal.order, entries)?;
		write_u32_file(&paths.btree_meta(field), internal.order as u32)?;
		info!("catalog: built b+tree index on {}.{}", table, field);
		Ok(())
	}

	fn btree_order(&self, paths: &TablePaths, field: &str) -> Result<usize> {
		Ok(read_u32_file(&paths.btree_meta(field))? as usize)
	}

	fn hash_capacity(&self, paths: &TablePaths, field: &str) -> Result<usize> {
		Ok(read_u32_file(&paths.hash_marker(field))? as usize)
	}

	pub fn create_hash_idx(&self, table: &str, field: &str, opts: HashOptions) -> Result<()> {
		let internal = opts.validate()?;
		let heap = self.open_heap(table)?;
		let paths = heap.paths().clone();
		if paths.hash_marker(field).exists() {
			bail!(ErrorKind::IndexExists(table.to_owned(), field.to_owned(), "hash"));
		}
		let format = heap.schema().field(field)?.format;
		let entries = extract_keyed(&heap, field)?;
		HashIndex::build_index(paths.hash_db(field), paths.hash_tree(field), format, internal.bucket_capacity, entries)?;
		write_u32_file(&paths.hash_marker(field), internal.bucket_capacity as u32)?;
		info!("catalog: built hash index on {}.{}", table, field);
		Ok(())
	}

	pub fn create_seq_idx(&self, table: &str, field: &str) -> Result<()> {
		let heap = self.open_heap(table)?;
		let paths = heap.paths().clone();
		if paths.seq_idx(field).exists() {
			bail!(ErrorKind::IndexExists(table.to_owned(), field.to_owned(), "sequential"));
		}
		let format = heap.schema().field(field)?.format;
		let entries = extract_keyed(&heap, field)?;
		SequentialIndex::build_index(paths.seq_idx(field), format, entries)?;
		info!("catalog: built sequential index on {}.{}", table, field);
		Ok(())
	}

	pub fn create_rtree_idx(&self, table: &str, field: &str) -> Result<()> {
		let heap = self.open_heap(table)?;
		let paths = heap.paths().clone();
		if paths.rtree_idx(field).exists() {
			bail!(ErrorKind::IndexExists(table.to_owned(), field.to_owned(), "r-tree"));
		}
		let format = heap.schema().field(field)?.format;
		let entries = extract_keyed(&heap, field)?;
		SpatialIndex::build_index(paths.rtree_dat(field), format, entries)?;
		fs::File::create(paths.rtree_idx(field))?;
		info!("catalog: built r-tree index on {}.{}", table, field);
		Ok(())
	}

	pub fn drop_idx(&self, table: &str, field: &str, kind: IndexKind) -> Result<()> {
		let paths = self.table_paths(table);
		if !kind.marker(&paths, field).exists() {
			bail!(ErrorKind::IndexMissing(table.to_owned(), field.to_owned(), kind.tag()));
		}
		match kind {
			IndexKind::BTree => remove_if_exists(&paths.btree_idx(field))?,
			IndexKind::Hash => {
				remove_if_exists(&paths.hash_marker(field))?;
				remove_if_exists(&paths.hash_db(field))?;
				remove_if_exists(&paths.hash_tree(field))?;
			}
			IndexKind::Sequential => remove_if_exists(&paths.seq_idx(field))?,
			IndexKind::RTree => {
				remove_if_exists(&paths.rtree_idx(field))?;
				remove_if_exists(&paths.rtree_dat(field))?;
			}
		}
		Ok(())
	}

	/// Drops every present index on every field, then the data and schema
	/// files, per §4.7's "Drop table" rule.
	pub fn drop_table(&self, table: &str) -> Result<()> {
		let schema = self.get_table_schema(table)?;
		let paths = self.table_paths(table);
		for field in &schema.fields {
			for &kind in &ALL_KINDS {
				if kind.marker(&paths, &field.name).exists() {
					self.drop_idx(table, &field.name, kind)?;
				}
			}
			if field.format == FieldFormat::Text {
				remove_if_exists(&paths.text_sidecar(&field.name))?;
			}
			if field.format == FieldFormat::Sound {
				remove_if_exists(&paths.sound_blob(&field.name))?;
				remove_if_exists(&paths.sound_hist(&field.name))?;
			}
		}
		remove_if_exists(&paths.data())?;
		remove_if_exists(&paths.schema())?;
		info!("catalog: dropped table `{}`", table);
		Ok(())
	}

	/// Checks the chosen PK index (preferring hash, then b+tree, then
	/// sequential, then r-tree) for a duplicate before the heap insert
	/// proceeds, per §4.7's "PK-variant inserts".
	fn check_pk_index_duplicate(&self, table: &str, schema: &Schema, paths: &TablePaths, pk_value: &Value) -> Result<()> {
		let pk_name = match schema.primary_key_name() {
			Some(n) => n.to_owned(),
			None => return Ok(()),
		};
		let key = key_from_value(pk_value)?;

		let hits = if paths.hash_marker(&pk_name).exists() {
			self.open_hash(table, &pk_name)?.search(&key)?
		} else if paths.btree_idx(&pk_name).exists() {
			self.open_btree(table, &pk_name)?.search(&key)?
		} else if paths.seq_idx(&pk_name).exists() {
			self.open_seq(table, &pk_name)?.search(&key)?
		} else {
			Vec::new()
		};
		if !hits.is_empty() {
			bail!(ErrorKind::DuplicateKey(pk_value.display()));
		}
		Ok(())
	}

	/// Inserts into the heap (checking PK uniqueness via an index if one is
	/// present on the PK field, otherwise falling back to the heap's own
	/// linear scan), then fans the new `(value, offset)` out to every
	/// present secondary index, in schema-field order.
	pub fn insert_record(&self, table: &str, record: Record) -> Result<i32> {
		let mut heap = self.open_heap(table)?;
		let schema = heap.schema().clone();
		let paths = heap.paths().clone();

		let has_pk_index = schema
			.primary_key_name()
			.map(|pk| {
				[IndexKind::Hash, IndexKind::BTree, IndexKind::Sequential]
					.iter()
					.any(|k| k.marker(&paths, pk).exists())
			})
			.unwrap_or(false);

		let offset = if has_pk_index {
			let pk_idx = schema.primary_key_index().expect("has_pk_index implies a pk");
			let pk_value = record.values[pk_idx].clone();
			if pk_value.is_sentinel(&schema.fields[pk_idx].format) {
				bail!(ErrorKind::SentinelNotAllowed(schema.fields[pk_idx].name.clone()));
			}
			self.check_pk_index_duplicate(table, &schema, &paths, &pk_value)?;
			heap.insert_free(record.clone())?
		} else {
			heap.insert(record.clone())?
		};

		self.fanout_insert(table, &schema, &paths, &record, offset)?;
		Ok(offset)
	}

	fn fanout_insert(&self, table: &str, schema: &Schema, paths: &TablePaths, record: &Record, offset: i32) -> Result<()> {
		for (i, field) in schema.fields.iter().enumerate() {
			if !field.format.is_indexable() {
				continue;
			}
			let key = match key_from_value(&record.values[i]) {
				Ok(k) => k,
				Err(_) => continue,
			};

			if paths.btree_idx(&field.name).exists() {
				self.open_btree(table, &field.name)?.insert(key.clone(), offset)?;
			}
			if paths.hash_marker(&field.name).exists() {
				self.open_hash(table, &field.name)?.insert(key.clone(), offset)?;
			}
			if paths.seq_idx(&field.name).exists() {
				self.open_seq(table, &field.name)?.insert(key.clone(), offset)?;
			}
			if paths.rtree_idx(&field.name).exists() {
				self.open_rtree(table, &field.name)?.insert(&key, offset)?;
			}
		}
		Ok(())
	}

	/// Deletes by primary key, then fans the removal out to every present
	/// secondary index using the old record's field values.
	pub fn delete_record(&self, table: &str, pk_value: &Value) -> Result<()> {
		let mut heap = self.open_heap(table)?;
		let schema = heap.schema().clone();
		let paths = heap.paths().clone();

		let (offset, old_record) = heap.delete_by_pk(pk_value)?;
		self.fanout_delete(table, &schema, &paths, &old_record, offset)
	}

	fn fanout_delete(&self, table: &str, schema: &Schema, paths: &TablePaths, record: &Record, offset: i32) -> Result<()> {
		for (i, field) in schema.fields.iter().enumerate() {
			if !field.format.is_indexable() {
				continue;
			}
			let key = match key_from_value(&record.values[i]) {
				Ok(k) => k,
				Err(_) => continue,
			};

			if paths.btree_idx(&field.name).exists() {
				self.open_btree(table, &field.name)?.delete(&key, offset)?;
			}
			if paths.hash_marker(&field.name).exists() {
				self.open_hash(table, &field.name)?.delete(&key, offset)?;
			}
			if paths.seq_idx(&field.name).exists() {
				self.open_seq(table, &field.name)?.delete(&key, offset)?;
			}
			if paths.rtree_idx(&field.name).exists() {
				self.open_rtree(table, &field.name)?.delete(&key, offset)?;
			}
		}
		Ok(())
	}

	pub fn search_by_field(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
		self.open_heap(table)?.search_by_field(field, value)
	}

	/// Fetches one record by its heap offset, as returned by any secondary
	/// index's `search`/`range_search`/spatial query.
	pub fn fetch_by_offset(&self, table: &str, offset: i32) -> Result<Record> {
		self.open_heap(table)?.fetch_by_offset(offset)
	}

	/// `(doc_id, concatenated text)` for every live record of `table`, used
	/// by the SPIMI builder as its document source.
	pub fn text_documents(&self, table: &str) -> Result<Vec<(i32, String)>> {
		self.open_heap(table)?.text_documents()
	}

	/// Number of live (non-tombstoned) records in `table`, used by the SPIMI
	/// builder/search to recompute a fresh `N` for IDF.
	pub fn live_record_count(&self, table: &str) -> Result<usize> {
		Ok(self.open_heap(table)?.live_records()?.len())
	}

	/// Scratch directory for one SPIMI build's intermediate block files,
	/// cleaned up by the builder once the streaming merge completes.
	pub fn blocks_dir(&self, table: &str) -> PathBuf {
		self.root.join(format!("{}.spimi_blocks", table))
	}
}

fn extract_keyed(heap: &HeapFile, field: &str) -> Result<Vec<(Key, i32)>> {
	heap.extract_index(field)?
		.into_iter()
		.map(|(v, off)| Ok((key_from_value(&v)?, off)))
		.collect()
}

fn remove_if_exists(path: &::std::path::Path) -> Result<()> {
	if path.exists() {
		fs::remove_file(path)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn sample_schema() -> Schema {
		Schema::new("widgets", &[("id", "i"), ("name", "20s"), ("price", "f")], Some("id")).unwrap()
	}

	#[test]
	fn create_insert_search_delete_roundtrip() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		let schema = sample_schema();
		cat.create_table(&schema).unwrap();
		assert!(cat.check_table_exists("widgets"));

		cat.insert_record("widgets", Record::new(vec![Value::Int(1), Value::Str("Galletas".into()), Value::Float(3.5)]))
			.unwrap();
		cat.insert_record("widgets", Record::new(vec![Value::Int(2), Value::Str("Chocolate".into()), Value::Float(5.2)]))
			.unwrap();

		let found = cat.search_by_field("widgets", "id", &Value::Int(2)).unwrap();
		assert_eq!(found.len(), 1);

		cat.delete_record("widgets", &Value::Int(2)).unwrap();
		assert!(cat.search_by_field("widgets", "id", &Value::Int(2)).unwrap().is_empty());
	}

	#[test]
	fn fanout_keeps_btree_and_hash_consistent() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		let schema = Schema::new("rows", &[("id", "i"), ("ciclo", "i"), ("nombre", "10s")], Some("id")).unwrap();
		cat.create_table(&schema).unwrap();
		cat.create_btree_idx("rows", "ciclo", BTreeOptions::default()).unwrap();
		cat.create_hash_idx("rows", "nombre", HashOptions::default()).unwrap();

		for i in 0..20 {
			cat.insert_record(
				"rows",
				Record::new(vec![Value::Int(i), Value::Int(i % 3), Value::Str(format!("n{}", i))]),
			)
			.unwrap();
		}

		let paths = cat.table_paths("rows");
		let btree = BTreeIndex::open(paths.btree_idx("ciclo"), FieldFormat::Int, BTreeOptions::default().order);
		assert_eq!(btree.search(&Key::Int(0)).unwrap().len(), 7);

		let hash = HashIndex::open(paths.hash_db("nombre"), paths.hash_tree("nombre"), FieldFormat::Str(10), HashOptions::default().bucket_capacity);
		assert_eq!(hash.search(&Key::Str("n5".into())).unwrap(), vec![5]);

		cat.delete_record("rows", &Value::Int(5)).unwrap();
		assert!(hash.search(&Key::Str("n5".into())).unwrap().is_empty());
	}

	#[test]
	fn drop_table_removes_index_files() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		let schema = sample_schema();
		cat.create_table(&schema).unwrap();
		cat.create_btree_idx("widgets", "id", BTreeOptions::default()).unwrap();

		let paths = cat.table_paths("widgets");
		assert!(paths.btree_idx("id").exists());

		cat.drop_table("widgets").unwrap();
		assert!(!paths.btree_idx("id").exists());
		assert!(!paths.data().exists());
	}

	#[test]
	fn double_create_idx_rejected() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		cat.create_table(&sample_schema()).unwrap();
		cat.create_seq_idx("widgets", "id").unwrap();
		assert!(cat.create_seq_idx("widgets", "id").is_err());
	}
}
