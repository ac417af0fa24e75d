//! Extendible hash index: a page heap of fixed-capacity buckets addressed by
//! a binary trie over the key's hash bits, mirroring §4.5. The retrieval
//! pack's `ExtendibleHashIndex.py` is truncated (only its `_Rec`/`_Page`/
//! `_Storage` helpers survive); the hashing scheme, split condition and
//! overflow-chaining behavior here are grounded directly in spec §4.5's
//! prose rather than in that incomplete source.

pub mod bucket;
pub mod trie;

use std::fs::File;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use byteorder::{ByteOrder, LittleEndian};
use error::Result;
use index_record::Key;
use value::FieldFormat;

use self::bucket::BucketPage;
use self::trie::{Trie, GLOBAL_DEPTH};

pub const DEFAULT_BUCKET_FACTOR: usize = 4;

/// Top 16 bits of a key's 32-bit hash, MSB-first, used to walk the trie.
/// Strings (and compound tuple keys) go through SHA-256; integers and
/// floats use their bit pattern directly, per §4.5's "mask to 32 bits" rule.
fn hash_top16(key: &Key) -> u16 {
	let hash32 = match key {
		Key::Int(v) => *v as u32,
		Key::Float(v) => v.to_bits(),
		Key::Str(s) => sha256_low32(s.as_bytes()),
		Key::TupleInt(v) => {
			let mut bytes = Vec::with_capacity(v.len() * 4);
			for x in v {
				bytes.extend_from_slice(&x.to_le_bytes());
			}
			sha256_low32(&bytes)
		}
		Key::TupleFloat(v) => {
			let mut bytes = Vec::with_capacity(v.len() * 4);
			for x in v {
				bytes.extend_from_slice(&x.to_bits().to_le_bytes());
			}
			sha256_low32(&bytes)
		}
	};
	(hash32 >> 16) as u16
}

fn sha256_low32(bytes: &[u8]) -> u32 {
	let digest = Sha256::digest(bytes);
	LittleEndian::read_u32(&digest[digest.len() - 4..])
}

pub struct HashIndex {
	db_path: PathBuf,
	tree_path: PathBuf,
	format: FieldFormat,
	capacity: usize,
}

impl HashIndex {
	pub fn build(db_path: PathBuf, tree_path: PathBuf, format: FieldFormat, capacity: usize) -> Result<HashIndex> {
		bucket::build_db(&db_path)?;
		let mut f = bucket::open_db(&db_path)?;
		let root_page = bucket::alloc_page(&mut f, &format, capacity)?;
		Trie::leaf(root_page).save(&tree_path)?;
		Ok(HashIndex {
			db_path,
			tree_path,
			format,
			capacity,
		})
	}

	pub fn open(db_path: PathBuf, tree_path: PathBuf, format: FieldFormat, capacity: usize) -> HashIndex {
		HashIndex {
			db_path,
			tree_path,
			format,
			capacity,
		}
	}

	pub fn build_index<I: IntoIterator<Item = (Key, i32)>>(db_path: PathBuf, tree_path: PathBuf, format: FieldFormat, capacity: usize, entries: I) -> Result<HashIndex> {
		let mut idx = HashIndex::build(db_path, tree_path, format, capacity)?;
		for (key, offset) in entries {
			idx.insert(key, offset)?;
		}
		Ok(idx)
	}

	fn read_chain_entries(&self, f: &mut File, start: i64) -> Result<Vec<(Key, i32)>> {
		let mut out = Vec::new();
		let mut cur = start;
		while cur != bucket::NO_OVERFLOW {
			let page = bucket::read_page(f, cur, &self.format, self.capacity)?;
			out.extend(page.entries.clone());
			cur = page.next_overflow;
		}
		Ok(out)
	}

	fn try_insert_chain(&self, f: &mut File, start: i64, key: &Key, offset: i32) -> Result<bool> {
		let mut cur = start;
		loop {
			let mut page = bucket::read_page(f, cur, &self.format, self.capacity)?;
			if page.entries.len() < self.capacity {
				page.entries.push((key.clone(), offset));
				bucket::write_page(f, &page, &self.format, self.capacity)?;
				return Ok(true);
			}
			if page.next_overflow == bucket::NO_OVERFLOW {
				return Ok(false);
			}
			cur = page.next_overflow;
		}
	}

	fn extend_overflow(&self, f: &mut File, start: i64, key: &Key, offset: i32) -> Result<()> {
		let mut last_off = start;
		loop {
			let page = bucket::read_page(f, last_off, &self.format, self.capacity)?;
			if page.next_overflow == bucket::NO_OVERFLOW {
				break;
			}
			last_off = page.next_overflow;
		}
		let new_off = bucket::alloc_page(f, &self.format, self.capacity)?;
		let new_page = BucketPage {
			offset: new_off,
			entries: vec![(key.clone(), offset)],
			next_overflow: bucket::NO_OVERFLOW,
		};
		bucket::write_page(f, &new_page, &self.format, self.capacity)?;

		let mut last = bucket::read_page(f, last_off, &self.format, self.capacity)?;
		last.next_overflow = new_off;
		bucket::write_page(f, &last, &self.format, self.capacity)?;
		Ok(())
	}

	/// Builds a balanced replacement subtree for `entries`, splitting on
	/// successive hash bits until each leaf's chain fits in one page or
	/// `GLOBAL_DEPTH` is reached (at which point excess entries overflow).
	fn build_subtree(&self, f: &mut File, entries: Vec<(Key, i32)>, depth: usize) -> Result<Trie> {
		if entries.len() <= self.capacity || depth >= GLOBAL_DEPTH - 1 {
			let primary = bucket::alloc_page(f, &self.format, self.capacity)?;
			let mut chunks = entries.chunks(self.capacity);
			let mut prev_off = primary;
			let mut first = true;
			while let Some(chunk) = chunks.next() {
				let off = if first {
					first = false;
					primary
				} else {
					let o = bucket::alloc_page(f, &self.format, self.capacity)?;
					let mut prev = bucket::read_page(f, prev_off, &self.format, self.capacity)?;
					prev.next_overflow = o;
					bucket::write_page(f, &prev, &self.format, self.capacity)?;
					o
				};
				let page = BucketPage {
					offset: off,
					entries: chunk.to_vec(),
					next_overflow: bucket::NO_OVERFLOW,
				};
				bucket::write_page(f, &page, &self.format, self.capacity)?;
				prev_off = off;
			}
			return Ok(Trie::leaf(primary));
		}

		let mut left = Vec::new();
		let mut right = Vec::new();
		for (key, offset) in entries {
			if trie::bit_at(hash_top16(&key), depth) == 0 {
				left.push((key, offset));
			} else {
				right.push((key, offset));
			}
		}
		let left_trie = self.build_subtree(f, left, depth + 1)?;
		let right_trie = self.build_subtree(f, right, depth + 1)?;
		Ok(Trie::Internal(Box::new(left_trie), Box::new(right_trie)))
	}

	pub fn insert(&mut self, key: Key, offset: i32) -> Result<()> {
		let trie = Trie::load(&self.tree_path)?;
		let hash = hash_top16(&key);
		let (leaf_off, depth) = trie.locate(hash);

		let mut f = bucket::open_db(&self.db_path)?;
		if self.try_insert_chain(&mut f, leaf_off, &key, offset)? {
			return Ok(());
		}

		if depth >= GLOBAL_DEPTH - 1 {
			self.extend_overflow(&mut f, leaf_off, &key, offset)?;
			return Ok(());
		}

		let mut entries = self.read_chain_entries(&mut f, leaf_off)?;
		entries.push((key, offset));
		let new_subtree = self.build_subtree(&mut f, entries, depth)?;
		let new_trie = trie.replace_leaf(hash, depth, new_subtree);
		new_trie.save(&self.tree_path)?;
		Ok(())
	}

	pub fn search(&self, key: &Key) -> Result<Vec<i32>> {
		let trie = Trie::load(&self.tree_path)?;
		let hash = hash_top16(key);
		let (leaf_off, _depth) = trie.locate(hash);
		let mut f = bucket::open_db(&self.db_path)?;
		let entries = self.read_chain_entries(&mut f, leaf_off)?;
		Ok(entries.into_iter().filter(|(k, _)| k == key).map(|(_, o)| o).collect())
	}

	/// Removes the first `(key, offset)` match, unlinking any overflow page
	/// left empty by the removal. No trie shrinking.
	pub fn delete(&mut self, key: &Key, offset: i32) -> Result<bool> {
		let trie = Trie::load(&self.tree_path)?;
		let hash = hash_top16(key);
		let (leaf_off, _depth) = trie.locate(hash);
		let mut f = bucket::open_db(&self.db_path)?;

		let mut prev_off: Option<i64> = None;
		let mut cur = leaf_off;
		loop {
			let mut page = bucket::read_page(&mut f, cur, &self.format, self.capacity)?;
			if let Some(idx) = page.entries.iter().position(|(k, o)| k == key && *o == offset) {
				page.entries.remove(idx);
				let now_empty = page.entries.is_empty();
				let next = page.next_overflow;
				bucket::write_page(&mut f, &page, &self.format, self.capacity)?;

				if now_empty {
					if let Some(prev_off) = prev_off {
						let mut prev = bucket::read_page(&mut f, prev_off, &self.format, self.capacity)?;
						prev.next_overflow = next;
						bucket::write_page(&mut f, &prev, &self.format, self.capacity)?;
					}
				}
				return Ok(true);
			}
			if page.next_overflow == bucket::NO_OVERFLOW {
				return Ok(false);
			}
			prev_off = Some(cur);
			cur = page.next_overflow;
		}
	}

	/// Every `(key, offset)` pair across all leaf chains.
	pub fn scan_all(&self) -> Result<Vec<(Key, i32)>> {
		let trie = Trie::load(&self.tree_path)?;
		let mut f = bucket::open_db(&self.db_path)?;
		let mut out = Vec::new();
		for leaf_off in trie.leaves() {
			out.extend(self.read_chain_entries(&mut f, leaf_off)?);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn open_int_index(capacity: usize) -> (tempfile::TempDir, HashIndex) {
		let dir = tempdir().unwrap();
		let db = dir.path().join("t.id.hash.db");
		let tree = dir.path().join("t.id.hash.tree");
		let idx = HashIndex::build(db, tree, FieldFormat::Int, capacity).unwrap();
		(dir, idx)
	}

	#[test]
	fn insert_and_search() {
		let (_dir, mut idx) = open_int_index(4);
		for i in 0..40 {
			idx.insert(Key::Int(i), i * 7).unwrap();
		}
		for i in 0..40 {
			assert_eq!(idx.search(&Key::Int(i)).unwrap(), vec![i * 7]);
		}
	}

	#[test]
	fn overflow_chain_on_identical_keys() {
		// all inserts share one key, so the bucket can never split on hash
		// bits; once depth hits GLOBAL_DEPTH-1 it must chain via overflow.
		let (_dir, mut idx) = open_int_index(4);
		for i in 0..9 {
			idx.insert(Key::Int(7), i).unwrap();
		}
		let mut hits = idx.search(&Key::Int(7)).unwrap();
		hits.sort();
		assert_eq!(hits, (0..9).collect::<Vec<_>>());
	}

	#[test]
	fn delete_then_search_empty() {
		let (_dir, mut idx) = open_int_index(4);
		idx.insert(Key::Int(1), 100).unwrap();
		idx.insert(Key::Int(1), 200).unwrap();
		assert!(idx.delete(&Key::Int(1), 100).unwrap());
		assert!(!idx.delete(&Key::Int(1), 100).unwrap());
		assert_eq!(idx.search(&Key::Int(1)).unwrap(), vec![200]);
	}

	#[test]
	fn scan_all_covers_every_entry() {
		let (_dir, mut idx) = open_int_index(4);
		for i in 0..30 {
			idx.insert(Key::Int(i), i).unwrap();
		}
		let mut all: Vec<i32> = idx
			.scan_all()
			.unwrap()
			.into_iter()
			.map(|(k, _)| match k {
				Key::Int(v) => v,
				_ => unreachable!(),
			})
			.collect();
		all.sort();
		assert_eq!(all, (0..30).collect::<Vec<_>>());
	}
}
