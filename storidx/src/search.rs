//! Search Facade: dispatches a query against whichever secondary index is
//! present on `(table, field)`, falling back to the heap's own linear scan
//! when none is. Grounded in `testing/testallidx.py`'s `search_by_field`/
//! `search_seq_idx`/`search_hash_idx`/`search_btree_idx`/`search_rtree_record`
//! call shapes, which this module's method names mirror.

use catalog::{key_from_value, Catalog, IndexKind};
use error::{ErrorKind, Result};
use record::Record;
use spimi::{SpimiIndex, SpimiIndexer};
use value::Value;

/// Thin dispatcher over a `Catalog`: every method resolves its own index
/// preference at call time, so it stays correct as indexes are created and
/// dropped between calls.
pub struct Search<'a> {
	catalog: &'a Catalog,
}

impl<'a> Search<'a> {
	pub fn new(catalog: &'a Catalog) -> Search<'a> {
		Search { catalog }
	}

	fn offsets_to_records(&self, table: &str, offsets: Vec<i32>) -> Result<Vec<Record>> {
		offsets.into_iter().map(|off| self.catalog.fetch_by_offset(table, off)).collect()
	}

	/// Equality lookup, preferring hash, then B+ tree, then sequential, then
	/// an R-tree point query, falling back to the heap's linear scan if
	/// `field` carries no index at all.
	pub fn search_point(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
		if self.catalog.check_idx(table, field, IndexKind::Hash)? {
			let key = key_from_value(value)?;
			return self.offsets_to_records(table, self.catalog.open_hash(table, field)?.search(&key)?);
		}
		if self.catalog.check_idx(table, field, IndexKind::BTree)? {
			let key = key_from_value(value)?;
			return self.offsets_to_records(table, self.catalog.open_btree(table, field)?.search(&key)?);
		}
		if self.catalog.check_idx(table, field, IndexKind::Sequential)? {
			let key = key_from_value(value)?;
			return self.offsets_to_records(table, self.catalog.open_seq(table, field)?.search(&key)?);
		}
		if self.catalog.check_idx(table, field, IndexKind::RTree)? {
			let key = key_from_value(value)?;
			return self.offsets_to_records(table, self.catalog.open_rtree(table, field)?.search_bounds(&key)?);
		}
		self.catalog.search_by_field(table, field, value)
	}

	/// Inclusive range query, preferring B+ tree over sequential. Errors if
	/// the only index present is a hash (no range order) or r-tree (no
	/// linear order).
	pub fn search_range(&self, table: &str, field: &str, lo: &Value, hi: &Value) -> Result<Vec<Record>> {
		let lo_key = key_from_value(lo)?;
		let hi_key = key_from_value(hi)?;

		if self.catalog.check_idx(table, field, IndexKind::BTree)? {
			let hits = self.catalog.open_btree(table, field)?.range_search(&lo_key, &hi_key)?;
			return self.offsets_to_records(table, hits.into_iter().map(|(_, off)| off).collect());
		}
		if self.catalog.check_idx(table, field, IndexKind::Sequential)? {
			let hits = self.catalog.open_seq(table, field)?.range_search(&lo_key, &hi_key)?;
			return self.offsets_to_records(table, hits.into_iter().map(|(_, off)| off).collect());
		}
		if self.catalog.check_idx(table, field, IndexKind::Hash)? {
			bail!(ErrorKind::UnsupportedFormat("hash".into(), "range query"));
		}
		if self.catalog.check_idx(table, field, IndexKind::RTree)? {
			bail!(ErrorKind::UnsupportedFormat("r-tree".into(), "range query"));
		}
		bail!(ErrorKind::IndexMissing(table.to_owned(), field.to_owned(), "b+tree or sequential"));
	}

	/// Entries whose spatial key intersects `value`'s box/point, per §4.6.
	pub fn search_spatial_intersection(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
		let key = key_from_value(value)?;
		let hits = self.catalog.open_rtree(table, field)?.search_intersection(&key)?;
		self.offsets_to_records(table, hits)
	}

	/// Entries within `radius` of `value`'s center.
	pub fn search_spatial_radius(&self, table: &str, field: &str, value: &Value, radius: f32) -> Result<Vec<Record>> {
		let key = key_from_value(value)?;
		let hits = self.catalog.open_rtree(table, field)?.search_radius(&key, radius)?;
		self.offsets_to_records(table, hits)
	}

	/// The `k` nearest entries to `value`.
	pub fn search_spatial_knn(&self, table: &str, field: &str, value: &Value, k: usize) -> Result<Vec<Record>> {
		let key = key_from_value(value)?;
		let hits = self.catalog.open_rtree(table, field)?.search_knn(&key, k)?;
		self.offsets_to_records(table, hits)
	}

	/// Cosine-similarity text search against a previously built SPIMI index
	/// for `table` (see `SpimiIndexer::build_index`). Errors with
	/// `IndexMissing` if no inverted index has been built over `table` yet.
	pub fn search_text(&self, indexer: &SpimiIndexer, table: &str, query: &str, k: usize) -> Result<Vec<(Record, f64)>> {
		let index = SpimiIndex::existing(table);
		if !self.catalog.check_table_exists(index.inverted_table()) {
			bail!(ErrorKind::IndexMissing(table.to_owned(), "<text fields>".to_owned(), "spimi"));
		}
		indexer.cosine_search(self.catalog, &index, query, k)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use catalog::Catalog;
	use options::{BTreeOptions, HashOptions, SpimiOptions};
	use schema::Schema;
	use tempfile::tempdir;

	fn sample_schema() -> Schema {
		Schema::new("widgets", &[("id", "i"), ("ciclo", "i"), ("nombre", "10s")], Some("id")).unwrap()
	}

	fn populate(cat: &Catalog) {
		cat.create_table(&sample_schema()).unwrap();
		for i in 0..10 {
			cat.insert_record(
				"widgets",
				Record::new(vec![Value::Int(i), Value::Int(i % 3), Value::Str(format!("n{}", i))]),
			)
			.unwrap();
		}
	}

	#[test]
	fn point_search_falls_back_to_heap_scan_without_an_index() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		populate(&cat);
		let search = Search::new(&cat);

		let found = search.search_point("widgets", "id", &Value::Int(4)).unwrap();
		assert_eq!(found.len(), 1);
	}

	#[test]
	fn point_search_prefers_hash_index_when_present() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		populate(&cat);
		cat.create_hash_idx("widgets", "nombre", HashOptions::default()).unwrap();
		let search = Search::new(&cat);

		let found = search.search_point("widgets", "nombre", &Value::Str("n7".into())).unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].values[0], Value::Int(7));
	}

	#[test]
	fn range_search_uses_btree_and_errors_without_ordered_index() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		populate(&cat);
		cat.create_btree_idx("widgets", "id", BTreeOptions::default()).unwrap();
		let search = Search::new(&cat);

		let found = search.search_range("widgets", "id", &Value::Int(3), &Value::Int(6)).unwrap();
		assert_eq!(found.len(), 4);

		assert!(search.search_range("widgets", "ciclo", &Value::Int(0), &Value::Int(2)).is_err());
	}

	#[test]
	fn text_search_errors_before_an_index_is_built() {
		let dir = tempdir().unwrap();
		let cat = Catalog::new(dir.path());
		let schema = Schema::new("docs", &[("id", "i"), ("body", "text")], Some("id")).unwrap();
		cat.create_table(&schema).unwrap();
		let search = Search::new(&cat);
		let indexer = SpimiIndexer::new(SpimiOptions::default()).unwrap();

		assert!(search.search_text(&indexer, "docs", "anything", 3).is_err());
	}
}
