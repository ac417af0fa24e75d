//! SPIMI-style external-memory inverted index builder: bounded-memory block
//! construction, a streaming k-way merge that computes TF-IDF and emits
//! postings one term at a time, and cosine-similarity search against the
//! result. Mirrors `indexing/Spimi.py` and `indexing/utils_spimi.py`, routed
//! through the catalog the same way the original routes through `HeapFile`
//! and `ExtendibleHashIndex`.

pub mod preprocess;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use rust_stemmers::Stemmer;

use catalog::Catalog;
use error::Result;
use options::{HashOptions, InternalSpimiOptions, SpimiOptions};
use record::Record;
use schema::Schema;
use value::Value;

use self::preprocess::{default_stemmer, preprocess};

const EPSILON: f64 = 1e-10;

fn inverted_table_name(source: &str) -> String {
	format!("{}_inverted", source)
}

fn norms_table_name(source: &str) -> String {
	format!("{}_inverted_norms", source)
}

fn round5(x: f64) -> f64 {
	(x * 100_000.0).round() / 100_000.0
}

/// A built inverted index + norms table pair over one source table's `TEXT`
/// fields, returned by `SpimiIndexer::build_index` and consumed by
/// `SpimiIndexer::cosine_search`.
#[derive(Debug, Clone)]
pub struct SpimiIndex {
	source_table: String,
	inverted_table: String,
	norms_table: String,
}

impl SpimiIndex {
	pub fn inverted_table(&self) -> &str {
		&self.inverted_table
	}

	pub fn norms_table(&self) -> &str {
		&self.norms_table
	}

	/// Reconstructs the handle for a previously built index over
	/// `source_table` without rebuilding it. Callers should confirm
	/// `inverted_table()` exists via `Catalog::check_table_exists` first.
	pub fn existing(source_table: &str) -> SpimiIndex {
		SpimiIndex {
			source_table: source_table.to_owned(),
			inverted_table: inverted_table_name(source_table),
			norms_table: norms_table_name(source_table),
		}
	}
}

/// Builds and searches a SPIMI inverted index. Stateless aside from its
/// injected preprocessing configuration, so one indexer can build or query
/// indexes for any number of tables.
pub struct SpimiIndexer {
	options: InternalSpimiOptions,
	stemmer: Stemmer,
}

impl SpimiIndexer {
	pub fn new(options: SpimiOptions) -> Result<SpimiIndexer> {
		Ok(SpimiIndexer {
			options: options.validate()?,
			stemmer: default_stemmer(),
		})
	}

	fn tokens(&self, text: &str) -> Vec<String> {
		preprocess(text, &self.options.stopwords, &self.stemmer)
	}

	/// Builds the inverted index and TF-IDF norms table over every live
	/// `TEXT` field of `source_table`. Replaces a previously built index for
	/// the same source table, if one exists.
	pub fn build_index(&self, catalog: &Catalog, source_table: &str) -> Result<SpimiIndex> {
		let block_dir = catalog.blocks_dir(source_table);
		fs::create_dir_all(&block_dir)?;

		let docs = catalog.text_documents(source_table)?;
		let doc_count = docs.len() as i32;

		let block_paths = self.dump_blocks(&block_dir, &docs)?;
		let result = self.streaming_merge(catalog, source_table, &block_paths, doc_count);

		for path in &block_paths {
			let _ = fs::remove_file(path);
		}
		let _ = fs::remove_dir(&block_dir);
		result
	}

	/// Accumulates `term -> doc_id -> count` in memory, flushing a
	/// sorted block to disk whenever the tracked approximate size crosses
	/// `memory_limit_bytes`. Matches `_process_documents`/`_dump_block`'s
	/// block-and-flush shape; `sys.getsizeof` is approximated here by
	/// tracking bytes added on each new (term, doc) pair.
	fn dump_blocks(&self, block_dir: &Path, docs: &[(i32, String)]) -> Result<Vec<PathBuf>> {
		let mut term_dict: BTreeMap<String, BTreeMap<i32, i32>> = BTreeMap::new();
		let mut block_paths = Vec::new();
		let mut approx_bytes = 0usize;

		for &(doc_id, ref text) in docs {
			for token in self.tokens(text) {
				let postings = term_dict.entry(token.clone()).or_insert_with(BTreeMap::new);
				let counter = postings.entry(doc_id).or_insert(0);
				if *counter == 0 {
					approx_bytes += token.len() + 16;
				}
				*counter += 1;

				if approx_bytes >= self.options.memory_limit_bytes {
					block_paths.push(flush_block(block_dir, block_paths.len(), &term_dict)?);
					term_dict.clear();
					approx_bytes = 0;
				}
			}
		}
		if !term_dict.is_empty() {
			block_paths.push(flush_block(block_dir, block_paths.len(), &term_dict)?);
		}
		Ok(block_paths)
	}

	/// Merges the sorted blocks with a min-heap k-way merge, computing
	/// TF-IDF per term and streaming each posting list straight to the
	/// inverted-index table without ever holding the full index in memory.
	fn streaming_merge(&self, catalog: &Catalog, source_table: &str, block_paths: &[PathBuf], doc_count: i32) -> Result<SpimiIndex> {
		let inverted_table = inverted_table_name(source_table);
		let norms_table = norms_table_name(source_table);

		if catalog.check_table_exists(&inverted_table) {
			catalog.drop_table(&inverted_table)?;
		}
		if catalog.check_table_exists(&norms_table) {
			catalog.drop_table(&norms_table)?;
		}

		catalog.create_table(&Schema::new(&inverted_table, &[("term", "50s"), ("postings", "text")], Some("term"))?)?;
		catalog.create_table(&Schema::new(&norms_table, &[("doc_id", "i"), ("norm", "f")], Some("doc_id"))?)?;

		let mut readers: Vec<BlockReader> = block_paths.iter().map(|p| BlockReader::open(p)).collect::<Result<_>>()?;
		let mut current: Vec<Option<(String, BTreeMap<i32, i32>)>> = vec![None; readers.len()];
		let mut heap: BinaryHeap<Reverse<(String, usize)>> = BinaryHeap::new();

		for (i, reader) in readers.iter_mut().enumerate() {
			if let Some((term, postings)) = reader.next_term()? {
				heap.push(Reverse((term.clone(), i)));
				current[i] = Some((term, postings));
			}
		}

		let mut doc_norms_sq: HashMap<i32, f64> = HashMap::new();
		let mut terms_merged = 0usize;

		while let Some(Reverse((term, first_idx))) = heap.pop() {
			let mut contributing = vec![first_idx];
			while let Some(&Reverse((ref t, _))) = heap.peek() {
				if *t != term {
					break;
				}
				let Reverse((_, idx)) = heap.pop().unwrap();
				contributing.push(idx);
			}

			let mut combined: BTreeMap<i32, i32> = BTreeMap::new();
			for &idx in &contributing {
				if let Some((_, postings)) = current[idx].take() {
					for (doc_id, count) in postings {
						*combined.entry(doc_id).or_insert(0) += count;
					}
				}
			}

			let df = combined.len();
			let idf = if df > 0 && doc_count > 0 { (f64::from(doc_count) / (df as f64)).ln() } else { 0.0 };

			let mut postings_tfidf: Vec<(i32, f64)> = Vec::with_capacity(combined.len());
			for (&doc_id, &count) in &combined {
				let tf = if count > 0 { 1.0 + f64::from(count).ln() } else { 0.0 };
				let tfidf = round5(tf * idf);
				postings_tfidf.push((doc_id, tfidf));
				*doc_norms_sq.entry(doc_id).or_insert(0.0) += tfidf * tfidf;
			}

			let postings_json = ::serde_json::to_string(&postings_tfidf)?;
			catalog.insert_record(&inverted_table, Record::new(vec![Value::Str(term), Value::Text(postings_json)]))?;
			terms_merged += 1;

			for &idx in &contributing {
				if let Some((next_term, next_postings)) = readers[idx].next_term()? {
					heap.push(Reverse((next_term.clone(), idx)));
					current[idx] = Some((next_term, next_postings));
				}
			}
		}

		for (doc_id, norm_sq) in doc_norms_sq {
			let norm = norm_sq.sqrt();
			catalog.insert_record(&norms_table, Record::new(vec![Value::Int(doc_id), Value::Float(norm as f32)]))?;
		}

		catalog.create_hash_idx(&inverted_table, "term", HashOptions::default())?;
		catalog.create_hash_idx(&norms_table, "doc_id", HashOptions::default())?;

		info!("spimi: built inverted index for `{}` ({} terms, {} docs)", source_table, terms_merged, doc_count);
		Ok(SpimiIndex {
			source_table: source_table.to_owned(),
			inverted_table,
			norms_table,
		})
	}

	/// Cosine-similarity search against a built index: preprocesses the
	/// query, looks up each unique query term's postings by hash, accumulates
	/// `score[doc] += q_t * tfidf`, normalizes by `||q|| * norm(doc) + ε`, and
	/// returns the top-`k` source records by descending similarity.
	pub fn cosine_search(&self, catalog: &Catalog, index: &SpimiIndex, query: &str, k: usize) -> Result<Vec<(Record, f64)>> {
		let tokens = self.tokens(query);
		if tokens.is_empty() || k == 0 {
			return Ok(Vec::new());
		}

		let mut term_counts: HashMap<String, i32> = HashMap::new();
		for t in &tokens {
			*term_counts.entry(t.clone()).or_insert(0) += 1;
		}
		let query_len = tokens.len() as f64;
		let doc_count = catalog.live_record_count(&index.source_table)? as i32;

		let mut scores: HashMap<i32, f64> = HashMap::new();
		let mut query_norm_sq = 0.0f64;

		for (term, count) in &term_counts {
			let postings = self.lookup_postings(catalog, index, term)?;
			let df = postings.len();
			let idf = if df > 0 && doc_count > 0 { (f64::from(doc_count) / (df as f64)).ln() } else { 0.0 };
			let q_t = (f64::from(*count) / query_len) * idf;
			query_norm_sq += q_t * q_t;

			for (doc_id, tfidf) in postings {
				*scores.entry(doc_id).or_insert(0.0) += q_t * tfidf;
			}
		}

		let query_norm = query_norm_sq.sqrt();
		let mut scored: Vec<(i32, f64)> = Vec::with_capacity(scores.len());
		for (doc_id, raw) in scores {
			let doc_norm = self.lookup_norm(catalog, index, doc_id)?;
			let denom = query_norm * doc_norm + EPSILON;
			scored.push((doc_id, raw / denom));
		}

		scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(::std::cmp::Ordering::Equal));
		scored.truncate(k);

		let pk_name = catalog
			.get_table_schema(&index.source_table)?
			.primary_key_name()
			.map(str::to_owned)
			.ok_or_else(|| ::error::ErrorKind::NoPrimaryKey(index.source_table.clone()))?;

		let mut out = Vec::with_capacity(scored.len());
		for (doc_id, score) in scored {
			let rows = catalog.search_by_field(&index.source_table, &pk_name, &Value::Int(doc_id))?;
			if let Some(rec) = rows.into_iter().next() {
				out.push((rec, score));
			}
		}
		debug!("spimi: cosine search over `{}` returned {} of top-{}", index.source_table, out.len(), k);
		Ok(out)
	}

	fn lookup_postings(&self, catalog: &Catalog, index: &SpimiIndex, term: &str) -> Result<Vec<(i32, f64)>> {
		let rows = catalog.search_by_field(&index.inverted_table, "term", &Value::Str(term.to_owned()))?;
		match rows.into_iter().next() {
			Some(row) => match row.values.get(1) {
				Some(&Value::Text(ref s)) => Ok(::serde_json::from_str(s)?),
				_ => Ok(Vec::new()),
			},
			None => Ok(Vec::new()),
		}
	}

	fn lookup_norm(&self, catalog: &Catalog, index: &SpimiIndex, doc_id: i32) -> Result<f64> {
		let rows = catalog.search_by_field(&index.norms_table, "doc_id", &Value::Int(doc_id))?;
		match rows.into_iter().next() {
			Some(row) => match row.values.get(1) {
				Some(&Value::Float(f)) => Ok(f64::from(f)),
				_ => Ok(0.0),
			},
			None => Ok(0.0),
		}
	}
}

fn flush_block(block_dir: &Path, index: usize, term_dict: &BTreeMap<String, BTreeMap<i32, i32>>) -> Result<PathBuf> {
	let path = block_dir.join(format!("block_{}.jsonl", index));
	let mut w = BufWriter::new(File::create(&path)?);
	// `BTreeMap` already iterates in ascending key order, so each block's
	// lines come out term-sorted for the streaming merge's benefit.
	for (term, postings) in term_dict {
		let line = ::serde_json::to_string(&(term, postings))?;
		writeln!(w, "{}", line)?;
	}
	debug!("spimi: flushed block {} ({} terms)", index, term_dict.len());
	Ok(path)
}

/// A single block's forward-only line iterator, yielding terms in ascending
/// order — the streaming counterpart of the original's `iter(block.items())`.
struct BlockReader {
	reader: BufReader<File>,
}

impl BlockReader {
	fn open(path: &Path) -> Result<BlockReader> {
		Ok(BlockReader {
			reader: BufReader::new(File::open(path)?),
		})
	}

	fn next_term(&mut self) -> Result<Option<(String, BTreeMap<i32, i32>)>> {
		let mut line = String::new();
		let n = self.reader.read_line(&mut line)?;
		if n == 0 {
			return Ok(None);
		}
		let parsed: (String, BTreeMap<i32, i32>) = ::serde_json::from_str(line.trim_end())?;
		Ok(Some(parsed))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn indexer(memory_limit_bytes: usize) -> SpimiIndexer {
		SpimiIndexer::new(SpimiOptions {
			memory_limit_bytes,
			stopwords: Some(Default::default()),
		})
		.unwrap()
	}

	fn docs_table(dir: &Path) -> Catalog {
		let cat = Catalog::new(dir);
		let schema = Schema::new("docs", &[("id", "i"), ("body", "text")], Some("id")).unwrap();
		cat.create_table(&schema).unwrap();
		for (id, body) in &[
			(1, "hello world"),
			(2, "goodbye world"),
			(3, "hello hello again"),
		] {
			cat.insert_record("docs", Record::new(vec![Value::Int(*id), Value::Text((*body).to_owned())]))
				.unwrap();
		}
		cat
	}

	#[test]
	fn build_index_ranks_repeated_term_higher() {
		let dir = tempdir().unwrap();
		let cat = docs_table(dir.path());
		let spimi = indexer(4096);
		let index = spimi.build_index(&cat, "docs").unwrap();

		let results = spimi.cosine_search(&cat, &index, "hello", 3).unwrap();
		assert!(!results.is_empty());
		let top_id = match results[0].0.values[0] {
			Value::Int(v) => v,
			_ => unreachable!(),
		};
		assert_eq!(top_id, 3, "doc 3 repeats 'hello' and should score highest");
	}

	#[test]
	fn norms_row_exists_for_every_scored_doc() {
		let dir = tempdir().unwrap();
		let cat = docs_table(dir.path());
		let spimi = indexer(4096);
		let index = spimi.build_index(&cat, "docs").unwrap();

		for doc_id in 1..=3 {
			let rows = cat.search_by_field(index.norms_table(), "doc_id", &Value::Int(doc_id)).unwrap();
			assert_eq!(rows.len(), 1, "doc {} must have a norms row", doc_id);
		}
	}

	#[test]
	fn tiny_memory_budget_still_forces_multiple_blocks() {
		let dir = tempdir().unwrap();
		let cat = docs_table(dir.path());
		let spimi = indexer(1);
		let index = spimi.build_index(&cat, "docs").unwrap();

		let results = spimi.cosine_search(&cat, &index, "world", 10).unwrap();
		let mut ids: Vec<i32> = results
			.iter()
			.map(|(rec, _)| match rec.values[0] {
				Value::Int(v) => v,
				_ => unreachable!(),
			})
			.collect();
		ids.sort();
		assert_eq!(ids, vec![1, 2]);
	}

	#[test]
	fn blocks_directory_is_cleaned_up() {
		let dir = tempdir().unwrap();
		let cat = docs_table(dir.path());
		let spimi = indexer(8);
		spimi.build_index(&cat, "docs").unwrap();
		assert!(!cat.blocks_dir("docs").exists());
	}
}
