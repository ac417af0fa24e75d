//! End-to-end scenarios exercising the full stack through the public
//! `Catalog`/`Search` facade, mirroring the numbered scenarios in the design
//! notes this crate was built against.

extern crate env_logger;
extern crate storidx;
extern crate tempfile;

use storidx::{BTreeOptions, Catalog, HashOptions, Record, Schema, Search, SpimiIndexer, SpimiOptions, Value};
use tempfile::tempdir;

#[test]
fn schema_heap_roundtrip_reuses_freed_offset() {
	let _ = env_logger::try_init();
	let dir = tempdir().unwrap();
	let cat = Catalog::new(dir.path());
	let schema = Schema::new("t", &[("id", "i"), ("name", "20s"), ("price", "f")], Some("id")).unwrap();
	cat.create_table(&schema).unwrap();

	cat.insert_record("t", Record::new(vec![Value::Int(1), Value::Str("Galletas".into()), Value::Float(3.5)])).unwrap();
	let second = cat
		.insert_record("t", Record::new(vec![Value::Int(2), Value::Str("Chocolate".into()), Value::Float(5.2)]))
		.unwrap();
	cat.insert_record("t", Record::new(vec![Value::Int(3), Value::Str("Caramelos".into()), Value::Float(1.75)])).unwrap();

	let hit = cat.search_by_field("t", "id", &Value::Int(2)).unwrap();
	assert_eq!(hit.len(), 1);
	assert_eq!(hit[0].values[1], Value::Str("Chocolate".into()));

	cat.delete_record("t", &Value::Int(2)).unwrap();
	assert!(cat.search_by_field("t", "id", &Value::Int(2)).unwrap().is_empty());

	let reused = cat
		.insert_record("t", Record::new(vec![Value::Int(4), Value::Str("Cereal".into()), Value::Float(4.0)]))
		.unwrap();
	assert_eq!(reused, second, "the only freed slot should be reused by the next insert");
}

#[test]
fn cross_index_consistency_survives_bulk_insert_and_delete() {
	let _ = env_logger::try_init();
	let dir = tempdir().unwrap();
	let cat = Catalog::new(dir.path());
	let schema = Schema::new("rows", &[("id", "i"), ("ciclo", "i"), ("nombre", "10s")], Some("id")).unwrap();
	cat.create_table(&schema).unwrap();
	cat.create_btree_idx("rows", "ciclo", BTreeOptions::default()).unwrap();
	cat.create_hash_idx("rows", "nombre", HashOptions::default()).unwrap();

	let rows: Vec<(i32, i32, String)> = (0..1000).map(|i| (i, i % 37, format!("n{}", i))).collect();
	for (id, ciclo, ref nombre) in &rows {
		cat.insert_record("rows", Record::new(vec![Value::Int(*id), Value::Int(*ciclo), Value::Str(nombre.clone())])).unwrap();
	}

	let search = Search::new(&cat);
	for (id, ciclo, ref nombre) in &rows {
		let by_ciclo = search.search_point("rows", "ciclo", &Value::Int(*ciclo)).unwrap();
		assert!(by_ciclo.iter().any(|r| r.values[0] == Value::Int(*id)));
		let by_nombre = search.search_point("rows", "nombre", &Value::Str(nombre.clone())).unwrap();
		assert_eq!(by_nombre.len(), 1);
		assert_eq!(by_nombre[0].values[0], Value::Int(*id));
	}

	let deleted: Vec<i32> = (0..100).map(|i| i * 7).collect();
	for id in &deleted {
		cat.delete_record("rows", &Value::Int(*id)).unwrap();
	}

	for (id, ciclo, ref nombre) in &rows {
		if deleted.contains(id) {
			assert!(search.search_point("rows", "nombre", &Value::Str(nombre.clone())).unwrap().is_empty());
			continue;
		}
		let by_ciclo = search.search_point("rows", "ciclo", &Value::Int(*ciclo)).unwrap();
		assert!(by_ciclo.iter().any(|r| r.values[0] == Value::Int(*id)));
		let by_nombre = search.search_point("rows", "nombre", &Value::Str(nombre.clone())).unwrap();
		assert_eq!(by_nombre.len(), 1);
	}
}

#[test]
fn cosine_text_search_ranks_repeated_term_highest() {
	let _ = env_logger::try_init();
	let dir = tempdir().unwrap();
	let cat = Catalog::new(dir.path());
	let schema = Schema::new("docs", &[("id", "i"), ("body", "text")], Some("id")).unwrap();
	cat.create_table(&schema).unwrap();

	cat.insert_record("docs", Record::new(vec![Value::Int(1), Value::Text("hello world".into())])).unwrap();
	cat.insert_record("docs", Record::new(vec![Value::Int(2), Value::Text("goodbye world".into())])).unwrap();
	cat.insert_record("docs", Record::new(vec![Value::Int(3), Value::Text("hello hello again".into())])).unwrap();

	let indexer = SpimiIndexer::new(SpimiOptions::default()).unwrap();
	indexer.build_index(&cat, "docs").unwrap();

	let results = Search::new(&cat).search_text(&indexer, "docs", "hello", 3).unwrap();
	let ids: Vec<i32> = results
		.iter()
		.map(|(record, _)| match record.values[0] {
			Value::Int(v) => v,
			_ => unreachable!(),
		})
		.collect();

	assert_eq!(ids.first(), Some(&3), "doc 3 repeats `hello` and should rank first");
	assert!(ids.contains(&1));
	assert!(!ids.contains(&2), "doc 2 never mentions `hello` and should not be returned");
}
