extern crate clap;
extern crate env_logger;
extern crate storidx;

use clap::{App, Arg, ArgMatches, SubCommand};

use storidx::{BTreeOptions, Catalog, FieldFormat, HashOptions, Record, Schema, Search, SpimiIndexer, SpimiOptions, Value};

/// Parses a `"name:tag,name:tag,..."` field spec into owned `(name, tag)` pairs.
fn parse_fields(spec: &str) -> Vec<(String, String)> {
	spec.split(',')
		.map(|part| {
			let mut halves = part.splitn(2, ':');
			let name = halves.next().unwrap_or("").trim().to_owned();
			let tag = halves.next().unwrap_or("").trim().to_owned();
			(name, tag)
		})
		.collect()
}

/// Parses one comma-separated `"1,Widget,3.5"` row against `schema`, in
/// field order. Tuple-typed fields take `;`-separated components.
fn parse_row(schema: &Schema, raw: &str) -> Result<Record, String> {
	let parts: Vec<&str> = raw.split(',').collect();
	if parts.len() != schema.fields.len() {
		return Err(format!("expected {} values, got {}", schema.fields.len(), parts.len()));
	}
	let mut values = Vec::with_capacity(parts.len());
	for (field, part) in schema.fields.iter().zip(parts) {
		values.push(parse_value(part.trim(), field.format).map_err(|e| format!("field `{}`: {}", field.name, e))?);
	}
	Ok(Record::new(values))
}

fn parse_value(raw: &str, format: FieldFormat) -> Result<Value, String> {
	match format {
		FieldFormat::Int => raw.parse::<i32>().map(Value::Int).map_err(|e| e.to_string()),
		FieldFormat::Float => raw.parse::<f32>().map(Value::Float).map_err(|e| e.to_string()),
		FieldFormat::Bool => raw.parse::<bool>().map(Value::Bool).map_err(|e| e.to_string()),
		FieldFormat::Str(_) => Ok(Value::Str(raw.to_owned())),
		FieldFormat::Text => Ok(Value::Text(raw.to_owned())),
		FieldFormat::TupleInt(n) => {
			let v: Result<Vec<i32>, _> = raw.split(';').map(|s| s.parse::<i32>()).collect();
			let v = v.map_err(|e| e.to_string())?;
			if v.len() != n {
				return Err(format!("expected {} components, got {}", n, v.len()));
			}
			Ok(Value::TupleInt(v))
		}
		FieldFormat::TupleFloat(n) => {
			let v: Result<Vec<f32>, _> = raw.split(';').map(|s| s.parse::<f32>()).collect();
			let v = v.map_err(|e| e.to_string())?;
			if v.len() != n {
				return Err(format!("expected {} components, got {}", n, v.len()));
			}
			Ok(Value::TupleFloat(v))
		}
		FieldFormat::Sound => Err("sound fields are not settable from the cli".to_owned()),
	}
}

fn index_kind(name: &str) -> Option<(&'static str, fn(&Catalog, &str, &str) -> storidx::Result<()>)> {
	match name {
		"btree" => Some(("btree", |cat, table, field| cat.create_btree_idx(table, field, BTreeOptions::default()))),
		"hash" => Some(("hash", |cat, table, field| cat.create_hash_idx(table, field, HashOptions::default()))),
		"seq" => Some(("seq", |cat, table, field| cat.create_seq_idx(table, field))),
		"rtree" => Some(("rtree", |cat, table, field| cat.create_rtree_idx(table, field))),
		_ => None,
	}
}

fn db_and_table<'a>(m: &'a ArgMatches) -> (&'a str, &'a str) {
	(m.value_of("DB").expect("--db is required"), m.value_of("TABLE").expect("--table is required"))
}

fn main() {
	env_logger::init();

	let db_arg = Arg::with_name("DB").short("d").long("db").takes_value(true).required(true);
	let table_arg = Arg::with_name("TABLE").short("t").long("table").takes_value(true).required(true);
	let field_arg = Arg::with_name("FIELD").short("f").long("field").takes_value(true).required(true);

	let matches = App::new("storidx-cli")
		.version("0.1.0")
		.about("Demo CLI over the storidx relational storage engine")
		.subcommand(
			SubCommand::with_name("create-table")
				.arg(db_arg.clone())
				.arg(table_arg.clone())
				.arg(Arg::with_name("FIELDS").long("fields").takes_value(true).required(true).help("name:tag,name:tag,..."))
				.arg(Arg::with_name("PK").long("pk").takes_value(true)),
		)
		.subcommand(SubCommand::with_name("insert").arg(db_arg.clone()).arg(table_arg.clone()).arg(
			Arg::with_name("VALUES").long("values").takes_value(true).required(true).help("comma-separated row, in field order"),
		))
		.subcommand(
			SubCommand::with_name("delete")
				.arg(db_arg.clone())
				.arg(table_arg.clone())
				.arg(Arg::with_name("PK_VALUE").long("pk-value").takes_value(true).required(true)),
		)
		.subcommand(
			SubCommand::with_name("get")
				.arg(db_arg.clone())
				.arg(table_arg.clone())
				.arg(field_arg.clone())
				.arg(Arg::with_name("VALUE").long("value").takes_value(true).required(true)),
		)
		.subcommand(
			SubCommand::with_name("build-index")
				.arg(db_arg.clone())
				.arg(table_arg.clone())
				.arg(field_arg.clone())
				.arg(Arg::with_name("KIND").long("kind").takes_value(true).required(true).help("btree|hash|seq|rtree")),
		)
		.subcommand(SubCommand::with_name("build-text-index").arg(db_arg.clone()).arg(table_arg.clone()))
		.subcommand(
			SubCommand::with_name("search-text")
				.arg(db_arg.clone())
				.arg(table_arg.clone())
				.arg(Arg::with_name("QUERY").long("query").takes_value(true).required(true))
				.arg(Arg::with_name("K").long("k").takes_value(true).default_value("5")),
		)
		.get_matches();

	match matches.subcommand() {
		("create-table", Some(m)) => {
			let (db, table) = db_and_table(m);
			let parsed = parse_fields(m.value_of("FIELDS").unwrap());
			let fields: Vec<(&str, &str)> = parsed.iter().map(|(n, t)| (n.as_str(), t.as_str())).collect();
			let schema = Schema::new(table, &fields, m.value_of("PK")).expect("invalid schema");
			Catalog::new(db).create_table(&schema).expect("create_table failed");
			println!("created table `{}`", table);
		}
		("insert", Some(m)) => {
			let (db, table) = db_and_table(m);
			let cat = Catalog::new(db);
			let schema = cat.get_table_schema(table).expect("no such table");
			let record = parse_row(&schema, m.value_of("VALUES").unwrap()).expect("bad row");
			let offset = cat.insert_record(table, record).expect("insert failed");
			println!("inserted at offset {}", offset);
		}
		("delete", Some(m)) => {
			let (db, table) = db_and_table(m);
			let cat = Catalog::new(db);
			let schema = cat.get_table_schema(table).expect("no such table");
			let pk_name = schema.primary_key_name().expect("table has no primary key");
			let pk_format = schema.field(pk_name).unwrap().format;
			let pk_value = parse_value(m.value_of("PK_VALUE").unwrap(), pk_format).expect("bad pk value");
			cat.delete_record(table, &pk_value).expect("delete failed");
			println!("deleted");
		}
		("get", Some(m)) => {
			let (db, table) = db_and_table(m);
			let cat = Catalog::new(db);
			let schema = cat.get_table_schema(table).expect("no such table");
			let field_name = m.value_of("FIELD").unwrap();
			let format = schema.field(field_name).expect("no such field").format;
			let value = parse_value(m.value_of("VALUE").unwrap(), format).expect("bad value");
			let rows = Search::new(&cat).search_point(table, field_name, &value).expect("search failed");
			for row in &rows {
				println!("{:?}", row);
			}
			println!("{} row(s)", rows.len());
		}
		("build-index", Some(m)) => {
			let (db, table) = db_and_table(m);
			let cat = Catalog::new(db);
			let field = m.value_of("FIELD").unwrap();
			let (tag, build) = index_kind(m.value_of("KIND").unwrap()).expect("unknown index kind");
			build(&cat, table, field).expect("index build failed");
			println!("built {} index on {}.{}", tag, table, field);
		}
		("build-text-index", Some(m)) => {
			let (db, table) = db_and_table(m);
			let cat = Catalog::new(db);
			let indexer = SpimiIndexer::new(SpimiOptions::default()).expect("invalid spimi options");
			let index = indexer.build_index(&cat, table).expect("build_index failed");
			println!("built text index: {} / {}", index.inverted_table(), index.norms_table());
		}
		("search-text", Some(m)) => {
			let (db, table) = db_and_table(m);
			let cat = Catalog::new(db);
			let indexer = SpimiIndexer::new(SpimiOptions::default()).expect("invalid spimi options");
			let k: usize = m.value_of("K").unwrap().parse().expect("--k must be a number");
			let results = Search::new(&cat)
				.search_text(&indexer, table, m.value_of("QUERY").unwrap(), k)
				.expect("search_text failed");
			for (record, score) in &results {
				println!("{:.5}  {:?}", score, record);
			}
		}
		_ => {
			println!("no subcommand given; run with --help");
		}
	}
}
