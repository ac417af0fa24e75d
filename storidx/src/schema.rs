//! Table schema: an ordered list of named, formatted fields with at most one
//! primary key, persisted alongside the data file as `T.schema.json`.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use error::{ErrorKind, Result};
use value::FieldFormat;

/// One column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
	pub name: String,
	pub format: FieldFormat,
	pub is_primary_key: bool,
}

/// On-disk JSON shape of a schema, matching `T.schema.json`'s
/// `{ table_name, fields: [{name,type,is_primary_key}] }` layout.
#[derive(Debug, Serialize, Deserialize)]
struct SchemaDoc {
	table_name: String,
	fields: Vec<FieldDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FieldDoc {
	name: String,
	#[serde(rename = "type")]
	format: String,
	is_primary_key: bool,
}

/// A table's schema: field list plus the name of the primary-key field, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
	pub table_name: String,
	pub fields: Vec<Field>,
}

impl Schema {
	/// Builds a schema from `(name, format_tag)` pairs, marking `primary_key`
	/// (if given) as the PK field. Mirrors `HeapFile.build_file`'s schema
	/// construction.
	pub fn new(table_name: &str, fields: &[(&str, &str)], primary_key: Option<&str>) -> Result<Schema> {
		let mut built = Vec::with_capacity(fields.len());
		for &(name, fmt) in fields {
			let format = FieldFormat::parse(fmt)?;
			let is_primary_key = Some(name) == primary_key;
			if is_primary_key && !format.is_pk_compatible() {
				bail!(ErrorKind::UnsupportedFormat(fmt.to_owned(), "primary key"));
			}
			built.push(Field {
				name: name.to_owned(),
				format,
				is_primary_key,
			});
		}
		Ok(Schema {
			table_name: table_name.to_owned(),
			fields: built,
		})
	}

	/// Loads a schema from `<path>.schema.json`.
	pub fn load(schema_path: &Path) -> Result<Schema> {
		let mut contents = String::new();
		File::open(schema_path)?.read_to_string(&mut contents)?;
		let doc: SchemaDoc = ::serde_json::from_str(&contents)?;

		let mut fields = Vec::with_capacity(doc.fields.len());
		for f in doc.fields {
			fields.push(Field {
				format: FieldFormat::parse(&f.format)?,
				name: f.name,
				is_primary_key: f.is_primary_key,
			});
		}
		Ok(Schema {
			table_name: doc.table_name,
			fields,
		})
	}

	/// Persists the schema as `<path>.schema.json`.
	pub fn save(&self, schema_path: &Path) -> Result<()> {
		let doc = SchemaDoc {
			table_name: self.table_name.clone(),
			fields: self
				.fields
				.iter()
				.map(|f| FieldDoc {
					name: f.name.clone(),
					format: f.format.to_string(),
					is_primary_key: f.is_primary_key,
				})
				.collect(),
		};
		let json = ::serde_json::to_string_pretty(&doc)?;
		File::create(schema_path)?.write_all(json.as_bytes())?;
		Ok(())
	}

	/// Index of the primary-key field, if this schema declares one.
	pub fn primary_key_index(&self) -> Option<usize> {
		self.fields.iter().position(|f| f.is_primary_key)
	}

	/// Name of the primary-key field, if any.
	pub fn primary_key_name(&self) -> Option<&str> {
		self.primary_key_index().map(|i| self.fields[i].name.as_str())
	}

	/// Looks up a field by name.
	pub fn field(&self, name: &str) -> Result<&Field> {
		self.fields
			.iter()
			.find(|f| f.name == name)
			.ok_or_else(|| ErrorKind::UnknownField(name.to_owned()).into())
	}

	/// Index of a field by name.
	pub fn field_index(&self, name: &str) -> Result<usize> {
		self.fields
			.iter()
			.position(|f| f.name == name)
			.ok_or_else(|| ErrorKind::UnknownField(name.to_owned()).into())
	}

	/// Total packed byte length of one record row (sum of field `packed_len`s).
	pub fn record_byte_len(&self) -> usize {
		self.fields.iter().map(|f| f.format.packed_len()).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn sample() -> Schema {
		Schema::new(
			"widgets",
			&[("id", "i"), ("name", "20s"), ("price", "f")],
			Some("id"),
		)
		.unwrap()
	}

	#[test]
	fn marks_primary_key() {
		let schema = sample();
		assert_eq!(schema.primary_key_name(), Some("id"));
		assert_eq!(schema.primary_key_index(), Some(0));
	}

	#[test]
	fn rejects_non_scalar_primary_key() {
		let err = Schema::new("t", &[("loc", "2f")], Some("loc"));
		assert!(err.is_err());
	}

	#[test]
	fn json_roundtrip() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("widgets.schema.json");
		let schema = sample();
		schema.save(&path).unwrap();
		let loaded = Schema::load(&path).unwrap();
		assert_eq!(schema, loaded);
	}

	#[test]
	fn record_byte_len_sums_fields() {
		let schema = sample();
		// i(4) + 20s(20) + f(4)
		assert_eq!(schema.record_byte_len(), 28);
	}
}
