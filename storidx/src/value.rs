//! Field formats and the tagged value type they describe.
//!
//! Mirrors the source's dynamic "format string" typing (`"i"`, `"f"`,
//! `"20s"`, `"4f"`, `"text"`, `"SOUND"`, ...) as a typed enum, per the design
//! notes: all packing/unpacking is driven by the schema's format tags.

use std::fmt;

use error::{ErrorKind, Result};

/// A field's on-disk shape, as named in a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldFormat {
	/// 32-bit signed integer. Sentinel: `-1`.
	Int,
	/// 32-bit IEEE-754 float. Sentinel: `-inf`.
	Float,
	/// Single byte boolean.
	Bool,
	/// Fixed-width `N`-byte utf-8 string, zero-padded. Sentinel: `""`.
	Str(usize),
	/// Fixed tuple of `N` signed integers (e.g. integer point/box).
	TupleInt(usize),
	/// Fixed tuple of `N` floats (e.g. 2D/3D point or 4f/6f box).
	TupleFloat(usize),
	/// Stored externally; in-row value is a 32-bit sidecar offset.
	Text,
	/// External opaque blob + external histogram (pair of offsets).
	Sound,
}

impl FieldFormat {
	/// Parses a schema format tag, e.g. `"i"`, `"f"`, `"20s"`, `"4f"`, `"text"`.
	pub fn parse(tag: &str) -> Result<FieldFormat> {
		let upper = tag.to_ascii_uppercase();
		match upper.as_str() {
			"TEXT" => return Ok(FieldFormat::Text),
			"SOUND" => return Ok(FieldFormat::Sound),
			"INT" | "I" => return Ok(FieldFormat::Int),
			"FLOAT" | "F" => return Ok(FieldFormat::Float),
			"BOOL" | "?" => return Ok(FieldFormat::Bool),
			_ => {}
		}

		if let Some(stripped) = tag.strip_suffix('s') {
			if let Ok(n) = stripped.parse::<usize>() {
				return Ok(FieldFormat::Str(n));
			}
		}
		if let Some(stripped) = tag.strip_suffix('i') {
			if let Ok(n) = stripped.parse::<usize>() {
				if n > 0 {
					return Ok(FieldFormat::TupleInt(n));
				}
			}
		}
		if let Some(stripped) = tag.strip_suffix('f') {
			if let Ok(n) = stripped.parse::<usize>() {
				if n > 0 {
					return Ok(FieldFormat::TupleFloat(n));
				}
			}
		}

		bail!(ErrorKind::UnsupportedFormat(tag.to_owned(), "schema field"))
	}

	/// Number of bytes this field occupies in a packed record row.
	/// `Text` and `Sound` store sidecar offsets in-row, not their payload.
	pub fn packed_len(&self) -> usize {
		match *self {
			FieldFormat::Int => 4,
			FieldFormat::Float => 4,
			FieldFormat::Bool => 1,
			FieldFormat::Str(n) => n,
			FieldFormat::TupleInt(n) => 4 * n,
			FieldFormat::TupleFloat(n) => 4 * n,
			FieldFormat::Text => 4,
			FieldFormat::Sound => 8,
		}
	}

	/// Whether this format is usable as an index key (scalar or numeric tuple).
	pub fn is_indexable(&self) -> bool {
		matches!(
			*self,
			FieldFormat::Int
				| FieldFormat::Float
				| FieldFormat::Str(_)
				| FieldFormat::TupleInt(_)
				| FieldFormat::TupleFloat(_)
		)
	}

	/// Whether this format is usable as a primary key (comparable scalar).
	pub fn is_pk_compatible(&self) -> bool {
		matches!(*self, FieldFormat::Int | FieldFormat::Float | FieldFormat::Str(_))
	}
}

impl fmt::Display for FieldFormat {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			FieldFormat::Int => write!(f, "i"),
			FieldFormat::Float => write!(f, "f"),
			FieldFormat::Bool => write!(f, "?"),
			FieldFormat::Str(n) => write!(f, "{}s", n),
			FieldFormat::TupleInt(n) => write!(f, "{}i", n),
			FieldFormat::TupleFloat(n) => write!(f, "{}f", n),
			FieldFormat::Text => write!(f, "text"),
			FieldFormat::Sound => write!(f, "SOUND"),
		}
	}
}

/// The sentinel used to mark a field as belonging to a deleted slot.
pub const SENTINEL_INT: i32 = -1;
/// The sentinel used to mark a float-typed field as belonging to a deleted slot.
pub const SENTINEL_FLOAT: f32 = ::std::f32::NEG_INFINITY;
/// The sentinel used to mark a string-typed field as belonging to a deleted slot.
pub const SENTINEL_STR: &str = "";

/// A schema-typed value.
///
/// `Text` and `Sound` carry their logical payload (the text itself, or the
/// blob+histogram pair); the heap file is responsible for replacing them
/// with sidecar offsets before the record is packed into a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Int(i32),
	Float(f32),
	Bool(bool),
	Str(String),
	TupleInt(Vec<i32>),
	TupleFloat(Vec<f32>),
	Text(String),
	Sound { blob: Vec<u8>, histogram: Vec<f32> },
}

impl Value {
	/// Returns the sentinel value for a primary-key-compatible format.
	pub fn sentinel_for(format: &FieldFormat) -> Option<Value> {
		match *format {
			FieldFormat::Int => Some(Value::Int(SENTINEL_INT)),
			FieldFormat::Float => Some(Value::Float(SENTINEL_FLOAT)),
			FieldFormat::Str(_) => Some(Value::Str(SENTINEL_STR.to_owned())),
			_ => None,
		}
	}

	/// True iff this value equals the sentinel for `format`.
	pub fn is_sentinel(&self, format: &FieldFormat) -> bool {
		match (self, format) {
			(&Value::Int(v), &FieldFormat::Int) => v == SENTINEL_INT,
			(&Value::Float(v), &FieldFormat::Float) => v == SENTINEL_FLOAT,
			(&Value::Str(ref v), &FieldFormat::Str(_)) => v.is_empty(),
			_ => false,
		}
	}

	/// A short, deterministic string rendering (used in error messages and tests).
	pub fn display(&self) -> String {
		match *self {
			Value::Int(v) => v.to_string(),
			Value::Float(v) => v.to_string(),
			Value::Bool(v) => v.to_string(),
			Value::Str(ref v) => v.clone(),
			Value::TupleInt(ref v) => format!("{:?}", v),
			Value::TupleFloat(ref v) => format!("{:?}", v),
			Value::Text(ref v) => v.clone(),
			Value::Sound { ref blob, .. } => format!("<sound blob, {} bytes>", blob.len()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_scalar_formats() {
		assert_eq!(FieldFormat::parse("i").unwrap(), FieldFormat::Int);
		assert_eq!(FieldFormat::parse("INT").unwrap(), FieldFormat::Int);
		assert_eq!(FieldFormat::parse("f").unwrap(), FieldFormat::Float);
		assert_eq!(FieldFormat::parse("?").unwrap(), FieldFormat::Bool);
		assert_eq!(FieldFormat::parse("text").unwrap(), FieldFormat::Text);
		assert_eq!(FieldFormat::parse("SOUND").unwrap(), FieldFormat::Sound);
	}

	#[test]
	fn parses_compound_formats() {
		assert_eq!(FieldFormat::parse("20s").unwrap(), FieldFormat::Str(20));
		assert_eq!(FieldFormat::parse("4f").unwrap(), FieldFormat::TupleFloat(4));
		assert_eq!(FieldFormat::parse("3i").unwrap(), FieldFormat::TupleInt(3));
	}

	#[test]
	fn rejects_unknown_formats() {
		assert!(FieldFormat::parse("bogus").is_err());
	}

	#[test]
	fn display_roundtrips_through_parse() {
		for tag in &["i", "f", "?", "20s", "4f", "3i", "text", "SOUND"] {
			let parsed = FieldFormat::parse(tag).unwrap();
			let rendered = parsed.to_string();
			let reparsed = FieldFormat::parse(&rendered).unwrap();
			assert_eq!(parsed, reparsed);
		}
	}

	#[test]
	fn sentinel_detection() {
		assert!(Value::Int(-1).is_sentinel(&FieldFormat::Int));
		assert!(!Value::Int(0).is_sentinel(&FieldFormat::Int));
		assert!(Value::Str("".into()).is_sentinel(&FieldFormat::Str(10)));
	}
}
