//! Universal `(key, offset)` serialization shared by every secondary index,
//! mirroring `indexing/IndexRecord.py`. Self-describing via a 1-byte type
//! discriminant so a reader only needs the field's `FieldFormat` (for string
//! width / tuple arity) to know how many bytes follow.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use error::{ErrorKind, Result};
use value::FieldFormat;

const TYPE_INT: u8 = 0;
const TYPE_FLOAT: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_TUPLE_INT: u8 = 3;
const TYPE_TUPLE_FLOAT: u8 = 4;

/// An indexable key: the subset of `Value` that indexes can order and hash.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
	Int(i32),
	Float(f32),
	Str(String),
	TupleInt(Vec<i32>),
	TupleFloat(Vec<f32>),
}

impl Key {
	/// Total ordering over keys of the same format. Floats are compared with
	/// `partial_cmp`, falling back to `Equal` only for incomparable (NaN)
	/// values, which the text/spatial domains of this crate never produce.
	pub fn cmp_key(&self, other: &Key) -> Ordering {
		match (self, other) {
			(&Key::Int(a), &Key::Int(b)) => a.cmp(&b),
			(&Key::Float(a), &Key::Float(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
			(&Key::Str(ref a), &Key::Str(ref b)) => a.cmp(b),
			(&Key::TupleInt(ref a), &Key::TupleInt(ref b)) => a.cmp(b),
			(&Key::TupleFloat(ref a), &Key::TupleFloat(ref b)) => {
				for (x, y) in a.iter().zip(b) {
					match x.partial_cmp(y) {
						Some(Ordering::Equal) | None => continue,
						Some(ord) => return ord,
					}
				}
				Ordering::Equal
			}
			_ => Ordering::Equal,
		}
	}
}

/// A `(key, offset)` pair as stored inside an index file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
	pub key: Key,
	pub offset: i32,
}

impl IndexRecord {
	pub fn new(key: Key, offset: i32) -> IndexRecord {
		IndexRecord { key, offset }
	}

	/// Packed size of a record with the given key format (discriminant +
	/// payload + 4-byte offset).
	pub fn packed_len(format: &FieldFormat) -> Result<usize> {
		Ok(1 + payload_len(format)? + 4)
	}

	pub fn pack(&self, format: &FieldFormat) -> Result<Vec<u8>> {
		let mut buf = vec![0u8; IndexRecord::packed_len(format)?];
		match (&self.key, format) {
			(&Key::Int(v), &FieldFormat::Int) => {
				buf[0] = TYPE_INT;
				LittleEndian::write_i32(&mut buf[1..5], v);
			}
			(&Key::Float(v), &FieldFormat::Float) => {
				buf[0] = TYPE_FLOAT;
				LittleEndian::write_f32(&mut buf[1..5], v);
			}
			(&Key::Str(ref s), &FieldFormat::Str(n)) => {
				buf[0] = TYPE_STRING;
				let raw = s.as_bytes();
				let copy_len = raw.len().min(n);
				buf[1..1 + copy_len].copy_from_slice(&raw[..copy_len]);
			}
			(&Key::TupleInt(ref v), &FieldFormat::TupleInt(n)) => {
				if v.len() != n {
					bail!(ErrorKind::TypeMismatch(format!("{}i", n), format!("{} ints", v.len())));
				}
				buf[0] = TYPE_TUPLE_INT;
				for (i, &x) in v.iter().enumerate() {
					LittleEndian::write_i32(&mut buf[1 + i * 4..5 + i * 4], x);
				}
			}
			(&Key::TupleFloat(ref v), &FieldFormat::TupleFloat(n)) => {
				if v.len() != n {
					bail!(ErrorKind::TypeMismatch(format!("{}f", n), format!("{} floats", v.len())));
				}
				buf[0] = TYPE_TUPLE_FLOAT;
				for (i, &x) in v.iter().enumerate() {
					LittleEndian::write_f32(&mut buf[1 + i * 4..5 + i * 4], x);
				}
			}
			_ => bail!(ErrorKind::TypeMismatch(format.to_string(), format!("{:?}", self.key))),
		}
		let payload_end = buf.len() - 4;
		LittleEndian::write_i32(&mut buf[payload_end..], self.offset);
		Ok(buf)
	}

	pub fn unpack(buf: &[u8], format: &FieldFormat) -> Result<IndexRecord> {
		let expected_len = IndexRecord::packed_len(format)?;
		if buf.len() != expected_len {
			bail!(ErrorKind::CorruptFile(
				"index record".to_owned(),
				format!("expected {} bytes, got {}", expected_len, buf.len())
			));
		}
		let offset = LittleEndian::read_i32(&buf[buf.len() - 4..]);
		let key = match (buf[0], format) {
			(TYPE_INT, &FieldFormat::Int) => Key::Int(LittleEndian::read_i32(&buf[1..5])),
			(TYPE_FLOAT, &FieldFormat::Float) => Key::Float(LittleEndian::read_f32(&buf[1..5])),
			(TYPE_STRING, &FieldFormat::Str(n)) => {
				let raw = &buf[1..1 + n];
				let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
				Key::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
			}
			(TYPE_TUPLE_INT, &FieldFormat::TupleInt(n)) => {
				let mut v = Vec::with_capacity(n);
				for i in 0..n {
					v.push(LittleEndian::read_i32(&buf[1 + i * 4..5 + i * 4]));
				}
				Key::TupleInt(v)
			}
			(TYPE_TUPLE_FLOAT, &FieldFormat::TupleFloat(n)) => {
				let mut v = Vec::with_capacity(n);
				for i in 0..n {
					v.push(LittleEndian::read_f32(&buf[1 + i * 4..5 + i * 4]));
				}
				Key::TupleFloat(v)
			}
			(type_byte, _) => bail!(ErrorKind::CorruptFile("index record".to_owned(), format!("unknown type discriminant {}", type_byte))),
		};
		Ok(IndexRecord { key, offset })
	}

	/// An empty/tombstone record for `format`, used by the sequential index
	/// to pre-allocate its auxiliary area and to mark deletions in place.
	pub fn tombstone(format: &FieldFormat) -> IndexRecord {
		let key = match *format {
			FieldFormat::Int => Key::Int(-1),
			FieldFormat::Float => Key::Float(-1.0),
			FieldFormat::Str(_) => Key::Str(String::new()),
			FieldFormat::TupleInt(n) => Key::TupleInt(vec![-1; n]),
			FieldFormat::TupleFloat(n) => Key::TupleFloat(vec![-1.0; n]),
			_ => Key::Int(-1),
		};
		IndexRecord { key, offset: 0 }
	}

	/// True iff this record is the sentinel/tombstone for `format`.
	pub fn is_tombstone(&self, format: &FieldFormat) -> bool {
		self.key == IndexRecord::tombstone(format).key
	}
}

fn payload_len(format: &FieldFormat) -> Result<usize> {
	match *format {
		FieldFormat::Int => Ok(4),
		FieldFormat::Float => Ok(4),
		FieldFormat::Str(n) => Ok(n),
		FieldFormat::TupleInt(n) => Ok(4 * n),
		FieldFormat::TupleFloat(n) => Ok(4 * n),
		_ => bail!(ErrorKind::UnsupportedFormat(format.to_string(), "index key")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn int_roundtrip() {
		let format = FieldFormat::Int;
		let rec = IndexRecord::new(Key::Int(42), 7);
		let packed = rec.pack(&format).unwrap();
		assert_eq!(IndexRecord::unpack(&packed, &format).unwrap(), rec);
	}

	#[test]
	fn string_roundtrip_zero_pads() {
		let format = FieldFormat::Str(10);
		let rec = IndexRecord::new(Key::Str("abc".into()), 1);
		let packed = rec.pack(&format).unwrap();
		assert_eq!(packed.len(), IndexRecord::packed_len(&format).unwrap());
		assert_eq!(IndexRecord::unpack(&packed, &format).unwrap(), rec);
	}

	#[test]
	fn tuple_float_roundtrip() {
		let format = FieldFormat::TupleFloat(2);
		let rec = IndexRecord::new(Key::TupleFloat(vec![1.5, -2.5]), 99);
		let packed = rec.pack(&format).unwrap();
		assert_eq!(IndexRecord::unpack(&packed, &format).unwrap(), rec);
	}

	#[test]
	fn tombstone_recognized() {
		let format = FieldFormat::Int;
		let tomb = IndexRecord::tombstone(&format);
		assert!(tomb.is_tombstone(&format));
		assert!(!IndexRecord::new(Key::Int(5), 0).is_tombstone(&format));
	}

	quickcheck! {
		fn quickcheck_int_record_roundtrips(key: i32, offset: i32) -> bool {
			let format = FieldFormat::Int;
			let rec = IndexRecord::new(Key::Int(key), offset);
			let packed = rec.pack(&format).unwrap();
			IndexRecord::unpack(&packed, &format).unwrap() == rec
		}
	}
}
