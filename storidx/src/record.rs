//! Schema-driven record packing, mirroring `storage/Record.py`.
//!
//! A `Record` packs into the heap's slot format by concatenating the native
//! binary encoding of each field in schema order. `Text` and `Sound` fields
//! are packed/unpacked at this layer as their in-row sidecar offsets
//! (`Value::Int` / `Value::TupleInt`, respectively) — substituting the
//! logical payload (`Value::Text` / `Value::Sound`) for those offsets is the
//! heap file's job, not this module's.

use byteorder::{ByteOrder, LittleEndian};

use error::{ErrorKind, Result};
use schema::Schema;
use value::{FieldFormat, Value};

/// A schema-ordered tuple of field values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
	pub values: Vec<Value>,
}

impl Record {
	pub fn new(values: Vec<Value>) -> Record {
		Record { values }
	}

	/// Packs this record's values into `schema`'s fixed-length row layout.
	pub fn pack(&self, schema: &Schema) -> Result<Vec<u8>> {
		if self.values.len() != schema.fields.len() {
			bail!(ErrorKind::SchemaMismatch(
				format!("{} fields", schema.fields.len()),
				format!("{} values", self.values.len())
			));
		}

		let mut buf = vec![0u8; schema.record_byte_len()];
		let mut offset = 0;
		for (field, value) in schema.fields.iter().zip(&self.values) {
			let len = field.format.packed_len();
			pack_field(&field.format, value, &mut buf[offset..offset + len])?;
			offset += len;
		}
		Ok(buf)
	}

	/// Unpacks a fixed-length row `buf` according to `schema`.
	pub fn unpack(buf: &[u8], schema: &Schema) -> Result<Record> {
		if buf.len() != schema.record_byte_len() {
			bail!(ErrorKind::CorruptFile(
				schema.table_name.clone(),
				format!("expected record of {} bytes, got {}", schema.record_byte_len(), buf.len())
			));
		}

		let mut values = Vec::with_capacity(schema.fields.len());
		let mut offset = 0;
		for field in &schema.fields {
			let len = field.format.packed_len();
			values.push(unpack_field(&field.format, &buf[offset..offset + len]));
			offset += len;
		}
		Ok(Record { values })
	}
}

fn pack_field(format: &FieldFormat, value: &Value, out: &mut [u8]) -> Result<()> {
	match (format, value) {
		(&FieldFormat::Int, &Value::Int(v)) => LittleEndian::write_i32(out, v),
		(&FieldFormat::Text, &Value::Int(v)) => LittleEndian::write_i32(out, v),
		(&FieldFormat::Float, &Value::Float(v)) => LittleEndian::write_f32(out, v),
		(&FieldFormat::Bool, &Value::Bool(v)) => out[0] = v as u8,
		(&FieldFormat::Str(n), &Value::Str(ref s)) => {
			let raw = s.as_bytes();
			let copy_len = raw.len().min(n);
			out[..copy_len].copy_from_slice(&raw[..copy_len]);
			// remainder stays zero-padded from the pre-zeroed buffer
		}
		(&FieldFormat::TupleInt(n), &Value::TupleInt(ref v)) => {
			if v.len() != n {
				bail!(ErrorKind::SchemaMismatch(format!("{} elements", n), format!("{} elements", v.len())));
			}
			for (i, &x) in v.iter().enumerate() {
				LittleEndian::write_i32(&mut out[i * 4..i * 4 + 4], x);
			}
		}
		(&FieldFormat::TupleFloat(n), &Value::TupleFloat(ref v)) => {
			if v.len() != n {
				bail!(ErrorKind::SchemaMismatch(format!("{} elements", n), format!("{} elements", v.len())));
			}
			for (i, &x) in v.iter().enumerate() {
				LittleEndian::write_f32(&mut out[i * 4..i * 4 + 4], x);
			}
		}
		(&FieldFormat::Sound, &Value::TupleInt(ref v)) if v.len() == 2 => {
			LittleEndian::write_i32(&mut out[0..4], v[0]);
			LittleEndian::write_i32(&mut out[4..8], v[1]);
		}
		_ => bail!(ErrorKind::TypeMismatch(format.to_string(), format!("{:?}", value))),
	}
	Ok(())
}

fn unpack_field(format: &FieldFormat, buf: &[u8]) -> Value {
	match *format {
		FieldFormat::Int | FieldFormat::Text => Value::Int(LittleEndian::read_i32(buf)),
		FieldFormat::Float => Value::Float(LittleEndian::read_f32(buf)),
		FieldFormat::Bool => Value::Bool(buf[0] != 0),
		FieldFormat::Str(_) => {
			let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
			Value::Str(String::from_utf8_lossy(&buf[..end]).into_owned())
		}
		FieldFormat::TupleInt(n) => {
			let mut v = Vec::with_capacity(n);
			for i in 0..n {
				v.push(LittleEndian::read_i32(&buf[i * 4..i * 4 + 4]));
			}
			Value::TupleInt(v)
		}
		FieldFormat::TupleFloat(n) => {
			let mut v = Vec::with_capacity(n);
			for i in 0..n {
				v.push(LittleEndian::read_f32(&buf[i * 4..i * 4 + 4]));
			}
			Value::TupleFloat(v)
		}
		FieldFormat::Sound => Value::TupleInt(vec![LittleEndian::read_i32(&buf[0..4]), LittleEndian::read_i32(&buf[4..8])]),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use schema::Schema;

	fn sample_schema() -> Schema {
		Schema::new(
			"widgets",
			&[("id", "i"), ("name", "20s"), ("price", "f"), ("box", "4f")],
			Some("id"),
		)
		.unwrap()
	}

	#[test]
	fn pack_unpack_roundtrip() {
		let schema = sample_schema();
		let record = Record::new(vec![
			Value::Int(3),
			Value::Str("Caramelos".to_owned()),
			Value::Float(1.75),
			Value::TupleFloat(vec![2.0, 3.0, 4.0, 1.0]),
		]);
		let packed = record.pack(&schema).unwrap();
		assert_eq!(packed.len(), schema.record_byte_len());
		let unpacked = Record::unpack(&packed, &schema).unwrap();
		assert_eq!(record, unpacked);
	}

	#[test]
	fn string_truncates_and_zero_pads() {
		let schema = Schema::new("t", &[("name", "3s")], None).unwrap();
		let record = Record::new(vec![Value::Str("hello".to_owned())]);
		let packed = record.pack(&schema).unwrap();
		assert_eq!(packed, b"hel");
	}

	#[test]
	fn schema_mismatch_on_wrong_value_count() {
		let schema = sample_schema();
		let record = Record::new(vec![Value::Int(1)]);
		assert!(record.pack(&schema).is_err());
	}

	quickcheck! {
		fn quickcheck_int_roundtrip(id: i32, price: f32) -> bool {
			// quickcheck's Arbitrary for f32 can generate NaN, and NaN != NaN under
			// derived PartialEq, so compare bit patterns instead of the floats.
			if !price.is_finite() {
				return true;
			}
			let schema = Schema::new("t", &[("id", "i"), ("price", "f")], None).unwrap();
			let record = Record::new(vec![Value::Int(id), Value::Float(price)]);
			let packed = record.pack(&schema).unwrap();
			let unpacked = Record::unpack(&packed, &schema).unwrap();
			let price_eq = match (&record.values[1], &unpacked.values[1]) {
				(Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
				_ => false,
			};
			record.values[0] == unpacked.values[0] && price_eq
		}
	}
}
