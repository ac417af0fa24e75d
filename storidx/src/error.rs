#![allow(unknown_lints)]
#![allow(missing_docs)]

use std::io;

error_chain! {
	foreign_links {
		Io(io::Error);
		Json(::serde_json::Error);
	}

	errors {
		SchemaMismatch(expected: String, got: String) {
			description("record schema does not match table schema")
			display("record schema does not match table schema: expected {}, got {}", expected, got),
		}
		UnknownField(name: String) {
			description("field name not in schema")
			display("unknown field: {}", name),
		}
		UnsupportedFormat(fmt: String, context: &'static str) {
			description("format tag not supported here")
			display("format `{}` is not supported for {}", fmt, context),
		}
		DuplicateKey(value: String) {
			description("primary key constraint violation")
			display("duplicate primary key: {}", value),
		}
		SentinelNotAllowed(field: String) {
			description("sentinel value used in primary key field")
			display("sentinel value is not allowed in primary key field `{}`", field),
		}
		NotFound(what: String) {
			description("requested key/offset was not found")
			display("not found: {}", what),
		}
		OutOfRange(offset: i64, len: i64) {
			description("offset outside the valid heap range")
			display("offset {} is out of range [0, {})", offset, len),
		}
		TypeMismatch(expected: String, got: String) {
			description("index received a value inconsistent with its key format")
			display("type mismatch: expected {}, got {}", expected, got),
		}
		NoPrimaryKey(table: String) {
			description("operation requires a primary key")
			display("table `{}` has no primary key", table),
		}
		CorruptFile(path: String, msg: String) {
			description("header or record length not readable as expected")
			display("corrupt file at {}: {}", path, msg),
		}
		IndexMissing(table: String, field: String, kind: &'static str) {
			description("index does not exist")
			display("no {} index on {}.{}", kind, table, field),
		}
		IndexExists(table: String, field: String, kind: &'static str) {
			description("index already exists")
			display("{} index on {}.{} already exists", kind, table, field),
		}
		TableLocked(table: String) {
			description("table file lock is currently acquired")
			display("could not acquire lock for table `{}`. If you're sure no other \
					 process is using it, delete the `.lock` file.", table),
		}
		Spatial(msg: String) {
			description("spatial index invariant violation")
			display("spatial index error: {}", msg),
		}
	}
}
