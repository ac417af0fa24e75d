//! Per-subsystem construction options, validated at construction the way
//! the teacher's `Options`/`InternalOptions` pair validates a generic KV
//! store's tuning knobs before any file touches disk.

use std::collections::HashSet;

use error::{ErrorKind, Result};

/// B+ tree construction knobs.
#[derive(Debug, Clone, Copy)]
pub struct BTreeOptions {
	pub order: usize,
}

impl Default for BTreeOptions {
	fn default() -> BTreeOptions {
		BTreeOptions { order: 64 }
	}
}

impl BTreeOptions {
	pub fn validate(self) -> Result<InternalBTreeOptions> {
		if self.order < 2 {
			bail!(ErrorKind::UnsupportedFormat(self.order.to_string(), "b+tree order (must be >= 2)"));
		}
		Ok(InternalBTreeOptions { order: self.order })
	}
}

#[derive(Debug, Clone, Copy)]
pub struct InternalBTreeOptions {
	pub order: usize,
}

/// Extendible hash construction knobs.
#[derive(Debug, Clone, Copy)]
pub struct HashOptions {
	pub bucket_capacity: usize,
}

impl Default for HashOptions {
	fn default() -> HashOptions {
		HashOptions {
			bucket_capacity: ::hash::DEFAULT_BUCKET_FACTOR,
		}
	}
}

impl HashOptions {
	pub fn validate(self) -> Result<InternalHashOptions> {
		if self.bucket_capacity == 0 {
			bail!(ErrorKind::UnsupportedFormat(self.bucket_capacity.to_string(), "hash bucket capacity (must be >= 1)"));
		}
		Ok(InternalHashOptions {
			bucket_capacity: self.bucket_capacity,
		})
	}
}

#[derive(Debug, Clone, Copy)]
pub struct InternalHashOptions {
	pub bucket_capacity: usize,
}

/// SPIMI builder construction knobs: the in-memory dictionary budget (bytes)
/// before a block is flushed, and the injectable stopword/stemming inputs
/// per §4.8a / §9 ("stopword list and stemmer must be injectable").
#[derive(Debug, Clone)]
pub struct SpimiOptions {
	pub memory_limit_bytes: usize,
	pub stopwords: Option<HashSet<String>>,
}

impl Default for SpimiOptions {
	fn default() -> SpimiOptions {
		SpimiOptions {
			memory_limit_bytes: 4096,
			stopwords: None,
		}
	}
}

impl SpimiOptions {
	pub fn validate(self) -> Result<InternalSpimiOptions> {
		if self.memory_limit_bytes == 0 {
			bail!(ErrorKind::UnsupportedFormat(self.memory_limit_bytes.to_string(), "SPIMI memory limit (must be >= 1)"));
		}
		Ok(InternalSpimiOptions {
			memory_limit_bytes: self.memory_limit_bytes,
			stopwords: self.stopwords.unwrap_or_else(default_stopwords),
		})
	}
}

#[derive(Debug, Clone)]
pub struct InternalSpimiOptions {
	pub memory_limit_bytes: usize,
	pub stopwords: HashSet<String>,
}

fn default_stopwords() -> HashSet<String> {
	::stop_words::get(::stop_words::LANGUAGE::English).into_iter().collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_degenerate_btree_order() {
		assert!(BTreeOptions { order: 1 }.validate().is_err());
		assert!(BTreeOptions { order: 2 }.validate().is_ok());
	}

	#[test]
	fn rejects_zero_bucket_capacity() {
		assert!(HashOptions { bucket_capacity: 0 }.validate().is_err());
	}

	#[test]
	fn spimi_defaults_to_builtin_stopwords() {
		let opts = SpimiOptions::default().validate().unwrap();
		assert!(opts.stopwords.contains("the"));
	}
}
