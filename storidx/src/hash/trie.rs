//! The binary trie that routes a key's hash bits to a bucket page, mirroring
//! the radix/trie structure described in §4.5. Rewritten to disk wholesale
//! on every structural change (split); no shrinking on delete.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use error::{ErrorKind, Result};

/// `GLOBAL_DEPTH`: a trie path never exceeds this many bits, matching the
/// 16-bit expansion of the 32-bit key hash used throughout §4.5.
pub const GLOBAL_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub enum Trie {
	Leaf(i64),
	Internal(Box<Trie>, Box<Trie>),
}

impl Trie {
	pub fn leaf(page_offset: i64) -> Trie {
		Trie::Leaf(page_offset)
	}

	/// Walks `hash_bits` from the root, returning the page offset at the
	/// reached leaf and how many bits were consumed getting there.
	pub fn locate(&self, hash_bits: u16) -> (i64, usize) {
		let mut node = self;
		let mut depth = 0;
		loop {
			match node {
				Trie::Leaf(off) => return (*off, depth),
				Trie::Internal(left, right) => {
					let bit = bit_at(hash_bits, depth);
					node = if bit == 0 { left } else { right };
					depth += 1;
				}
			}
		}
	}

	/// Replaces the leaf reached by `hash_bits` (at the known `depth`) with
	/// `replacement`, returning the updated root.
	pub fn replace_leaf(self, hash_bits: u16, depth: usize, replacement: Trie) -> Trie {
		fn go(node: Trie, hash_bits: u16, target_depth: usize, cur_depth: usize, replacement: Trie) -> Trie {
			if cur_depth == target_depth {
				return replacement;
			}
			match node {
				Trie::Leaf(_) => node,
				Trie::Internal(left, right) => {
					let bit = bit_at(hash_bits, cur_depth);
					if bit == 0 {
						Trie::Internal(Box::new(go(*left, hash_bits, target_depth, cur_depth + 1, replacement)), right)
					} else {
						Trie::Internal(left, Box::new(go(*right, hash_bits, target_depth, cur_depth + 1, replacement)))
					}
				}
			}
		}
		go(self, hash_bits, depth, 0, replacement)
	}

	/// Visits every leaf page offset, left subtree before right.
	pub fn leaves(&self) -> Vec<i64> {
		let mut out = Vec::new();
		fn walk(node: &Trie, out: &mut Vec<i64>) {
			match node {
				Trie::Leaf(off) => out.push(*off),
				Trie::Internal(l, r) => {
					walk(l, out);
					walk(r, out);
				}
			}
		}
		walk(self, &mut out);
		out
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		let mut buf = Vec::new();
		pack(self, &mut buf);
		File::create(path)?.write_all(&buf)?;
		Ok(())
	}

	pub fn load(path: &Path) -> Result<Trie> {
		let mut buf = Vec::new();
		File::open(path)?.read_to_end(&mut buf)?;
		let mut cursor = 0;
		let trie = unpack(&buf, &mut cursor)?;
		Ok(trie)
	}
}

/// Bit `depth` (0 = most significant) of the top 16 bits of a 32-bit hash.
pub fn bit_at(hash_top16: u16, depth: usize) -> u8 {
	((hash_top16 >> (GLOBAL_DEPTH - 1 - depth)) & 1) as u8
}

fn pack(trie: &Trie, out: &mut Vec<u8>) {
	match trie {
		Trie::Leaf(off) => {
			out.push(0);
			out.extend_from_slice(&off.to_le_bytes());
		}
		Trie::Internal(l, r) => {
			out.push(1);
			pack(l, out);
			pack(r, out);
		}
	}
}

fn unpack(buf: &[u8], cursor: &mut usize) -> Result<Trie> {
	if *cursor >= buf.len() {
		bail!(ErrorKind::CorruptFile("hash trie".to_owned(), "truncated trie file".to_owned()));
	}
	let tag = buf[*cursor];
	*cursor += 1;
	match tag {
		0 => {
			let mut bytes = [0u8; 8];
			bytes.copy_from_slice(&buf[*cursor..*cursor + 8]);
			*cursor += 8;
			Ok(Trie::Leaf(i64::from_le_bytes(bytes)))
		}
		1 => {
			let left = unpack(buf, cursor)?;
			let right = unpack(buf, cursor)?;
			Ok(Trie::Internal(Box::new(left), Box::new(right)))
		}
		other => bail!(ErrorKind::CorruptFile("hash trie".to_owned(), format!("unknown node tag {}", other))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn locate_and_replace_roundtrip() {
		let trie = Trie::Internal(Box::new(Trie::Leaf(100)), Box::new(Trie::Leaf(200)));
		let (off, depth) = trie.locate(0b0111_1111_1111_1111);
		assert_eq!((off, depth), (200, 1));

		let replaced = trie.replace_leaf(0b0111_1111_1111_1111, 1, Trie::Leaf(999));
		assert_eq!(replaced.leaves(), vec![100, 999]);
	}

	#[test]
	fn save_load_roundtrip() {
		let dir = ::tempfile::tempdir().unwrap();
		let path = dir.path().join("t.f.hash.tree");
		let trie = Trie::Internal(Box::new(Trie::Leaf(8)), Box::new(Trie::Internal(Box::new(Trie::Leaf(500)), Box::new(Trie::Leaf(900)))));
		trie.save(&path).unwrap();
		let loaded = Trie::load(&path).unwrap();
		assert_eq!(loaded.leaves(), trie.leaves());
	}
}
