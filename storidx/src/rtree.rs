//! Spatial index wrapper over `rstar`, mirroring `indexing/RTreeIndex.py`.
//! This module owns exactly the mapping between this crate's point/box key
//! shapes and an MBR, plus the offset bookkeeping the spatial library
//! doesn't provide; per §4.6 it must not assume anything about `rstar`'s
//! internal representation beyond insert/remove/locate/nearest.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use rstar::{RTree, RTreeObject, AABB};

use error::{ErrorKind, Result};
use index_record::Key;
use value::FieldFormat;

/// An axis-aligned bounding box in up to 3 dimensions, in the `(min, max)`
/// shape every query in §4.6 is expressed against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mbr {
	pub min: [f32; 3],
	pub max: [f32; 3],
	pub dims: usize,
}

impl Mbr {
	/// Converts a key into its MBR: a `2f`/`3f` point becomes a degenerate
	/// box, a `4f`/`6f` box passes through as `(min, max)`.
	pub fn from_key(key: &Key) -> Result<Mbr> {
		match key {
			Key::TupleFloat(v) if v.len() == 2 => Ok(Mbr {
				min: [v[0], v[1], 0.0],
				max: [v[0], v[1], 0.0],
				dims: 2,
			}),
			Key::TupleFloat(v) if v.len() == 3 => Ok(Mbr {
				min: [v[0], v[1], v[2]],
				max: [v[0], v[1], v[2]],
				dims: 3,
			}),
			Key::TupleFloat(v) if v.len() == 4 => Ok(Mbr {
				min: [v[0], v[1], 0.0],
				max: [v[2], v[3], 0.0],
				dims: 2,
			}),
			Key::TupleFloat(v) if v.len() == 6 => Ok(Mbr {
				min: [v[0], v[1], v[2]],
				max: [v[3], v[4], v[5]],
				dims: 3,
			}),
			_ => bail!(ErrorKind::UnsupportedFormat(format!("{:?}", key), "r-tree key")),
		}
	}

	fn is_box(&self) -> bool {
		self.min != self.max
	}

	/// Minimum distance from `point` to this MBR (0 if the point is inside).
	pub fn point_mindist(&self, point: &[f32; 3]) -> f32 {
		let mut sum = 0.0f32;
		for i in 0..3 {
			let d = if point[i] < self.min[i] {
				self.min[i] - point[i]
			} else if point[i] > self.max[i] {
				point[i] - self.max[i]
			} else {
				0.0
			};
			sum += d * d;
		}
		sum.sqrt()
	}

	fn inflate(&self, radius: f32) -> Mbr {
		let mut out = *self;
		for i in 0..3 {
			out.min[i] -= radius;
			out.max[i] += radius;
		}
		out
	}
}

fn euclidean(a: &[f32; 3], b: &[f32; 3]) -> f32 {
	(0..3).map(|i| (a[i] - b[i]).powi(2)).sum::<f32>().sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
	mbr: Mbr,
	offset: i32,
}

impl RTreeObject for Entry {
	type Envelope = AABB<[f32; 3]>;

	fn envelope(&self) -> Self::Envelope {
		AABB::from_corners(self.mbr.min, self.mbr.max)
	}
}

impl rstar::PointDistance for Entry {
	fn distance_2(&self, point: &[f32; 3]) -> f32 {
		self.mbr.point_mindist(point).powi(2)
	}
}

/// Serialized form of the whole tree: since §9 permits a full rewrite, the
/// persisted file is simply the entry list, rebuilt into an in-memory
/// `rstar::RTree` on load.
pub struct SpatialIndex {
	path: PathBuf,
	format: FieldFormat,
	tree: RTree<Entry>,
}

impl SpatialIndex {
	pub fn build(path: PathBuf, format: FieldFormat) -> Result<SpatialIndex> {
		File::create(&path)?.write_all(&0i32.to_le_bytes())?;
		Ok(SpatialIndex {
			path,
			format,
			tree: RTree::new(),
		})
	}

	pub fn open(path: PathBuf, format: FieldFormat) -> Result<SpatialIndex> {
		let entries = read_entries(&path)?;
		Ok(SpatialIndex {
			path,
			format,
			tree: RTree::bulk_load(entries),
		})
	}

	pub fn build_index<I: IntoIterator<Item = (Key, i32)>>(path: PathBuf, format: FieldFormat, entries: I) -> Result<SpatialIndex> {
		let built: Result<Vec<Entry>> = entries.into_iter().map(|(k, o)| Ok(Entry { mbr: Mbr::from_key(&k)?, offset: o })).collect();
		let built = built?;
		write_entries(&path, &built)?;
		Ok(SpatialIndex {
			path,
			format,
			tree: RTree::bulk_load(built),
		})
	}

	fn persist(&self) -> Result<()> {
		let entries: Vec<Entry> = self.tree.iter().cloned().collect();
		write_entries(&self.path, &entries)
	}

	pub fn insert(&mut self, key: &Key, offset: i32) -> Result<()> {
		let mbr = Mbr::from_key(key)?;
		self.tree.insert(Entry { mbr, offset });
		self.persist()
	}

	pub fn delete(&mut self, key: &Key, offset: i32) -> Result<bool> {
		let mbr = Mbr::from_key(key)?;
		let removed = self.tree.remove(&Entry { mbr, offset });
		if removed.is_some() {
			self.persist()?;
		}
		Ok(removed.is_some())
	}

	/// Entries whose MBR intersects `key`'s MBR.
	pub fn search_intersection(&self, key: &Key) -> Result<Vec<i32>> {
		let mbr = Mbr::from_key(key)?;
		let aabb = AABB::from_corners(mbr.min, mbr.max);
		Ok(self.tree.locate_in_envelope_intersecting(&aabb).map(|e| e.offset).collect())
	}

	/// Entries within `radius` of `key`: bbox pre-filter, then exact refine
	/// using point-to-MBR distance for box-typed entries or Euclidean
	/// distance for point-typed entries, per §4.6.
	pub fn search_radius(&self, key: &Key, radius: f32) -> Result<Vec<i32>> {
		let center = Mbr::from_key(key)?;
		let search_box = center.inflate(radius);
		let aabb = AABB::from_corners(search_box.min, search_box.max);

		let mut out = Vec::new();
		for entry in self.tree.locate_in_envelope_intersecting(&aabb) {
			let dist = if entry.mbr.is_box() {
				entry.mbr.point_mindist(&center.min)
			} else {
				euclidean(&entry.mbr.min, &center.min)
			};
			if dist <= radius {
				out.push(entry.offset);
			}
		}
		Ok(out)
	}

	/// Entries inside a query box (same as intersection, named per §6.2's
	/// `search_bounds` call shape).
	pub fn search_bounds(&self, key: &Key) -> Result<Vec<i32>> {
		self.search_intersection(key)
	}

	pub fn search_knn(&self, key: &Key, k: usize) -> Result<Vec<i32>> {
		let center = Mbr::from_key(key)?;
		Ok(self.tree.nearest_neighbor_iter(&center.min).take(k).map(|e| e.offset).collect())
	}
}

const ENTRY_RECORD_SIZE: usize = 4 + 4 * 6 + 4; // dims:i32, 6 coords, offset:i32

fn write_entries(path: &PathBuf, entries: &[Entry]) -> Result<()> {
	let mut buf = Vec::new();
	buf.extend_from_slice(&(entries.len() as i32).to_le_bytes());
	for e in entries {
		let mut rec = vec![0u8; ENTRY_RECORD_SIZE];
		LittleEndian::write_i32(&mut rec[0..4], e.mbr.dims as i32);
		let coords = [e.mbr.min[0], e.mbr.min[1], e.mbr.min[2], e.mbr.max[0], e.mbr.max[1], e.mbr.max[2]];
		for (i, c) in coords.iter().enumerate() {
			LittleEndian::write_f32(&mut rec[4 + i * 4..8 + i * 4], *c);
		}
		LittleEndian::write_i32(&mut rec[28..32], e.offset);
		buf.extend_from_slice(&rec);
	}
	File::create(path)?.write_all(&buf)?;
	Ok(())
}

fn read_entries(path: &PathBuf) -> Result<Vec<Entry>> {
	let mut f = OpenOptions::new().read(true).open(path)?;
	let mut buf = Vec::new();
	f.read_to_end(&mut buf)?;
	if buf.len() < 4 {
		return Ok(Vec::new());
	}
	let count = LittleEndian::read_i32(&buf[0..4]) as usize;
	let rec_size = 32;
	let mut out = Vec::with_capacity(count);
	for i in 0..count {
		let start = 4 + i * rec_size;
		let rec = &buf[start..start + rec_size];
		let dims = LittleEndian::read_i32(&rec[0..4]) as usize;
		let mut coords = [0.0f32; 6];
		for j in 0..6 {
			coords[j] = LittleEndian::read_f32(&rec[4 + j * 4..8 + j * 4]);
		}
		let offset = LittleEndian::read_i32(&rec[28..32]);
		out.push(Entry {
			mbr: Mbr {
				min: [coords[0], coords[1], coords[2]],
				max: [coords[3], coords[4], coords[5]],
				dims,
			},
			offset,
		});
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn point_intersection_and_knn() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.loc.rtree.dat");
		let entries = vec![
			(Key::TupleFloat(vec![0.0, 0.0]), 1),
			(Key::TupleFloat(vec![1.0, 1.0]), 2),
			(Key::TupleFloat(vec![10.0, 10.0]), 3),
		];
		let idx = SpatialIndex::build_index(path, FieldFormat::TupleFloat(2), entries).unwrap();

		let hits = idx.search_intersection(&Key::TupleFloat(vec![0.0, 0.0])).unwrap();
		assert_eq!(hits, vec![1]);

		let nearest = idx.search_knn(&Key::TupleFloat(vec![0.5, 0.5]), 2).unwrap();
		assert_eq!(nearest, vec![1, 2]);
	}

	#[test]
	fn radius_search_filters_by_exact_distance() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.loc.rtree.dat");
		let entries = vec![
			(Key::TupleFloat(vec![0.0, 0.0]), 1),
			(Key::TupleFloat(vec![3.0, 4.0]), 2), // distance 5 from origin
			(Key::TupleFloat(vec![100.0, 100.0]), 3),
		];
		let idx = SpatialIndex::build_index(path, FieldFormat::TupleFloat(2), entries).unwrap();

		let mut hits = idx.search_radius(&Key::TupleFloat(vec![0.0, 0.0]), 5.0).unwrap();
		hits.sort();
		assert_eq!(hits, vec![1, 2]);
	}

	#[test]
	fn insert_then_delete_persists() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("t.loc.rtree.dat");
		let mut idx = SpatialIndex::build(path.clone(), FieldFormat::TupleFloat(2)).unwrap();
		idx.insert(&Key::TupleFloat(vec![5.0, 5.0]), 42).unwrap();
		assert_eq!(idx.search_intersection(&Key::TupleFloat(vec![5.0, 5.0])).unwrap(), vec![42]);

		assert!(idx.delete(&Key::TupleFloat(vec![5.0, 5.0]), 42).unwrap());
		assert!(idx.search_intersection(&Key::TupleFloat(vec![5.0, 5.0])).unwrap().is_empty());

		let reopened = SpatialIndex::open(path, FieldFormat::TupleFloat(2)).unwrap();
		assert!(reopened.search_intersection(&Key::TupleFloat(vec![5.0, 5.0])).unwrap().is_empty());
	}
}
