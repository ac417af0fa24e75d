//! Single-node relational storage engine.
//!
//! A table is a heap file of fixed-width records plus whichever secondary
//! indexes a caller has built on top of it: a paged B+ tree, an extendible
//! hash, a sorted sequential index, an R-tree over spatial fields, and a
//! SPIMI-built inverted index over text fields. `Catalog` is the entry
//! point: it owns a table's on-disk file family, fans writes out to every
//! present index, and `Search` dispatches reads against whichever of them
//! is available.
//!
//! ```text
//! Catalog --- create_table/insert_record/delete_record/drop_table
//!        \--- create_{btree,hash,seq,rtree}_idx
//! Search  --- search_point/search_range/search_spatial_*/search_text
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate error_chain;
extern crate byteorder;
extern crate fs2;
extern crate log;
extern crate rstar;
extern crate rust_stemmers;
extern crate serde;
extern crate serde_json;
extern crate sha2;
extern crate stop_words;
#[cfg(test)]
#[macro_use]
extern crate quickcheck;
#[cfg(test)]
extern crate tempfile;

mod btree;
mod catalog;
mod error;
mod hash;
mod heap;
mod index_record;
mod options;
mod record;
mod rtree;
mod schema;
mod search;
mod seq_index;
mod spimi;
mod text_sidecar;
mod value;

pub use catalog::{Catalog, IndexKind, TableLock};
pub use error::{Error, ErrorKind, Result};
pub use heap::TablePaths;
pub use index_record::Key;
pub use options::{BTreeOptions, HashOptions, SpimiOptions};
pub use record::Record;
pub use schema::{Field, Schema};
pub use search::Search;
pub use spimi::{SpimiIndex, SpimiIndexer};
pub use value::{FieldFormat, Value};
