#![deny(rust_2018_idioms)]

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

#[macro_use]
extern crate smallvec;

#[macro_use]
extern crate bitflags;

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[macro_use]
mod macros;

#[cfg(test)]
pub mod test_utils;

pub mod boxes;
pub mod config;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod hash;
pub mod merge;
pub mod node;
pub mod obj;
pub mod path;
pub mod record;
pub mod refs;
pub mod remote;
pub mod serialize;
pub mod signature;
pub mod split;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod tree_diff;

mod io;
mod lockfile;
mod odb;

pub use error::{HoardError, HoardResult};
pub use hash::Oid;
pub use storage::Storage;
