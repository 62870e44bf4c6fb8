//! `cabinets` partitions a collection of documents, each a fixed-length vector of real-valued
//! subject weights, into a fixed number of cabinets by iteratively minimizing squared Euclidean
//! distance between each document and its cabinet's centroid — a Lloyd-style k-means.
//!
//! The crate is built around a distributed, partitioned iteration kernel: each worker owns a
//! disjoint slice of the documents (a [`shard::LocalShard`]), accumulates incremental centroid
//! deltas locally, and merges them with its peers through a small collective-communication
//! abstraction (the [`collective`] module). A [`run::Run`] bundles one worker's dimensions,
//! shard, centroid replica, and collective handle; [`controller`] drives the fixed-point loop to
//! convergence.
//!
//! Three collective backends satisfy the same [`collective::Collective`] trait: a trivial
//! single-worker backend, an in-process thread backend used by the test suite, and (behind the
//! `process` feature) a real multi-process backend. All three produce identical assignments for
//! identical input, which is the crate's central determinism guarantee.

pub mod error;
pub mod vector;
pub mod partition;
pub mod shard;
pub mod centroid;
pub mod collective;
pub mod run;
pub mod controller;
pub mod input;
pub mod output;

pub use error::{Error, Result};
pub use run::{Run, RunConfig};
