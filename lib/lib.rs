//! tardis-fs shared library: a read-only FUSE view of a MyTardis server.

/// Time-bucketed metadata cache feeding the tree.
pub mod cache;
/// Backend listings of experiments, datasets and datafiles.
pub mod catalog;
pub mod credentials;
pub mod exchange;
/// Kernel-facing plumbing.
pub mod fs;
pub mod handles;
pub mod launcher;
pub mod naming;
/// The privileged side of the descriptor exchange.
pub mod resolver;
pub mod timestamps;
pub mod trc;
pub mod tree;
pub mod vfs;
