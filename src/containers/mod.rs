//! Storage primitives shared by the index builder and the retriever.

// memory-mapped word files
pub mod mmap;
// sorted id sequences handed between planner, executor and join
mod id_list;
// bounded sorted runs used while building adjacency lists
mod sorted_chain;

pub use id_list::IdList;
pub use mmap::MmapFile;
pub use sorted_chain::SortedChain;
