pub mod index_set;

pub use index_set::IndexSet;
