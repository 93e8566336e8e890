//! Containers shared by the renderer crates.

pub mod flagvec;
pub mod generational_pool;

pub use generational_pool::{GenerationalPool, Handle};
