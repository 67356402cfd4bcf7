pub mod chunking;
pub mod extract;
