pub mod kmer;

pub use kmer::{KmerIndex, PartialMatch};
