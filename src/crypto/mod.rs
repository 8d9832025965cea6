pub mod kdf;

pub use kdf::{KDFAlgorithm, KeyDerivation};
