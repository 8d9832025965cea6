pub mod secret;

pub use secret::{SecretString, SecretVec};
