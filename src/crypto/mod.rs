pub mod hashing;
pub mod token;

pub use hashing::{random_secret, PasswordHasher, Pbkdf2Hasher};
