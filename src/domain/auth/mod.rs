pub mod claim;

pub use claim::{check_ttl, Claim, MAX_TOKEN_TTL_SECS};
