pub mod request;
pub mod runtime;

pub use request::RequestContext;
pub use runtime::{KindReport, LoadReport, Runtime, RuntimeBuilder, BUILTIN_KINDS, SUPERUSER_ROLE};
