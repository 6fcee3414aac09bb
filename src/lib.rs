pub mod app;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod storage;

// Convenience re-exports (keeps call-sites clean)
pub use app::{LoadReport, RequestContext, Runtime, RuntimeBuilder};
pub use domain::auth::Claim;
pub use domain::error::{RuntimeError, RuntimeResult};
pub use domain::index::{Filter, Index, IndexType, QueryOptions};
pub use domain::model::{
    Action, JsonSchemaEvaluator, Param, RawModel, Resource, Role, RoleClaim, SchemaEvaluator,
    SchemaRegistry, Tenant, User,
};
pub use storage::{BackingStore, MemoryStore, PostgresStore};
