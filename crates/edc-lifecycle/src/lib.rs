#![allow(missing_docs)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod record;
pub mod role;
pub mod status;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{CONFIG_ENV, ConfigError, LifecycleConfig};
pub use engine::{Lifecycle, SignatureInput, TransitionRequest};
pub use error::{LifecycleError, PreconditionError, StoreError, StoreResult};
pub use memory::{InMemoryResponseStore, StoreSnapshot};
pub use record::{AuditEntry, NewResponse, Response, SignatureRecord};
pub use role::{Role, RolePolicy, RoleResolver, RoleTier, StaticRoleResolver, UnknownRole};
pub use status::{ResponseStatus, TransitionKind, UnknownTransition};
pub use store::{ResponseCommit, ResponseStore};
