//! Domain model (IDs, states, payloads, contracts, records, status).

pub mod contract;
pub mod dependency;
pub mod errors;
pub mod failure;
pub mod ids;
pub mod kind;
pub mod payload;
pub mod record;
pub mod state;
pub mod status;
pub mod wiring;

pub use self::contract::{Contract, ContractViolation, FieldSpec};
pub use self::dependency::DependencyGraph;
pub use self::errors::StoreError;
pub use self::failure::{Failure, FailureKind};
pub use self::ids::{ChainId, ParseIdError, TaskId};
pub use self::kind::TaskKind;
pub use self::payload::{KEY_BLUR_LEVEL, KEY_IMAGE_URI, Payload, Value, ValueType};
pub use self::record::{ChainRecord, NewTask, TaskRecord, Transition};
pub use self::state::{ChainState, TaskState};
pub use self::status::{ChainStatus, StatusRecord, Terminal};
pub use self::wiring::{InputBuilder, MergePolicy, Wiring};
