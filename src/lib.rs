pub mod amount;
pub mod engine;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use engine::{Command, CycleAdvance, Engine, EngineConfig, EngineError, Outcome};
pub use model::{ContributionId, GroupId, PayoutId, UserId};
pub use store::{LedgerStore, MemoryLedger, StoreError};
