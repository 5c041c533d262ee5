//! Sweep engine: cadence policy, idempotency log, recipient resolution and the
//! dispatcher that ties them to the delivery channels.

pub mod cadence;
pub mod cleanup;
pub mod dispatcher;
pub mod idempotency;
pub mod memory;
pub mod resolver;
pub mod runtime;
pub mod store;

pub use cadence::{Bucket, CadencePolicy, Evaluation};
pub use cleanup::{CleanupReport, RetentionCleanup};
pub use dispatcher::{DeliveryOutcome, Dispatcher, SweepError, SweepKind, SweepReport};
pub use idempotency::{IdempotencyLog, MarkerKey};
pub use runtime::SweepRuntime;
pub use store::{CandidatePage, CandidateQuery, RecordStore, RosterDirectory, StoreError};
