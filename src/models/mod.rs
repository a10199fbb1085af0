pub mod entity;
pub mod operation;
pub mod sync;

pub use entity::{Entity, EntityId, Fields};
pub use operation::{OpId, Operation, OperationKind};
pub use sync::{
    ConnectivityEvent, ConnectivityState, FeedEvent, PassReport, ReconciliationReport,
    ReconnectOutcome, SweepReport, SyncStatus, SyncWarning,
};
