//! Services module for fdr-service.

pub mod database;
pub mod events;
pub mod matching;
pub mod memory;
pub mod metrics;
pub mod promotion;
pub mod repository;

pub use database::Database;
pub use events::{
    AuditRecord, AuditSink, EventDeliveryError, EventManager, EventReporter, EventResponse,
    FlowEvent, FlowEventKind, HttpEventManager, NoopEventManager,
};
pub use matching::{decide_entry_status, PaymentMatcher};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use promotion::{DomainState, FlowPromoter};
pub use repository::{BatchControlSource, FlowRepository};
