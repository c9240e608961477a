//! Pipeline services
//!
//! Each service owns one concern of the refresh cycle and is shared by the
//! workflow coordinator through `Arc`.

pub mod change_detector;
pub mod confidence_scorer;
pub mod fetch_executor;
pub mod monitor;
pub mod provenance_store;
pub mod rate_limiter;
pub mod robots;
pub mod schedule_queue;
pub mod validator;

pub use change_detector::{content_hash, ChangeDetector};
pub use confidence_scorer::ConfidenceScorer;
pub use fetch_executor::{
    FetchError, FetchExecutor, FetchedDocument, HttpTransport, RawResponse, ReqwestTransport,
    TransportError,
};
pub use monitor::{Monitor, WindowStats};
pub use provenance_store::{AcceptedValue, ProvenanceStore};
pub use rate_limiter::RateLimiter;
pub use robots::RobotsRules;
pub use schedule_queue::ScheduleQueue;
pub use validator::{CommitDecision, FieldValue, Rejection, Validator};
