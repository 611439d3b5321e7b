pub mod aggregate;
pub mod attribution;
pub mod checkpoint;
pub mod config;
pub mod durable;
pub mod error;
pub mod event_log;
pub mod leads;
pub mod responder;
pub mod service;
pub mod stats;
pub mod users;

pub use attribution::{Attribution, Dimension};
pub use error::{LeadError, Result};
pub use event_log::{EventLog, EventRecord, EventTag};
pub use service::LeadBot;
pub use stats::StatsReport;
pub use users::{UserDirectory, UserRecord, UserUpdate};
