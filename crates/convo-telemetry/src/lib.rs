pub mod db;
pub mod error;
pub mod events;
pub mod export;
pub mod store;
pub mod types;

pub use error::{Result, TelemetryError};
pub use export::{export_telemetry, TelemetryExport};
pub use store::ConversationTelemetryStore;
pub use types::{MasteryCache, MasteryCounters};
