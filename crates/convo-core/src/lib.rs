pub mod bands;
pub mod config;
pub mod error;
pub mod ids;
pub mod snapshot;
pub mod tokenize;
pub mod types;

pub use bands::{classify_item, compute_retrievability, BandThresholds, RetrievabilityBand};
pub use config::ConvoSettings;
pub use error::{ConvoError, Result};
pub use ids::{ItemId, ItemKind};
pub use snapshot::{build_deck_snapshot, DeckBackend, DeckSnapshot, SnapshotItem};
