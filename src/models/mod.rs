mod endpoint;
mod pipeline_config;
mod reference;
mod security;
mod snapshot;

pub use endpoint::Endpoint;
pub use pipeline_config::PipelineConfig;
pub use reference::{ReferenceEntry, SectorEntry, SymbolReference, UNKNOWN_SECTOR};
pub use security::{SecurityRecord, SecurityType};
pub use snapshot::{MarketSnapshot, MarketStatus, SnapshotPart};
