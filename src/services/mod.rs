pub mod clock;
pub mod legacy_csv;
pub mod market_hours;
pub mod normalizer;
pub mod session;
pub mod time_series_store;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{sleep_or_cancel, Clock, ManualClock, SystemClock};
pub use legacy_csv::LegacyCsvExporter;
pub use market_hours::MarketHours;
pub use normalizer::{normalize, Normalized};
pub use session::{
    ReqwestTransport, ReqwestTransportFactory, SessionClient, SessionHandle, SessionSettings, Transport,
    TransportError, TransportFactory, TransportResponse,
};
pub use time_series_store::{RawEnvelope, TimeSeriesStore, WriteOutcome};
