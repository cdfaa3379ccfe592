use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sector label used when neither the price list nor the sector list names one
pub const UNKNOWN_SECTOR: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub company_name: String,
    pub sector: String,
}

/// One row of the `allSectors` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorEntry {
    pub id: String,
    pub name: String,
}

/// Symbol reference table (symbol -> company name, sector)
///
/// Replaced as a whole on each successful daily refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReference {
    /// Exchange-local calendar day the table was built on
    pub refreshed_on: NaiveDate,
    pub refreshed_at: DateTime<FixedOffset>,
    pub symbols: BTreeMap<String, ReferenceEntry>,
}

impl SymbolReference {
    pub fn new(refreshed_at: DateTime<FixedOffset>) -> Self {
        Self {
            refreshed_on: refreshed_at.date_naive(),
            refreshed_at,
            symbols: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn company_name(&self, symbol: &str) -> Option<&str> {
        self.symbols
            .get(symbol)
            .map(|e| e.company_name.as_str())
            .filter(|name| !name.is_empty())
    }
}
