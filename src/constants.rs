//! Portal, Storage and Pipeline Constants
//!
//! ## Portal
//!
//! The CSE web portal serves its market data through form-encoded POST
//! endpoints under `/api/`. Calls are only accepted from a browser-like
//! session: a cookie obtained by first navigating to the portal root, plus
//! the `Origin`/`Referer`/`X-Requested-With` headers the site's own
//! frontend sends.
//!
//! ## Storage Layout
//!
//! ```text
//! data/
//! ├── marketStatus/2026-10-19_09-30.json     raw envelopes, one dir per endpoint
//! ├── todaySharePrice/...
//! ├── securities/2026-10-19_09-30.json       normalized security records
//! ├── marketSnapshot/2026-10-19_09-30.json   normalized market snapshot
//! ├── reference/symbol_metadata.json         daily symbol reference table
//! └── cse_market_data.csv                    legacy flat export (optional)
//! ```

/// Portal root visited to obtain the session cookie
pub const PORTAL_ROOT_URL: &str = "https://www.cse.lk";

/// Base URL for all API endpoints (endpoint wire name is appended)
pub const API_BASE_URL: &str = "https://www.cse.lk/api/";

/// Browser identity presented on every request of a session
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fixed header set applied to every request of a session handle
pub const SESSION_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json, text/javascript, */*; q=0.01"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Origin", "https://www.cse.lk"),
    ("Referer", "https://www.cse.lk/"),
    ("X-Requested-With", "XMLHttpRequest"),
];

/// Endpoints that require hidden frontend-generated identifiers or are
/// session-guarded beyond the cookie. Never callable by the pipeline.
pub const BLACKLISTED_ENDPOINTS: &[&str] = &[
    "chartData",
    "companyChartDataByStock",
    "detailedTrades",
    "mostActiveTrades",
];

/// File name format for timestamped dataset files (minute granularity)
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// Directory holding the symbol reference table
pub const REFERENCE_DIR: &str = "reference";

/// Symbol reference table file name
pub const REFERENCE_FILE: &str = "symbol_metadata.json";

/// Dataset directory for merged, normalized security records
pub const SECURITIES_DATASET: &str = "securities";

/// Dataset directory for the normalized market snapshot
pub const SNAPSHOT_DATASET: &str = "marketSnapshot";

/// Legacy flat CSV export file name
pub const LEGACY_CSV_FILE: &str = "cse_market_data.csv";

/// Column order of the legacy CSV export
pub const LEGACY_CSV_COLUMNS: &[&str] = &[
    "timestamp",
    "symbol",
    "company_name",
    "security_type",
    "last_price",
    "change",
    "change_percentage",
    "share_volume",
    "trade_count",
    "stock_turnover",
    "market_cap",
    "is_gainer",
    "is_loser",
    "aspi_value",
    "snp_value",
    "market_turnover",
];

/// Upper bound for a single retry backoff
pub const MAX_BACKOFF_SECS: u64 = 30;

/// Per-request HTTP timeout
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Shortest poll interval the minute-granular file naming supports
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;
