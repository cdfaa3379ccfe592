pub mod latest;
pub mod once;
pub mod run;

use crate::error::Result;
use crate::models::PipelineConfig;
use crate::services::{ReqwestTransportFactory, SystemClock};
use crate::worker::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Environment configuration with command-line overrides applied
pub fn load_config(data_dir: Option<PathBuf>, interval: Option<u64>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(dir) = data_dir {
        config.data_root = dir;
    }
    if let Some(secs) = interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

/// Scheduler wired to the real portal and wall clock
pub fn build_scheduler(config: PipelineConfig, cancel: CancellationToken) -> Scheduler {
    Scheduler::new(config, Arc::new(ReqwestTransportFactory), Arc::new(SystemClock), cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_cli_overrides_are_validated() {
        let config = load_config(Some(PathBuf::from("/tmp/cse-test")), Some(300)).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/cse-test"));
        assert_eq!(config.poll_interval, Duration::from_secs(300));

        let err = load_config(None, Some(15)).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
