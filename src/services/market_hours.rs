use crate::models::PipelineConfig;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;

/// Trading window of the Colombo Stock Exchange
#[derive(Debug, Clone)]
pub struct MarketHours {
    pub open: NaiveTime,  // 09:00
    pub close: NaiveTime, // 14:35 (official close 14:30 plus buffer)
    pub timezone: Tz,     // Asia/Colombo
    pub weekdays_only: bool,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl MarketHours {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            open: config.market_open,
            close: config.market_close,
            timezone: chrono_tz::Asia::Colombo,
            weekdays_only: true,
        }
    }

    fn is_trading_day(&self, weekday: Weekday) -> bool {
        !self.weekdays_only || !matches!(weekday, Weekday::Sat | Weekday::Sun)
    }

    /// Whether the exchange-local date of `now` is a trading day at all
    pub fn is_trading_day_at(&self, now: DateTime<Utc>) -> bool {
        self.is_trading_day(now.with_timezone(&self.timezone).weekday())
    }

    /// Check if `now` falls inside the trading window
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);

        if !self.is_trading_day(local.weekday()) {
            return false;
        }

        let time = local.time();
        time >= self.open && time < self.close
    }

    /// Time until the window next opens; zero while it is open
    pub fn until_next_open(&self, now: DateTime<Utc>) -> Duration {
        if self.is_open_at(now) {
            return Duration::ZERO;
        }

        let today = now.with_timezone(&self.timezone).date_naive();

        // A full week always contains a trading day
        for offset in 0..8 {
            let date = today + ChronoDuration::days(offset);
            if !self.is_trading_day(date.weekday()) {
                continue;
            }

            let candidate = match self.timezone.from_local_datetime(&date.and_time(self.open)).earliest() {
                Some(c) => c.with_timezone(&Utc),
                None => continue,
            };

            if candidate > now {
                return (candidate - now).to_std().unwrap_or(Duration::ZERO);
            }
        }

        Duration::from_secs(3600)
    }
}
