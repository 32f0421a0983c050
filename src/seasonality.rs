//! Seasonality priors: global hour-of-day and day-of-week visit distributions.
//!
//! A prior is reused for seven days, then recomputed from the global histogram
//! on the next non-startup pass. Per-item histograms are fetched every time.

use chrono::{DateTime, Utc};

use crate::cache::{CacheKey, CacheSnapshot, CacheStore};
use crate::compute::ComputeService;
use crate::error::RankError;
use crate::history::InteractionSource;
use crate::types::{Period, SeasonalityData, SeasonalityPrior};

/// Priors older than this are recomputed (milliseconds).
pub const PRIOR_EXPIRATION_MS: i64 = 1000 * 60 * 60 * 24 * 7;

pub struct SeasonalityCache<'a> {
    history: &'a dyn InteractionSource,
    compute: &'a dyn ComputeService,
    cache: &'a dyn CacheStore,
}

impl<'a> SeasonalityCache<'a> {
    pub fn new(
        history: &'a dyn InteractionSource,
        compute: &'a dyn ComputeService,
        cache: &'a dyn CacheStore,
    ) -> Self {
        Self {
            history,
            compute,
            cache,
        }
    }

    pub async fn get_hourly(
        &self,
        guids: &[String],
        snapshot: &CacheSnapshot,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<SeasonalityData, RankError> {
        self.get(Period::Hourly, guids, snapshot.hourly_seasonality.as_ref(), is_startup, now)
            .await
    }

    pub async fn get_daily(
        &self,
        guids: &[String],
        snapshot: &CacheSnapshot,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<SeasonalityData, RankError> {
        self.get(Period::Daily, guids, snapshot.daily_seasonality.as_ref(), is_startup, now)
            .await
    }

    async fn get(
        &self,
        period: Period,
        guids: &[String],
        cached: Option<&SeasonalityPrior>,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<SeasonalityData, RankError> {
        let usable = cached.filter(|p| p.pvec.len() == period.len());
        let expired = usable.is_some_and(|p| is_expired(p, now));

        let pvec = if is_startup {
            if usable.is_none() || expired {
                log::debug!("Startup pass: not recomputing {} seasonality prior", period.as_str());
            }
            usable.map(|p| p.pvec.clone())
        } else if usable.is_none() || expired {
            Some(self.refresh_prior(period, now).await?)
        } else {
            log::debug!("Reusing cached {} seasonality prior", period.as_str());
            usable.map(|p| p.pvec.clone())
        };

        let hists = match period {
            Period::Hourly => self.history.fetch_hourly_histogram(guids).await?,
            Period::Daily => self.history.fetch_daily_histogram(guids).await?,
        };

        Ok(SeasonalityData { pvec, hists })
    }

    async fn refresh_prior(&self, period: Period, now: DateTime<Utc>) -> Result<Vec<f64>, RankError> {
        let histogram = match period {
            Period::Hourly => self.history.fetch_global_hourly_histogram().await?,
            Period::Daily => self.history.fetch_global_daily_histogram().await?,
        };
        let pvec = self.compute.sum_norm(histogram).await?;

        let prior = SeasonalityPrior {
            pvec: pvec.clone(),
            timestamp: now.timestamp_millis(),
        };
        let key = match period {
            Period::Hourly => CacheKey::HourlySeasonality,
            Period::Daily => CacheKey::DailySeasonality,
        };
        self.cache
            .set(key, serde_json::to_value(&prior).map_err(crate::cache::CacheError::from)?)
            .await?;

        log::debug!("Recomputed {} seasonality prior", period.as_str());
        Ok(pvec)
    }
}

fn is_expired(prior: &SeasonalityPrior, now: DateTime<Utc>) -> bool {
    now.timestamp_millis() - prior.timestamp > PRIOR_EXPIRATION_MS
}
