//! SLA evaluation for cascade entries.
//!
//! Pure functions over `(now, started_at, sla_hours)`. The urgency bucket is a
//! display classification computed independently of ledger status: a row can
//! report `Expirado` while still nominally `Active` until a sweep claims it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;

const MILLIS_PER_HOUR: i64 = 3_600_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyBucket {
    Ok,
    Alerta,
    Critico,
    Expirado,
}

impl UrgencyBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Alerta => "alerta",
            Self::Critico => "critico",
            Self::Expirado => "expirado",
        }
    }
}

/// Percent-of-budget thresholds for the `Alerta` and `Critico` buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaThresholds {
    pub warning_pct: u32,
    pub critical_pct: u32,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self { warning_pct: 75, critical_pct: 90 }
    }
}

impl SlaThresholds {
    pub fn new(warning_pct: u32, critical_pct: u32) -> Result<Self, ApplicationError> {
        let thresholds = Self { warning_pct, critical_pct };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.warning_pct == 0 || self.warning_pct >= self.critical_pct || self.critical_pct >= 100
        {
            return Err(ApplicationError::Configuration(format!(
                "sla thresholds must satisfy 0 < warning ({}) < critical ({}) < 100",
                self.warning_pct, self.critical_pct
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaEvaluation {
    pub bucket: UrgencyBucket,
    pub hours_remaining: Decimal,
    pub consumed_pct: Decimal,
}

pub fn evaluate(
    now: DateTime<Utc>,
    started_at: DateTime<Utc>,
    sla_hours: u32,
    thresholds: &SlaThresholds,
) -> SlaEvaluation {
    SlaEvaluation {
        bucket: status_bucket(now, started_at, sla_hours, thresholds),
        hours_remaining: hours_remaining(now, started_at, sla_hours),
        consumed_pct: consumed_pct(now, started_at, sla_hours),
    }
}

pub fn status_bucket(
    now: DateTime<Utc>,
    started_at: DateTime<Utc>,
    sla_hours: u32,
    thresholds: &SlaThresholds,
) -> UrgencyBucket {
    let elapsed = i128::from(elapsed_millis(now, started_at));
    let budget = i128::from(budget_millis(sla_hours));

    // Compared as elapsed * 100 >= pct * budget to stay in integer arithmetic.
    if elapsed >= budget {
        UrgencyBucket::Expirado
    } else if elapsed * 100 >= i128::from(thresholds.critical_pct) * budget {
        UrgencyBucket::Critico
    } else if elapsed * 100 >= i128::from(thresholds.warning_pct) * budget {
        UrgencyBucket::Alerta
    } else {
        UrgencyBucket::Ok
    }
}

/// `max(0, sla_hours - elapsed)` in hours, rounded to two decimals.
pub fn hours_remaining(now: DateTime<Utc>, started_at: DateTime<Utc>, sla_hours: u32) -> Decimal {
    let remaining = (budget_millis(sla_hours) - elapsed_millis(now, started_at)).max(0);
    (Decimal::from(remaining) / Decimal::from(MILLIS_PER_HOUR)).round_dp(2)
}

pub fn consumed_pct(now: DateTime<Utc>, started_at: DateTime<Utc>, sla_hours: u32) -> Decimal {
    let budget = budget_millis(sla_hours);
    if budget == 0 {
        return Decimal::ONE_HUNDRED;
    }
    (Decimal::from(elapsed_millis(now, started_at)) * Decimal::ONE_HUNDRED / Decimal::from(budget))
        .round_dp(2)
}

fn elapsed_millis(now: DateTime<Utc>, started_at: DateTime<Utc>) -> i64 {
    (now - started_at).num_milliseconds().max(0)
}

fn budget_millis(sla_hours: u32) -> i64 {
    i64::from(sla_hours) * MILLIS_PER_HOUR
}
