//! Edge-triggered up/down tracking for the polling loop.

use chrono::{DateTime, TimeDelta, Utc};

/// A change in health worth telling someone about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTransition {
    WentDown {
        since: DateTime<Utc>,
        reason: String,
    },
    Recovered {
        down_since: DateTime<Utc>,
        downtime: TimeDelta,
    },
}

/// Remembers when the portal went down. Only state changes produce a
/// [`HealthTransition`]; repeated failures or successes produce nothing.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    down_since: Option<DateTime<Utc>>,
}

impl HealthTracker {
    pub fn is_down(&self) -> bool {
        self.down_since.is_some()
    }

    pub fn down_since(&self) -> Option<DateTime<Utc>> {
        self.down_since
    }

    pub fn observe_failure(
        &mut self,
        now: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Option<HealthTransition> {
        if self.down_since.is_some() {
            return None;
        }
        self.down_since = Some(now);
        Some(HealthTransition::WentDown {
            since: now,
            reason: reason.into(),
        })
    }

    pub fn observe_success(&mut self, now: DateTime<Utc>) -> Option<HealthTransition> {
        let down_since = self.down_since.take()?;
        Some(HealthTransition::Recovered {
            down_since,
            downtime: now - down_since,
        })
    }
}

/// `1h 05m`, `4m 09s`, or `12s`.
pub fn format_downtime(downtime: TimeDelta) -> String {
    let secs = downtime.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
