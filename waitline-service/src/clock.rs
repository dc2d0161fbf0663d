use chrono::{DateTime, Duration, Utc};

/// Process-side "now". Job delays are derived from this; row admissibility is
/// always decided against the database's own `now()`.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Delay until `target`, clamped to zero for targets already in the past.
pub fn delay_until(target: DateTime<Utc>) -> Duration {
    (target - now()).max(Duration::zero())
}
