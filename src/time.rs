//! Time resolution against the engine clock.
//!
//! Host engines ignore (or reject) automation scheduled in the past, so every
//! time handed to the host goes through [`when`] first.

/// Resolve an absolute schedule time.
///
/// `max(now, time or 0) + (delay or 0)`. `NaN` inputs count as absent.
pub fn when(time: Option<f64>, delay: Option<f64>, now: f64) -> f64 {
    let time = time.filter(|t| !t.is_nan()).unwrap_or(0.0);
    let delay = delay.filter(|d| !d.is_nan()).unwrap_or(0.0);
    now.max(time) + delay
}

/// The time `delay` seconds from `now`.
pub fn after(delay: f64, now: f64) -> f64 {
    when(None, Some(delay), now)
}
