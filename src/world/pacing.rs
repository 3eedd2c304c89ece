//! Adaptive tick pacing
//!
//! The loop never runs on a fixed-rate timer. After each tick the next
//! deadline is derived from how long the tick actually took, so an
//! overloaded game slows itself down instead of queueing ticks.

use std::time::Duration;

use tokio::time::Instant;

use crate::util::time::as_millis_f64;

/// A tick is degraded once computation or render takes longer than this
/// multiple of the desired interval
pub const SAFETY_MARGIN: f64 = 1.5;

/// Interval to wait before the next tick, plus why it was lengthened
#[derive(Debug, Clone, PartialEq)]
pub struct PacingDecision {
    pub interval: Duration,
    pub diagnostic: Option<String>,
}

impl PacingDecision {
    pub fn is_degraded(&self) -> bool {
        self.diagnostic.is_some()
    }

    /// Human-readable rate carried in the next tick packet
    pub fn tps_text(&self) -> String {
        let seconds = self.interval.as_secs_f64();
        let tps = if seconds > 0.0 { 1.0 / seconds } else { 0.0 };
        match &self.diagnostic {
            Some(diagnostic) => format!("{:.1} TPS ({})", tps, diagnostic),
            None => format!("{:.1} TPS", tps),
        }
    }
}

/// Choose the next tick interval from the last tick's measured timings
pub fn adapt_interval(desired: Duration, computation: Duration, render: Duration) -> PacingDecision {
    let budget = desired.mul_f64(SAFETY_MARGIN);
    let computation_over = computation > budget;
    let render_over = render > budget;

    let diagnostic = match (computation_over, render_over) {
        (false, false) => {
            return PacingDecision {
                interval: desired,
                diagnostic: None,
            }
        }
        (true, false) => format!(
            "computation {:.1}ms exceeded {:.1}ms",
            as_millis_f64(computation),
            as_millis_f64(budget)
        ),
        (false, true) => format!(
            "render {:.1}ms exceeded {:.1}ms",
            as_millis_f64(render),
            as_millis_f64(budget)
        ),
        (true, true) => format!(
            "computation {:.1}ms and render {:.1}ms exceeded {:.1}ms",
            as_millis_f64(computation),
            as_millis_f64(render),
            as_millis_f64(budget)
        ),
    };

    PacingDecision {
        interval: computation.max(render),
        diagnostic: Some(diagnostic),
    }
}

/// The single pending deadline of a recurring task. Stopping is simply
/// not rescheduling.
#[derive(Debug, Default, Clone)]
pub struct TickScheduler {
    deadline: Option<Instant>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_scheduled(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the deadline once it has fired
    pub fn take(&mut self) -> Option<Instant> {
        self.deadline.take()
    }
}

/// Resolve at `deadline`; never resolves when nothing is scheduled
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
