use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::config::{ActionSettings, Schedule};
use crate::engine::ActionEngine;
use crate::error::Result;
use crate::liveness::{Heartbeat, Liveness};

/// Cloneable stop request shared between the loop and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (stopped, condvar) = &*self.inner;
        match stopped.lock() {
            Ok(mut stopped) => *stopped = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (stopped, _) = &*self.inner;
        match stopped.lock() {
            Ok(stopped) => *stopped,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep up to `timeout`, waking early on stop. Returns whether stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (stopped, condvar) = &*self.inner;
        let guard = match stopped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match condvar.wait_timeout_while(guard, timeout, |stopped| !*stopped) {
            Ok((stopped, _)) => *stopped,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

/// Time left until the next cycle starts, given how long this one took.
/// A cycle that overran its period is followed immediately by the next.
pub fn next_cycle_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Run cycles over `endpoints` until `schedule.once` or a stop request.
///
/// Cycles start every `schedule.sleep_time`; time spent processing counts
/// against the sleep. The liveness registration is held for the whole loop
/// and failing to acquire it is the only error returned. Yields the number of
/// cycles run.
pub fn run_loop(
    engine: &ActionEngine,
    endpoints: &[String],
    settings: &ActionSettings,
    schedule: &Schedule,
    liveness: &dyn Liveness,
    stop: &StopSignal,
) -> Result<u64> {
    let mut heartbeat = Heartbeat::acquire(liveness)?;
    let assignment = heartbeat.assignment();
    info!(
        "Registered as worker {}/{}",
        assignment.worker, assignment.total
    );

    let mut cycles = 0u64;
    while !stop.is_stopped() {
        let start = Instant::now();
        let assignment = heartbeat.beat();
        debug!(
            "Cycle {} as worker {}/{}",
            cycles + 1,
            assignment.worker,
            assignment.total
        );

        match engine.resolve_endpoints(endpoints) {
            Ok(endpoints) => {
                info!("Endpoints this cycle: {:?}", endpoints);
                engine.run_cycle(&endpoints, settings, stop);
            }
            Err(e) => error!("Skipping cycle: {}", e),
        }
        cycles += 1;

        if schedule.once {
            break;
        }

        let remaining = next_cycle_delay(schedule.sleep_time, start.elapsed());
        debug!("Sleeping {:.1}s until next cycle", remaining.as_secs_f64());
        if stop.wait_timeout(remaining) {
            break;
        }
    }

    info!("Stopping after {} cycles", cycles);
    Ok(cycles)
}
