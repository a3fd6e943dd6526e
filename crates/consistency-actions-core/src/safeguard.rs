/// Outcome of the fraction-based circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// No files known at the endpoint; nothing can be judged.
    Skip,
    Proceed { fraction: f64 },
    Abort { fraction: f64, percent: f64 },
}

impl Verdict {
    pub fn proceeds(&self) -> bool {
        matches!(self, Verdict::Proceed { .. })
    }

    /// Reason string recorded with an aborted phase, e.g. `60.00% dark`.
    pub fn reason(&self, label: &str) -> Option<String> {
        match self {
            Verdict::Abort { percent, .. } => Some(format!("{:.2}% {}", percent, label)),
            _ => None,
        }
    }
}

/// Proceed only when `count / total_known_files` is strictly below
/// `max_fraction`, or when `force_proceed` is set.
pub fn evaluate(
    count: u64,
    total_known_files: u64,
    max_fraction: f64,
    force_proceed: bool,
) -> Verdict {
    if total_known_files == 0 {
        return Verdict::Skip;
    }

    let fraction = count as f64 / total_known_files as f64;
    if fraction < max_fraction || force_proceed {
        Verdict::Proceed { fraction }
    } else {
        Verdict::Abort {
            fraction,
            percent: 100.0 * fraction,
        }
    }
}
