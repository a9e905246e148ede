use std::time::Duration;

/// Summary of a run of keystroke delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayStats {
    pub count: usize,
    /// saturates at `Duration::MAX`
    pub total: Duration,
    /// seconds
    pub mean: f64,
    /// population standard deviation, seconds
    pub std_dev: f64,
}

impl DelayStats {
    /// `None` for an empty slice
    pub fn of(delays: &[Duration]) -> Option<Self> {
        if delays.is_empty() {
            return None;
        }
        let count = delays.len() as f64;
        let secs = || delays.iter().map(Duration::as_secs_f64);

        let mean = secs().sum::<f64>() / count;
        let variance = secs().map(|s| (s - mean) * (s - mean)).sum::<f64>() / count;

        Some(Self {
            count: delays.len(),
            total: delays
                .iter()
                .copied()
                .fold(Duration::ZERO, Duration::saturating_add),
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

/// `1h 02m 03s`, `4m 05s` or `6.2s`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, _) => format!("{:.1}s", d.as_secs_f64()),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, s) => format!("{h}h {m:02}m {s:02}s"),
    }
}
