use std::{
    fmt::Write as _,
    fs::OpenOptions,
    io::Write as _,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

/// A wall-clock timer owned by a [Statistic].
///
/// Timers accumulate: `start`/`stop` may be called repeatedly and the total
/// elapsed time across all completed intervals is reported.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    elapsed: Duration,
    started: Option<Instant>,
}

impl Timer {
    pub fn start(&mut self) {
        debug_assert!(self.started.is_none(), "timer already running");
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// One pass's worth of measurements: named counters plus named timers,
/// reported in insertion order.
#[derive(Debug, Clone)]
pub struct Statistic {
    pass: &'static str,
    source: String,
    measurements: Vec<(&'static str, u64)>,
    timers: Vec<(&'static str, Timer)>,
}

impl Statistic {
    pub fn new(pass: &'static str, source: impl Into<String>) -> Self {
        Self {
            pass,
            source: source.into(),
            measurements: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub fn pass(&self) -> &'static str {
        self.pass
    }

    pub fn add_measurement(&mut self, label: &'static str, value: u64) {
        self.measurements.push((label, value));
    }

    pub fn measurement(&self, label: &str) -> Option<u64> {
        self.measurements.iter().find(|(l, _)| *l == label).map(|(_, v)| *v)
    }

    /// Starts (creating if necessary) the timer with the given label
    pub fn start_timer(&mut self, label: &'static str) {
        if let Some((_, timer)) = self.timers.iter_mut().find(|(l, _)| *l == label) {
            timer.start();
            return;
        }
        let mut timer = Timer::default();
        timer.start();
        self.timers.push((label, timer));
    }

    pub fn stop_timer(&mut self, label: &'static str) {
        if let Some((_, timer)) = self.timers.iter_mut().find(|(l, _)| *l == label) {
            timer.stop();
        }
    }

    /// Renders this statistic as a single record line:
    /// `<pass> <source> label:value ... label:elapsed_ns`
    fn render(&self) -> String {
        let mut line = format!("{} {}", self.pass, self.source);
        for (label, value) in &self.measurements {
            write!(line, " {label}:{value}").unwrap();
        }
        for (label, timer) in &self.timers {
            write!(line, " {label}[ns]:{}", timer.elapsed().as_nanos()).unwrap();
        }
        line
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatisticsError {
    #[error("failed to write statistics to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Collects statistics from passes that were asked to produce them.
///
/// Passes hand over finished [Statistic]s; nothing is persisted until
/// [StatisticsCollector::write_to_file] appends the collected records to the
/// session's statistics file, one line per statistic.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    demanded: bool,
    collected: Vec<Statistic>,
}

impl StatisticsCollector {
    /// A collector that keeps everything passes report
    pub fn demanded() -> Self {
        Self {
            demanded: true,
            collected: Vec::new(),
        }
    }

    /// A collector that silently drops everything; used when no statistics
    /// output was requested.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_demanded(&self) -> bool {
        self.demanded
    }

    pub fn collect(&mut self, statistic: Statistic) {
        if self.demanded {
            self.collected.push(statistic);
        }
    }

    pub fn collected(&self) -> &[Statistic] {
        &self.collected
    }

    /// Appends all collected records to `path`, creating the file if needed
    pub fn write_to_file(&self, path: &Path) -> Result<(), StatisticsError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| StatisticsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        for statistic in &self.collected {
            writeln!(file, "{}", statistic.render()).map_err(|source| StatisticsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}
