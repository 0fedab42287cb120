use std::path::PathBuf;

/// The optimization level selected for a compilation session.
///
/// Levels are cumulative: each level runs everything the previous one runs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// Construct the RVSDG, run no optimization passes
    None,
    /// Dead-node elimination only
    O1,
    /// Common-node elimination, inlining, and binary normalization
    #[default]
    O2,
    /// Gamma pull-in on top of everything O2 runs
    O3,
}

/// Per-pass enable flags, layered over the [OptLevel] defaults.
///
/// A flag explicitly set on the command line wins over the level default.
#[derive(Debug, Default, Copy, Clone)]
pub struct Passes {
    pub cne: Option<bool>,
    pub dne: Option<bool>,
    pub inlining: Option<bool>,
    pub pull: Option<bool>,
    pub flatten: Option<bool>,
}

impl Passes {
    fn enabled(flag: Option<bool>, default: bool) -> bool {
        flag.unwrap_or(default)
    }
}

/// Everything the pipeline needs to know about one compiler invocation.
#[derive(Debug, Clone)]
pub struct Session {
    /// The path of the source file being compiled, used for statistics and
    /// diagnostics; the file itself is read by whichever frontend claims it.
    pub input: PathBuf,
    /// Where the backend output should be written, if any
    pub output: Option<PathBuf>,
    /// Where statistics records are appended, if demanded
    pub statistics_path: Option<PathBuf>,
    pub opt_level: OptLevel,
    pub passes: Passes,
    /// When set, a function the frontend cannot convert is skipped with a
    /// warning instead of aborting the whole module.
    pub skip_unsupported_functions: bool,
}

impl Session {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            statistics_path: None,
            opt_level: OptLevel::default(),
            passes: Passes::default(),
            skip_unsupported_functions: false,
        }
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn source_name(&self) -> String {
        self.input.display().to_string()
    }

    pub fn dne_enabled(&self) -> bool {
        Passes::enabled(self.passes.dne, self.opt_level >= OptLevel::O1)
    }

    pub fn cne_enabled(&self) -> bool {
        Passes::enabled(self.passes.cne, self.opt_level >= OptLevel::O2)
    }

    pub fn inlining_enabled(&self) -> bool {
        Passes::enabled(self.passes.inlining, self.opt_level >= OptLevel::O2)
    }

    pub fn flatten_enabled(&self) -> bool {
        Passes::enabled(self.passes.flatten, self.opt_level >= OptLevel::O2)
    }

    pub fn pull_enabled(&self) -> bool {
        Passes::enabled(self.passes.pull, self.opt_level >= OptLevel::O3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults() {
        let session = Session::new("a.ll").with_opt_level(OptLevel::O1);
        assert!(session.dne_enabled());
        assert!(!session.cne_enabled());
        assert!(!session.pull_enabled());

        let session = Session::new("a.ll").with_opt_level(OptLevel::O3);
        assert!(session.cne_enabled());
        assert!(session.pull_enabled());
    }

    #[test]
    fn explicit_toggle_wins() {
        let mut session = Session::new("a.ll").with_opt_level(OptLevel::None);
        session.passes.cne = Some(true);
        assert!(session.cne_enabled());
        assert!(!session.dne_enabled());

        let mut session = Session::new("a.ll").with_opt_level(OptLevel::O3);
        session.passes.pull = Some(false);
        assert!(!session.pull_enabled());
    }
}
