//! The command-line interface of the compiler. The driver parses options
//! into a [Session], hands it to the pipeline together with the frontends
//! the host registered, and maps the outcome to an exit code: zero on
//! success, non-zero on any reported error.

use std::{ffi::OsString, path::PathBuf};

use clap::Parser;
use loomc_compile::Frontend;
use loomc_session::{OptLevel, Session};

/// This struct provides the command-line interface used by `loomc`
#[derive(Debug, Parser)]
#[command(name = "loomc")]
#[command(version, about = "An RVSDG-based optimizing compiler", long_about = None)]
pub struct Loomc {
    /// The input file to compile
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Where to write the output
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// The optimization level to compile at
    #[arg(short = 'O', value_name = "LEVEL", default_value = "2")]
    opt_level: OptLevelArg,

    /// Append pass statistics to the given file
    #[arg(long = "print-stats", value_name = "FILE")]
    statistics: Option<PathBuf>,

    /// Skip functions the frontend cannot convert instead of failing
    #[arg(long)]
    skip_unsupported_functions: bool,

    /// Force common-node elimination on or off
    #[arg(long = "cne", overrides_with = "no_cne")]
    cne: bool,
    #[arg(long = "no-cne", hide = true)]
    no_cne: bool,

    /// Force dead-node elimination on or off
    #[arg(long = "dne", overrides_with = "no_dne")]
    dne: bool,
    #[arg(long = "no-dne", hide = true)]
    no_dne: bool,

    /// Force function inlining on or off
    #[arg(long = "inline", overrides_with = "no_inline")]
    inline: bool,
    #[arg(long = "no-inline", hide = true)]
    no_inline: bool,

    /// Force gamma pull-in on or off
    #[arg(long = "pull", overrides_with = "no_pull")]
    pull: bool,
    #[arg(long = "no-pull", hide = true)]
    no_pull: bool,

    /// Force binary flattening and reduction on or off
    #[arg(long = "flatten", overrides_with = "no_flatten")]
    flatten: bool,
    #[arg(long = "no-flatten", hide = true)]
    no_flatten: bool,
}

#[derive(Debug, Copy, Clone, clap::ValueEnum)]
enum OptLevelArg {
    #[value(name = "0")]
    O0,
    #[value(name = "1")]
    O1,
    #[value(name = "2")]
    O2,
    #[value(name = "3")]
    O3,
}

impl From<OptLevelArg> for OptLevel {
    fn from(level: OptLevelArg) -> Self {
        match level {
            OptLevelArg::O0 => OptLevel::None,
            OptLevelArg::O1 => OptLevel::O1,
            OptLevelArg::O2 => OptLevel::O2,
            OptLevelArg::O3 => OptLevel::O3,
        }
    }
}

fn toggle(enable: bool, disable: bool) -> Option<bool> {
    match (enable, disable) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        (false, false) => None,
    }
}

impl Loomc {
    /// Builds the session this invocation describes
    pub fn into_session(self) -> Session {
        let mut session = Session::new(self.input).with_opt_level(self.opt_level.into());
        session.output = self.output;
        session.statistics_path = self.statistics;
        session.skip_unsupported_functions = self.skip_unsupported_functions;
        session.passes.cne = toggle(self.cne, self.no_cne);
        session.passes.dne = toggle(self.dne, self.no_dne);
        session.passes.inlining = toggle(self.inline, self.no_inline);
        session.passes.pull = toggle(self.pull, self.no_pull);
        session.passes.flatten = toggle(self.flatten, self.no_flatten);
        session
    }

    /// Parses `args` and runs the pipeline with the given frontends
    pub fn run<A>(args: A, frontends: &[&dyn Frontend]) -> anyhow::Result<()>
    where
        A: IntoIterator<Item = OsString>,
    {
        let options = Self::try_parse_from(args)?;
        let session = options.into_session();
        loomc_compile::compile(&session, frontends)?;
        Ok(())
    }
}
