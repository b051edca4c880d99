use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, RecognizeArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_recognize;
use crate::recognize::{self, RecognizeOutcome};

/// Exit status for a comparison that completed without a match.
pub const NO_MATCH_EXIT: u8 = 6;

pub struct RecognizeHandler {
    args: RecognizeArgs,
    run: Box<dyn Fn(&RecognizeArgs) -> AppResult<RecognizeOutcome> + Send + Sync>,
    render: Box<dyn Fn(&RecognizeOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl RecognizeHandler {
    pub fn new(args: RecognizeArgs) -> Self {
        Self::with_dependencies(args, recognize::run_recognize, render_recognize)
    }

    pub fn with_dependencies(
        args: RecognizeArgs,
        run: impl Fn(&RecognizeArgs) -> AppResult<RecognizeOutcome> + Send + Sync + 'static,
        render: impl Fn(&RecognizeOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for RecognizeHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode)?;
        if outcome.outcome.result.identity().is_some() {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::from(NO_MATCH_EXIT))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
