use std::any::Any;
use std::process::ExitCode;

use crate::cli::{KeygenArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::keygen::{self, KeygenOutcome};
use crate::output::render_keygen;

pub struct KeygenHandler {
    args: KeygenArgs,
    run: Box<dyn Fn(&KeygenArgs) -> AppResult<KeygenOutcome> + Send + Sync>,
    render: Box<dyn Fn(&KeygenOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl KeygenHandler {
    pub fn new(args: KeygenArgs) -> Self {
        Self::with_dependencies(args, keygen::run_keygen, render_keygen)
    }

    pub fn with_dependencies(
        args: KeygenArgs,
        run: impl Fn(&KeygenArgs) -> AppResult<KeygenOutcome> + Send + Sync + 'static,
        render: impl Fn(&KeygenOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for KeygenHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
