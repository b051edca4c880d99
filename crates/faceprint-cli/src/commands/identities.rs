use std::any::Any;
use std::process::ExitCode;

use crate::cli::{IdentitiesCommands, IdentityArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::identities::{
    self, IdentityListOutcome, IdentityRemoveOutcome, IdentityShowOutcome,
};
use crate::output::{render_identity_list, render_identity_remove, render_identity_show};

pub struct IdentitiesHandler {
    command: IdentitiesCommands,
    deps: IdentitiesHandlerDeps,
}

pub struct IdentitiesHandlerDeps {
    pub list: Box<dyn Fn(&StoreArgs) -> AppResult<IdentityListOutcome> + Send + Sync>,
    pub show: Box<dyn Fn(&IdentityArgs) -> AppResult<IdentityShowOutcome> + Send + Sync>,
    pub remove: Box<dyn Fn(&IdentityArgs) -> AppResult<IdentityRemoveOutcome> + Send + Sync>,
    pub render_list: Box<dyn Fn(&IdentityListOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_show: Box<dyn Fn(&IdentityShowOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_remove:
        Box<dyn Fn(&IdentityRemoveOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl IdentitiesHandlerDeps {
    pub fn new(
        list: impl Fn(&StoreArgs) -> AppResult<IdentityListOutcome> + Send + Sync + 'static,
        show: impl Fn(&IdentityArgs) -> AppResult<IdentityShowOutcome> + Send + Sync + 'static,
        remove: impl Fn(&IdentityArgs) -> AppResult<IdentityRemoveOutcome> + Send + Sync + 'static,
        render_list: impl Fn(&IdentityListOutcome, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
        render_show: impl Fn(&IdentityShowOutcome, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
        render_remove: impl Fn(&IdentityRemoveOutcome, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            list: Box::new(list),
            show: Box::new(show),
            remove: Box::new(remove),
            render_list: Box::new(render_list),
            render_show: Box::new(render_show),
            render_remove: Box::new(render_remove),
        }
    }
}

impl Default for IdentitiesHandlerDeps {
    fn default() -> Self {
        Self::new(
            identities::run_list,
            identities::run_show,
            identities::run_remove,
            render_identity_list,
            render_identity_show,
            render_identity_remove,
        )
    }
}

impl IdentitiesHandler {
    pub fn new(command: IdentitiesCommands) -> Self {
        Self {
            command,
            deps: IdentitiesHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(command: IdentitiesCommands, deps: IdentitiesHandlerDeps) -> Self {
        Self { command, deps }
    }
}

impl CommandHandler for IdentitiesHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        match &self.command {
            IdentitiesCommands::List(args) => {
                let outcome = (self.deps.list)(args)?;
                (self.deps.render_list)(&outcome, mode)?;
            }
            IdentitiesCommands::Show(args) => {
                let outcome = (self.deps.show)(args)?;
                (self.deps.render_show)(&outcome, mode)?;
            }
            IdentitiesCommands::Remove(args) => {
                let outcome = (self.deps.remove)(args)?;
                (self.deps.render_remove)(&outcome, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
