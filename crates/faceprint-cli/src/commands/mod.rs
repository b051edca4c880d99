use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod enroll;
mod identities;
mod keygen;
mod recognize;

pub use enroll::EnrollHandler;
pub use identities::{IdentitiesHandler, IdentitiesHandlerDeps};
pub use keygen::KeygenHandler;
pub use recognize::{RecognizeHandler, NO_MATCH_EXIT};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args)),
            Commands::Recognize(args) => Box::new(RecognizeHandler::new(args)),
            Commands::Identities(cmd) => Box::new(IdentitiesHandler::new(cmd)),
            Commands::Keygen(args) => Box::new(KeygenHandler::new(args)),
        }
    }
}
