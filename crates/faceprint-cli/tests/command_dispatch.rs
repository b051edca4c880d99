use std::path::PathBuf;

use faceprint_cli::cli::{
    Commands, EnrollArgs, IdentitiesCommands, KeygenArgs, RecognizeArgs, StoreArgs,
};
use faceprint_cli::commands::{
    CommandHandler, EnrollHandler, IdentitiesHandler, KeygenHandler, RecognizeHandler,
};

fn sample_enroll_args() -> EnrollArgs {
    EnrollArgs {
        user: "alice".into(),
        captures: vec![PathBuf::from("capture.json")],
        poses: None,
        store: StoreArgs::default(),
    }
}

fn sample_recognize_args() -> RecognizeArgs {
    RecognizeArgs {
        probe: PathBuf::from("probe.json"),
        candidates: None,
        threshold: None,
        store: StoreArgs::default(),
    }
}

fn assert_dispatch<T: 'static>(command: Commands)
where
    T: CommandHandler,
{
    let handler: Box<dyn CommandHandler> = command.into();
    assert!(handler.as_any().is::<T>());
}

#[test]
fn enroll_command_dispatches_enroll_handler() {
    assert_dispatch::<EnrollHandler>(Commands::Enroll(sample_enroll_args()));
}

#[test]
fn recognize_command_dispatches_recognize_handler() {
    assert_dispatch::<RecognizeHandler>(Commands::Recognize(sample_recognize_args()));
}

#[test]
fn identities_command_dispatches_identities_handler() {
    assert_dispatch::<IdentitiesHandler>(Commands::Identities(IdentitiesCommands::List(
        StoreArgs::default(),
    )));
}

#[test]
fn keygen_command_dispatches_keygen_handler() {
    assert_dispatch::<KeygenHandler>(Commands::Keygen(KeygenArgs {
        output: PathBuf::from("store.key"),
        force: false,
    }));
}
