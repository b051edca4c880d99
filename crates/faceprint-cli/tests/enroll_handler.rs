use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use faceprint_cli::cli::{EnrollArgs, OutputMode, StoreArgs};
use faceprint_cli::commands::{CommandHandler, EnrollHandler};
use faceprint_cli::enroll::EnrollOutcome;
use faceprint_cli::errors::{AppError, ExtractionError};
use faceprint_cli::identities::EmbeddingSummary;

fn sample_args() -> EnrollArgs {
    EnrollArgs {
        user: "alice".into(),
        captures: vec![PathBuf::from("captures/right.json")],
        poses: Some(vec!["Turn Right".into()]),
        store: StoreArgs {
            store_dir: Some(PathBuf::from("/var/lib/faceprint/identities")),
            key_file: None,
        },
    }
}

fn sample_outcome() -> EnrollOutcome {
    EnrollOutcome {
        identity: "alice".into(),
        store_path: PathBuf::from("/var/lib/faceprint/identities/alice.json"),
        embeddings: vec![EmbeddingSummary {
            id: "abc".into(),
            pose: "Turn Right".into(),
            captured_at: "2024-01-01T00:00:00.000Z".into(),
            dimension: 128,
        }],
        rejected: vec![],
        logs: vec!["enrolled".into()],
    }
}

#[test]
fn enroll_handler_passes_verbose_flag_to_renderer() {
    let render_calls = Arc::new(Mutex::new(Vec::new()));
    let handler = EnrollHandler::with_dependencies(sample_args(), |_args| Ok(sample_outcome()), {
        let render_calls = Arc::clone(&render_calls);
        move |outcome, mode, verbose| {
            render_calls
                .lock()
                .unwrap()
                .push((outcome.identity.clone(), mode, verbose));
            Ok(())
        }
    });

    let exit = handler.execute(OutputMode::Json, true).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    let calls = render_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("alice".to_string(), OutputMode::Json, true));
}

#[test]
fn enroll_handler_forwards_args_to_runner() {
    let seen = Arc::new(Mutex::new(None));
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        {
            let seen = Arc::clone(&seen);
            move |args: &EnrollArgs| {
                *seen.lock().unwrap() = Some((args.user.clone(), args.captures.len()));
                Ok(sample_outcome())
            }
        },
        |_outcome, _mode, _verbose| Ok(()),
    );

    handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(("alice".to_string(), 1)));
}

#[test]
fn enroll_handler_surfaces_run_errors() {
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        |_args| Err(AppError::Extraction(ExtractionError::AmbiguousFace { count: 2 })),
        |_outcome, _mode, _verbose| Ok(()),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    match err {
        AppError::Extraction(ExtractionError::AmbiguousFace { count }) => assert_eq!(count, 2),
        other => panic!("unexpected error: {other}"),
    }
}
