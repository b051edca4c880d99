use std::error::Error;
use std::io::{self, Write};

use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::OutputMode;
use crate::enroll::EnrollOutcome;
use crate::errors::{AppError, AppResult};
use crate::identities::{IdentityListOutcome, IdentityRemoveOutcome, IdentityShowOutcome};
use crate::keygen::KeygenOutcome;
use crate::recognize::{CandidateSource, RecognizeOutcome};

pub fn render_enroll(outcome: &EnrollOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    tracing::info!("{line}");
                }
            }
            println!(
                "Enrollment successful: {} embedding(s) stored for {} in {}",
                outcome.embeddings.len(),
                outcome.identity,
                outcome.store_path.display()
            );
            if !outcome.rejected.is_empty() {
                println!("{} capture(s) rejected and retried", outcome.rejected.len());
            }
        }
        OutputMode::Json => write_json_line(&enroll_json_payload(outcome))?,
    }
    Ok(())
}

pub fn render_recognize(outcome: &RecognizeOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            let result = &outcome.outcome.result;
            match result.identity() {
                Some(identity) => println!(
                    "Match: {identity} (score {:.4}, threshold {:.4})",
                    result.score(),
                    outcome.outcome.threshold
                ),
                None => println!(
                    "No match (best score {:.4}, threshold {:.4})",
                    result.score(),
                    outcome.outcome.threshold
                ),
            }
        }
        OutputMode::Json => write_json_line(&recognize_json_payload(outcome))?,
    }
    Ok(())
}

pub fn render_identity_list(outcome: &IdentityListOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            for identity in &outcome.identities {
                println!("{identity}");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "storeDir": outcome.store_dir.display().to_string(),
            "identities": outcome.identities,
        }))?,
    }
    Ok(())
}

pub fn render_identity_show(outcome: &IdentityShowOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "{}: {} embedding(s) in {}",
                outcome.identity,
                outcome.embeddings.len(),
                outcome.store_path.display()
            );
            for line in &outcome.logs {
                println!("  {line}");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "identity": outcome.identity,
            "storePath": outcome.store_path.display().to_string(),
            "embeddings": outcome.embeddings,
        }))?,
    }
    Ok(())
}

pub fn render_identity_remove(outcome: &IdentityRemoveOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!("Removed identity {}", outcome.identity);
        }
        OutputMode::Json => write_json_line(&json!({
            "identity": outcome.identity,
            "storePath": outcome.store_path.display().to_string(),
            "removed": true,
        }))?,
    }
    Ok(())
}

pub fn render_keygen(outcome: &KeygenOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!("Key written to {}", outcome.path.display());
        }
        OutputMode::Json => write_json_line(&json!({
            "path": outcome.path.display().to_string(),
            "replaced": outcome.replaced,
        }))?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}

fn enroll_json_payload(outcome: &EnrollOutcome) -> Value {
    json!({
        "identity": outcome.identity,
        "status": "done",
        "storePath": outcome.store_path.display().to_string(),
        "embeddings": outcome.embeddings,
        "rejected": outcome.rejected,
    })
}

fn recognize_json_payload(outcome: &RecognizeOutcome) -> Value {
    let source = match &outcome.source {
        CandidateSource::Store(dir) => json!({ "store": dir.display().to_string() }),
        CandidateSource::File(path) => json!({ "file": path.display().to_string() }),
    };
    json!({
        "matchedIdentity": outcome.outcome.result.identity(),
        "score": outcome.outcome.result.score(),
        "threshold": outcome.outcome.threshold,
        "probe": outcome.probe.display().to_string(),
        "source": source,
        "scores": outcome.outcome.scores,
        "skipped": outcome.outcome.skipped,
        "diagnostic": outcome.outcome.diagnostic,
    })
}

fn write_json_line<T: Serialize>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}
