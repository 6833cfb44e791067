use remb_api::SyncApi;
use remb_core::{ExitCode, RembError, RembResult};
use remb_sync::Puller;
use serde_json::json;

use crate::{GlobalOptions, print_json, signed_in_email, with_context};

pub(crate) fn cmd_pull(reimport: bool, globals: &GlobalOptions) -> RembResult<ExitCode> {
    with_context(globals, |ctx| {
        if reimport {
            if !globals.yes {
                return Err(RembError::usage(
                    "--reimport discards the sync cursor and re-downloads everything; rerun with --yes",
                ));
            }
            ctx.store.clear_cookie()?;
        }

        let api = SyncApi::new(&ctx.config.api_url)?;
        let puller = Puller::new(&api, &ctx.session, &ctx.store, &ctx.config);
        let outcome = puller.pull()?;

        if globals.json {
            print_json(&json!({"ok": true, "result": outcome}))?;
        } else {
            println!(
                "Pull complete: {} created, {} updated, {} deleted.",
                outcome.notes_created, outcome.notes_updated, outcome.notes_deleted
            );
            if outcome.users_put > 0 || outcome.users_deleted > 0 {
                println!(
                    "User records: {} updated, {} removed.",
                    outcome.users_put, outcome.users_deleted
                );
            }
            match outcome.cookie {
                Some(cookie) => println!("Cursor: {cookie}"),
                None => println!("Cursor: none"),
            }
        }

        Ok(ExitCode::Success)
    })
}

pub(crate) fn cmd_status(globals: &GlobalOptions) -> RembResult<ExitCode> {
    with_context(globals, |ctx| {
        let phase = ctx.session.phase();
        let email = signed_in_email(&ctx.session, &ctx.store);
        let cookie = ctx.store.load_cookie()?;
        let notes = ctx.store.note_count()?;

        if globals.json {
            print_json(&json!({
                "ok": true,
                "result": {
                    "phase": phase.as_str(),
                    "email": email,
                    "cookie": cookie,
                    "notes": notes,
                    "data_dir": ctx.paths.root.display().to_string(),
                }
            }))?;
        } else {
            println!("Account: {}", phase.as_str());
            if let Some(email) = email {
                println!("Email: {email}");
            }
            match cookie {
                Some(cookie) => println!("Cursor: {cookie}"),
                None => println!("Cursor: none (next pull re-imports everything)"),
            }
            println!("Notes: {notes}");
            println!("Data directory: {}", ctx.paths.root.display());
        }

        Ok(ExitCode::Success)
    })
}
