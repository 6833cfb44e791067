use remb_api::decode_access_token;
use remb_auth::AuthPhase;
use remb_core::{ExitCode, RembError, RembResult};
use serde_json::json;

use crate::{AuthCommand, GlobalOptions, print_json, signed_in_email, with_context};

pub(crate) fn cmd_auth(command: AuthCommand, globals: &GlobalOptions) -> RembResult<ExitCode> {
    with_context(globals, |ctx| match command {
        AuthCommand::Login { no_browser } => {
            if ctx.session.phase() == AuthPhase::SignedIn {
                return Err(RembError::usage(
                    "already signed in; run `remb auth logout` first",
                ));
            }

            let flow = ctx.session.sign_in()?;

            if no_browser {
                eprintln!("Open this URL to sign in:\n{}", flow.url());
            } else {
                match open::that(flow.url()) {
                    Ok(()) => eprintln!("Waiting for the browser sign-in to finish..."),
                    Err(error) => eprintln!(
                        "Could not open a browser ({error}). Open this URL to sign in:\n{}",
                        flow.url()
                    ),
                }
            }

            flow.wait()?;

            let email = signed_in_email(&ctx.session, &ctx.store);

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "phase": ctx.session.phase().as_str(),
                        "email": email,
                    }
                }))?;
            } else if let Some(email) = email {
                println!("Signed in as {email}.");
            } else {
                println!("Signed in.");
            }

            Ok(ExitCode::Success)
        }
        AuthCommand::Status => {
            let phase = ctx.session.phase();
            let signed_in = phase == AuthPhase::SignedIn;
            let email = signed_in_email(&ctx.session, &ctx.store);

            if globals.json {
                print_json(&json!({
                    "ok": signed_in,
                    "result": {
                        "phase": phase.as_str(),
                        "email": email,
                    }
                }))?;
            } else {
                println!("Signed in: {}", if signed_in { "yes" } else { "no" });
                if let Some(email) = email {
                    println!("Email: {email}");
                }
            }

            if signed_in {
                Ok(ExitCode::Success)
            } else {
                Ok(ExitCode::Auth)
            }
        }
        AuthCommand::Logout => {
            if ctx.session.phase() != AuthPhase::SignedIn {
                return Err(RembError::usage("not signed in"));
            }

            ctx.session.log_out()?;

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "phase": ctx.session.phase().as_str(),
                    }
                }))?;
            } else {
                println!("Signed out.");
            }

            Ok(ExitCode::Success)
        }
        AuthCommand::Refresh => {
            if ctx.session.phase() != AuthPhase::SignedIn {
                return Err(RembError::auth(
                    "not signed in; run `remb auth login` first",
                ));
            }

            ctx.session.refresh_tokens()?;

            let tokens = ctx
                .session
                .tokens()
                .ok_or_else(|| RembError::auth("no stored tokens after refresh"))?;
            let claims = decode_access_token(&tokens.access)?;
            let access_expiration = claims.exp as i64;

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "phase": ctx.session.phase().as_str(),
                        "access_expiration": access_expiration,
                    }
                }))?;
            } else {
                println!("Session refreshed.");
                println!("Access expiration: {access_expiration}");
            }

            Ok(ExitCode::Success)
        }
    })
}
