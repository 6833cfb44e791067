mod commands;

use clap::{Parser, Subcommand};
use remb_api::{AuthApi, decode_access_token};
use remb_auth::Session;
use remb_core::{ExitCode, RembError, RembResult};
use remb_fs::{Config, DataPaths, init_data_dir};
use remb_store::Store;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "remb",
    version,
    about = "Pull Rember items into a local review store",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    Pull {
        #[arg(long)]
        reimport: bool,
    },
    Status,
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    Login {
        #[arg(long)]
        no_browser: bool,
    },
    Status,
    Logout,
    Refresh,
}

#[derive(Debug, Clone)]
struct GlobalOptions {
    data_dir: Option<PathBuf>,
    json: bool,
    yes: bool,
}

struct AppContext {
    paths: DataPaths,
    config: Config,
    store: Store,
    session: Session,
}

fn main() {
    let cli = Cli::parse();
    configure_logging(cli.debug, cli.json, cli.no_color);

    let globals = GlobalOptions {
        data_dir: cli.data_dir,
        json: cli.json,
        yes: cli.yes,
    };

    let result = run_command(cli.command, &globals);

    let exit = match result {
        Ok(code) => code,
        Err(error) => {
            render_error(&error, globals.json);
            error.exit_code()
        }
    };

    std::process::exit(exit.as_i32());
}

fn configure_logging(debug: bool, json: bool, no_color: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(!no_color)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run_command(command: Command, globals: &GlobalOptions) -> RembResult<ExitCode> {
    match command {
        Command::Auth { command } => commands::auth::cmd_auth(command, globals),
        Command::Pull { reimport } => commands::sync::cmd_pull(reimport, globals),
        Command::Status => commands::sync::cmd_status(globals),
    }
}

fn with_context<F>(globals: &GlobalOptions, run: F) -> RembResult<ExitCode>
where
    F: FnOnce(AppContext) -> RembResult<ExitCode>,
{
    let init = init_data_dir(globals.data_dir.as_deref())?;
    let config = init.config;
    let store = Store::open(&init.paths)?;
    let api = AuthApi::new(&config.issuer_url, &config.client_id)?;
    let session = Session::new(
        api,
        store.clone(),
        Duration::from_secs(config.listen_timeout_secs),
    );
    session.refresh_state_from_tokens()?;

    run(AppContext {
        paths: init.paths,
        config,
        store,
        session,
    })
}

/// Email of the signed-in account, looked up from the synced user record.
/// Best effort; commands that only need the phase must not fail on a
/// missing or stale record.
pub(crate) fn signed_in_email(session: &Session, store: &Store) -> Option<String> {
    let tokens = session.tokens()?;
    let claims = decode_access_token(&tokens.access).ok()?;
    store.user_email(&claims.subject_id).ok().flatten()
}

fn render_error(error: &RembError, json_output: bool) {
    if json_output {
        let payload = json!({
            "ok": false,
            "error": {
                "kind": error.kind,
                "message": &error.message,
            }
        });
        let serialized = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| {
            "{\"ok\":false,\"error\":{\"kind\":\"io\",\"message\":\"failed to serialize error\"}}".to_string()
        });
        eprintln!("{serialized}");
    } else {
        eprintln!("error: {}", error.message);
    }
}

fn print_json<T: Serialize>(value: &T) -> RembResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| RembError::io(format!("failed to render JSON output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
