use crate::lock;
use remb_core::{RembError, RembResult};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(120);

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
// Bounds how long shutdown can block on a connection mid-handshake.
const HANDLER_IO_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_HEADER_LINES: usize = 64;

/// Query parameters captured from one OAuth redirect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Started,
    Listening,
    Shutdown,
}

#[derive(Debug)]
struct ListenerState {
    phase: Phase,
    outcome: Option<RembResult<Callback>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ListenerState>,
    done: Condvar,
}

/// Ephemeral localhost HTTP endpoint that captures a single OAuth redirect.
///
/// Binding happens at construction so the redirect URI is known before the
/// authorize URL is built. `listen` accepts requests on a background thread
/// until one outcome is recorded, then tears the listener down on every exit
/// path. The listener is single-use.
#[derive(Debug)]
pub struct Loopback {
    redirect_uri: String,
    socket: Mutex<Option<TcpListener>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl Loopback {
    pub fn bind() -> RembResult<Self> {
        let socket = TcpListener::bind(("127.0.0.1", 0)).map_err(|err| {
            RembError::listener(format!("failed to bind loopback listener: {err}"))
        })?;
        let port = socket
            .local_addr()
            .map_err(|err| {
                RembError::listener(format!("failed to read loopback listener address: {err}"))
            })?
            .port();
        socket.set_nonblocking(true).map_err(|err| {
            RembError::listener(format!("failed to configure loopback listener: {err}"))
        })?;

        Ok(Self {
            redirect_uri: format!("http://localhost:{port}/callback"),
            socket: Mutex::new(Some(socket)),
            worker: Mutex::new(None),
            shared: Arc::new(Shared {
                state: Mutex::new(ListenerState {
                    phase: Phase::Started,
                    outcome: None,
                }),
                done: Condvar::new(),
            }),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Blocks until one callback request is captured, the timeout elapses, or
    /// the listener is shut down from another thread. The listener is shut
    /// down before this returns, whatever the outcome.
    ///
    /// A listener is single-use: calling this on an already shut-down
    /// listener reports the closed-listener error (a cancellation can race
    /// the caller here), while a second concurrent call is a contract
    /// violation and panics.
    pub fn listen(&self, timeout: Duration) -> RembResult<Callback> {
        {
            let mut state = lock(&self.shared.state);
            match state.phase {
                Phase::Started => state.phase = Phase::Listening,
                Phase::Listening => panic!("listen is already in progress for this listener"),
                Phase::Shutdown => {
                    return state.outcome.take().unwrap_or_else(|| {
                        Err(RembError::listener("listener closed before a callback arrived"))
                    });
                }
            }
        }

        // A concurrent shutdown may already have taken the socket; the wait
        // below then picks up the failure outcome it recorded.
        if let Some(socket) = lock(&self.socket).take() {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name("remb-loopback".to_string())
                .spawn(move || accept_loop(socket, &shared));
            match spawned {
                Ok(worker) => *lock(&self.worker) = Some(worker),
                Err(err) => {
                    self.shutdown();
                    return Err(RembError::listener(format!(
                        "failed to start callback accept thread: {err}"
                    )));
                }
            }
        }

        let start = Instant::now();
        let mut state = lock(&self.shared.state);
        let outcome = loop {
            if let Some(outcome) = state.outcome.take() {
                break outcome;
            }

            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                break Err(RembError::listener(format!(
                    "timed out after {}s waiting for the authentication callback",
                    timeout.as_secs()
                )));
            };

            state = self
                .shared
                .done
                .wait_timeout(state, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        };
        drop(state);

        self.shutdown();
        outcome
    }

    /// Idempotent teardown. From a listening state it also records a failure
    /// outcome so a blocked `listen` call wakes up, then joins the accept
    /// thread; the thread exits within one poll interval of the phase flip.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.phase != Phase::Shutdown {
                if state.outcome.is_none() {
                    state.outcome = Some(Err(RembError::listener(
                        "listener closed before a callback arrived",
                    )));
                }
                state.phase = Phase::Shutdown;
                self.shared.done.notify_all();
            }
        }

        drop(lock(&self.socket).take());
        if let Some(worker) = lock(&self.worker).take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(socket: TcpListener, shared: &Shared) {
    loop {
        {
            let state = lock(&shared.state);
            if state.phase != Phase::Listening {
                break;
            }
        }

        match socket.accept() {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "handling loopback callback request");
                handle_connection(stream, shared);
            }
            // WouldBlock and transient accept failures both wait out the poll.
            Err(_) => thread::sleep(ACCEPT_POLL_INTERVAL),
        }
    }
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) {
    let _ = stream.set_read_timeout(Some(HANDLER_IO_TIMEOUT));
    let _ = stream.set_write_timeout(Some(HANDLER_IO_TIMEOUT));

    let Some(target) = read_request_target(&stream) else {
        return;
    };

    match callback_from_target(&target) {
        Some(callback) => {
            write_response(
                &mut stream,
                "200 OK",
                &render_page("Authentication successful", "You are signed in to Rember."),
            );
            deliver(shared, Ok(callback));
        }
        None => {
            write_response(
                &mut stream,
                "400 Bad Request",
                &render_page(
                    "Authentication failed",
                    "The callback request did not carry the expected parameters.",
                ),
            );
            deliver(
                shared,
                Err(RembError::listener(
                    "callback request is missing the 'code' or 'state' parameter",
                )),
            );
        }
    }
}

/// Records the first outcome and wakes the waiting `listen` call. Anything
/// arriving after that, or outside the listening phase, is dropped; the
/// browser already got its response.
fn deliver(shared: &Shared, outcome: RembResult<Callback>) {
    let mut state = lock(&shared.state);
    if state.phase != Phase::Listening || state.outcome.is_some() {
        debug!("ignoring extra loopback callback");
        return;
    }
    state.outcome = Some(outcome);
    shared.done.notify_all();
}

/// Reads the request line and drains headers. A connection that cannot
/// produce a request line is dropped without affecting the listen outcome.
fn read_request_target(stream: &TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let target = line.split_whitespace().nth(1)?.to_string();

    for _ in 0..MAX_HEADER_LINES {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => {}
        }
    }

    Some(target)
}

/// Extracts and percent-decodes `code` and `state` from the request target.
/// Both must be present and non-empty; the path is not checked, mirroring a
/// redirect endpoint that owns the whole ephemeral port.
fn callback_from_target(target: &str) -> Option<Callback> {
    let url = reqwest::Url::parse(&format!("http://localhost{target}")).ok()?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if code.is_none() => code = Some(value.into_owned()),
            "state" if state.is_none() => state = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) if !code.is_empty() && !state.is_empty() => {
            Some(Callback { code, state })
        }
        _ => None,
    }
}

fn write_response(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn render_page(title: &str, message: &str) -> String {
    format!(
        "<html>\n  <head>\n    <meta charset='utf-8'>\n    <title>{title}</title>\n    <style>\n      body {{ font-family: sans-serif; margin: 20px; }}\n    </style>\n  </head>\n  <body>\n    <h1>{title}</h1>\n    <p>{message}</p>\n    <p>You can close this tab and return to the terminal.</p>\n  </body>\n</html>\n"
    )
}
