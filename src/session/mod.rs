mod lines;
mod telnet;

use crate::config::{Config, LineEnding};
use crate::error::{ApiError, ErrorCode, TapResult};
use crate::stream::{Line, LineBuffer, StreamBuffer, StreamMask, StreamRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use telnet::TelnetBackend;
use tokio::time::sleep;
use uuid::Uuid;

pub use lines::{AnsiStripper, LineSplitter};
pub use telnet::TerminalOptions;

const SERVER_SOURCE: &str = "server";
const CLIENT_SOURCE: &str = "client";

/// Transport to the game server.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn write(&self, data: &[u8]) -> TapResult<usize>;
    async fn close(&self) -> TapResult<()>;
    fn is_eof(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMetrics {
    pub created_at: u64,
    pub last_activity_at: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub lines_in: u64,
}

/// Producer side of a session: turns server bytes into classified lines.
#[derive(Clone)]
pub struct OutputHandle {
    session_id: String,
    streams: Arc<StreamBuffer>,
    splitter: Arc<Mutex<LineSplitter>>,
    stripper: AnsiStripper,
    bytes_in: Arc<AtomicU64>,
    lines_in: Arc<AtomicU64>,
    last_activity: Arc<AtomicU64>,
}

impl OutputHandle {
    pub fn new(session_id: impl Into<String>, streams: Arc<StreamBuffer>) -> TapResult<Self> {
        Ok(Self {
            session_id: session_id.into(),
            streams,
            splitter: Arc::new(Mutex::new(LineSplitter::new())),
            stripper: AnsiStripper::new()?,
            bytes_in: Arc::new(AtomicU64::new(0)),
            lines_in: Arc::new(AtomicU64::new(0)),
            last_activity: Arc::new(AtomicU64::new(now_ms())),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn append_output(&self, bytes: &[u8]) {
        let lines = self.lock_splitter().push(bytes);
        self.bytes_in
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);
        self.last_activity.store(now_ms(), Ordering::SeqCst);
        for line in lines {
            self.publish(line);
        }
    }

    /// Publishes a pending partial line; servers end prompts with GA/EOR.
    pub fn flush_prompt(&self) {
        let pending = self.lock_splitter().flush();
        if let Some(line) = pending {
            self.publish(line);
        }
    }

    /// Called once the server side is gone.
    pub fn finish(&self) {
        self.flush_prompt();
    }

    fn publish(&self, raw: String) {
        let stripped = self.stripper.strip(&raw);
        self.streams.append(StreamRecord::new(
            Line::new(raw).with_source(SERVER_SOURCE),
            StreamMask::DOWNSTREAM_RAW,
        ));
        self.streams.append(StreamRecord::new(
            Line::new(stripped).with_source(SERVER_SOURCE),
            StreamMask::DOWNSTREAM_STRIPPED,
        ));
        self.lines_in.fetch_add(1, Ordering::SeqCst);
    }

    fn lock_splitter(&self) -> std::sync::MutexGuard<'_, LineSplitter> {
        self.splitter.lock().expect("line splitter mutex poisoned")
    }
}

struct SessionInit {
    config: Config,
    output: OutputHandle,
    commands: Arc<LineBuffer>,
    backend: Box<dyn SessionBackend>,
}

/// One connection to a game server and the buffers fed from it.
///
/// Server output lands in [`GameSession::streams`] as raw and stripped
/// records; commands sent through the session are recorded both as
/// `UPSTREAM` stream records and in the plain [`GameSession::commands`] log.
pub struct GameSession {
    id: String,
    host: String,
    port: u16,
    line_ending: LineEnding,
    reap_interval: Duration,
    output: OutputHandle,
    commands: Arc<LineBuffer>,
    backend: Box<dyn SessionBackend>,
    state: Mutex<SessionState>,
    created_at: u64,
    bytes_out: AtomicU64,
    maintenance_running: AtomicBool,
}

impl GameSession {
    /// Connects to the configured game server over telnet.
    pub async fn connect(config: &Config) -> TapResult<Arc<Self>> {
        let id = Uuid::new_v4().to_string();
        let output = Self::output_handle(&id, config)?;
        let terminal = TerminalOptions {
            term: config.game.term.clone(),
            cols: config.game.cols,
            rows: config.game.rows,
        };
        let backend = TelnetBackend::connect(
            &config.game.host,
            config.game.port,
            terminal,
            config.game.connect_timeout_ms,
            output.clone(),
        )
        .await?;

        let session = Self::with_backend(config, output, Box::new(backend));
        session.start_maintenance();
        Ok(session)
    }

    /// Builds a session over an already-established transport.
    ///
    /// `output` must be the handle the backend feeds server bytes into.
    pub fn with_backend(
        config: &Config,
        output: OutputHandle,
        backend: Box<dyn SessionBackend>,
    ) -> Arc<Self> {
        let commands = Arc::new(LineBuffer::with_poll_interval(
            config.buffer.line_max_size,
            config.buffer.poll_interval(),
        ));
        Arc::new(Self::new(SessionInit {
            config: config.clone(),
            output,
            commands,
            backend,
        }))
    }

    /// Creates the output handle (and its stream buffer) for a new session.
    pub fn output_handle(session_id: &str, config: &Config) -> TapResult<OutputHandle> {
        let streams = Arc::new(StreamBuffer::with_options(config.buffer.stream_options())?);
        OutputHandle::new(session_id, streams)
    }

    fn new(init: SessionInit) -> Self {
        Self {
            id: init.output.session_id().to_string(),
            host: init.config.game.host.clone(),
            port: init.config.game.port,
            line_ending: init.config.game.line_ending,
            reap_interval: init.config.buffer.reap_interval(),
            output: init.output,
            commands: init.commands,
            backend: init.backend,
            state: Mutex::new(SessionState::Open),
            created_at: now_ms(),
            bytes_out: AtomicU64::new(0),
            maintenance_running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn streams(&self) -> &Arc<StreamBuffer> {
        &self.output.streams
    }

    pub fn commands(&self) -> &Arc<LineBuffer> {
        &self.commands
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("session state mutex poisoned") = state;
    }

    pub fn is_eof(&self) -> bool {
        self.backend.is_eof()
    }

    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            created_at: self.created_at,
            last_activity_at: self.output.last_activity.load(Ordering::SeqCst),
            bytes_in: self.output.bytes_in.load(Ordering::SeqCst),
            bytes_out: self.bytes_out.load(Ordering::SeqCst),
            lines_in: self.output.lines_in.load(Ordering::SeqCst),
        }
    }

    /// Sends one command line to the server and records it upstream.
    pub async fn send(&self, command: &str) -> TapResult<usize> {
        if self.state() != SessionState::Open || self.is_eof() {
            return Err(ApiError::new(ErrorCode::RemoteClosed, "Session is closed")
                .with_details(self.id.clone())
                .into());
        }
        let command = command.trim_end_matches(['\r', '\n']);
        let mut payload = command.as_bytes().to_vec();
        payload.extend_from_slice(self.line_ending.as_bytes());

        let written = self.backend.write(&payload).await?;
        self.bytes_out.fetch_add(written as u64, Ordering::SeqCst);
        self.output.last_activity.store(now_ms(), Ordering::SeqCst);

        self.streams().push(
            Line::new(command).with_source(CLIENT_SOURCE),
            StreamMask::UPSTREAM,
        );
        self.commands
            .append(Line::new(command).with_source(CLIENT_SOURCE));
        tracing::debug!(session_id = %self.id, bytes = written, "Command sent");
        Ok(written)
    }

    /// Records text produced by a script, visible to `SCRIPT_OUTPUT` readers.
    pub fn echo(&self, script: &str, text: &str) {
        self.streams().push(
            Line::new(text).with_source(format!("script:{script}")),
            StreamMask::SCRIPT_OUTPUT,
        );
    }

    pub async fn close(&self) -> TapResult<()> {
        if self.state() == SessionState::Closed {
            return Ok(());
        }
        self.set_state(SessionState::Closing);
        let result = self.backend.close().await;
        self.set_state(SessionState::Closed);
        self.output.finish();
        tracing::info!(session_id = %self.id, "Session closed");
        result
    }

    /// Drops cursors of consumers that no longer exist, in both buffers.
    pub fn reap_consumers(&self) -> usize {
        self.streams().reap() + self.commands.reap()
    }

    /// Spawns the periodic reaper. Requires a tokio runtime; idempotent.
    pub fn start_maintenance(self: &Arc<Self>) {
        if self.maintenance_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let session: Weak<Self> = Arc::downgrade(self);
        let interval = self.reap_interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                if session.state() == SessionState::Closed {
                    break;
                }
                let reaped = session.reap_consumers();
                if reaped > 0 {
                    let stats = session.streams().stats();
                    tracing::debug!(
                        session_id = %session.id,
                        reaped,
                        consumers = stats.consumers,
                        buffered = stats.buffered,
                        "Stream maintenance"
                    );
                }
            }
        });
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}
