use crate::error::{ApiError, ErrorCode, TapResult};
use crate::session::{OutputHandle, SessionBackend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

const IAC: u8 = 0xff;
const DONT: u8 = 0xfe;
const DO: u8 = 0xfd;
const WONT: u8 = 0xfc;
const WILL: u8 = 0xfb;
const SB: u8 = 0xfa;
const GA: u8 = 0xf9;
const SE: u8 = 0xf0;
const EOR: u8 = 0xef;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;
const OPT_TTYPE: u8 = 24;
const OPT_EOR: u8 = 25;
const OPT_NAWS: u8 = 31;

const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// What the client reports about itself during negotiation.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            term: "mudtap".to_string(),
            cols: 120,
            rows: 40,
        }
    }
}

enum WriteItem {
    Data(Vec<u8>),
    Raw(Vec<u8>),
    Close,
}

pub struct TelnetBackend {
    sender: mpsc::Sender<WriteItem>,
    eof: Arc<AtomicBool>,
}

impl TelnetBackend {
    pub async fn connect(
        host: &str,
        port: u16,
        terminal: TerminalOptions,
        connect_timeout_ms: u64,
        output: OutputHandle,
    ) -> TapResult<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = timeout(
            Duration::from_millis(connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| {
            ApiError::new(ErrorCode::ConnectTimeout, "Game server connect timeout")
                .with_details(addr.clone())
        })?
        .map_err(|err| {
            ApiError::new(ErrorCode::ConnectFailed, "Game server connect failed")
                .with_details(format!("{addr}: {err}"))
        })?;
        tracing::info!(session_id = %output.session_id(), %addr, "Connected to game server");

        let (reader, writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<WriteItem>(128);
        let eof = Arc::new(AtomicBool::new(false));
        let eof_flag = eof.clone();

        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(item) = rx.recv().await {
                let payload = match item {
                    WriteItem::Close => {
                        let _ = writer.shutdown().await;
                        break;
                    }
                    WriteItem::Data(data) => escape_iac(&data),
                    WriteItem::Raw(data) => data,
                };
                if let Err(err) = writer.write_all(&payload).await {
                    tracing::warn!(error = %err, "Game server write failed");
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        let mut negotiator = Negotiator::new(terminal);
        let mut parser = TelnetParser::default();
        let tx_clone = tx.clone();

        tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for item in parser.process(&buf[..n]) {
                            match item {
                                TelnetItem::Data(data) => output.append_output(&data),
                                TelnetItem::Event(TelnetEvent::EndOfPrompt) => {
                                    output.flush_prompt();
                                }
                                TelnetItem::Event(event) => {
                                    for response in negotiator.handle_event(event) {
                                        let _ = tx_clone.send(WriteItem::Raw(response)).await;
                                    }
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Game server read failed");
                        break;
                    }
                }
            }
            eof_flag.store(true, Ordering::SeqCst);
            output.finish();
            tracing::info!(session_id = %output.session_id(), "Game server closed the connection");
        });

        Ok(Self { sender: tx, eof })
    }
}

#[async_trait]
impl SessionBackend for TelnetBackend {
    async fn write(&self, data: &[u8]) -> TapResult<usize> {
        self.sender
            .send(WriteItem::Data(data.to_vec()))
            .await
            .map_err(|_| ApiError::new(ErrorCode::RemoteClosed, "Game server connection closed"))?;
        Ok(data.len())
    }

    async fn close(&self) -> TapResult<()> {
        self.sender
            .send(WriteItem::Close)
            .await
            .map_err(|_| ApiError::new(ErrorCode::IoError, "Telnet close failed"))?;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }
}

/// Parser output in stream order, so prompt markers stay between the data
/// that precedes and follows them.
#[derive(Debug, PartialEq, Eq)]
enum TelnetItem {
    Data(Vec<u8>),
    Event(TelnetEvent),
}

#[derive(Debug, PartialEq, Eq)]
enum TelnetEvent {
    Negotiation { command: u8, option: u8 },
    Subnegotiation { option: u8, data: Vec<u8> },
    EndOfPrompt,
}

#[derive(Default)]
struct TelnetParser {
    state: ParserState,
    sb_option: Option<u8>,
    sb_data: Vec<u8>,
}

#[derive(Debug, Default)]
enum ParserState {
    #[default]
    Data,
    Iac,
    Command(u8),
    Subnegotiation,
    SubIac,
}

impl TelnetParser {
    fn process(&mut self, input: &[u8]) -> Vec<TelnetItem> {
        let mut items = Vec::new();
        let mut data = Vec::new();

        for &byte in input {
            match self.state {
                ParserState::Data => {
                    if byte == IAC {
                        self.state = ParserState::Iac;
                    } else {
                        data.push(byte);
                    }
                }
                ParserState::Iac => {
                    self.state = ParserState::Data;
                    match byte {
                        IAC => data.push(IAC),
                        DO | DONT | WILL | WONT => self.state = ParserState::Command(byte),
                        SB => {
                            self.state = ParserState::Subnegotiation;
                            self.sb_option = None;
                            self.sb_data.clear();
                        }
                        GA | EOR => {
                            if !data.is_empty() {
                                items.push(TelnetItem::Data(std::mem::take(&mut data)));
                            }
                            items.push(TelnetItem::Event(TelnetEvent::EndOfPrompt));
                        }
                        _ => {}
                    }
                }
                ParserState::Command(command) => {
                    items.push(TelnetItem::Event(TelnetEvent::Negotiation {
                        command,
                        option: byte,
                    }));
                    self.state = ParserState::Data;
                }
                ParserState::Subnegotiation => {
                    if byte == IAC {
                        self.state = ParserState::SubIac;
                    } else if self.sb_option.is_none() {
                        self.sb_option = Some(byte);
                    } else {
                        self.sb_data.push(byte);
                    }
                }
                ParserState::SubIac => {
                    if byte == SE {
                        if let Some(option) = self.sb_option.take() {
                            items.push(TelnetItem::Event(TelnetEvent::Subnegotiation {
                                option,
                                data: std::mem::take(&mut self.sb_data),
                            }));
                        }
                        self.sb_data.clear();
                        self.state = ParserState::Data;
                    } else if byte == IAC {
                        self.sb_data.push(IAC);
                        self.state = ParserState::Subnegotiation;
                    } else {
                        self.state = ParserState::Subnegotiation;
                    }
                }
            }
        }

        if !data.is_empty() {
            items.push(TelnetItem::Data(data));
        }
        items
    }
}

struct Negotiator {
    local_enabled: HashMap<u8, bool>,
    remote_enabled: HashMap<u8, bool>,
    terminal: TerminalOptions,
}

impl Negotiator {
    fn new(terminal: TerminalOptions) -> Self {
        Self {
            local_enabled: HashMap::new(),
            remote_enabled: HashMap::new(),
            terminal,
        }
    }

    fn handle_event(&mut self, event: TelnetEvent) -> Vec<Vec<u8>> {
        match event {
            TelnetEvent::Negotiation { command, option } => self.handle_negotiation(command, option),
            TelnetEvent::Subnegotiation { option, data } => {
                if option == OPT_TTYPE && data.first().copied() == Some(TTYPE_SEND) {
                    vec![self.build_ttype()]
                } else {
                    Vec::new()
                }
            }
            TelnetEvent::EndOfPrompt => Vec::new(),
        }
    }

    fn handle_negotiation(&mut self, command: u8, option: u8) -> Vec<Vec<u8>> {
        let mut responses = Vec::new();
        match command {
            DO => {
                if allow_local(option) {
                    if !self.is_enabled(Side::Local, option) {
                        self.set(Side::Local, option, true);
                        responses.push(iac_command(WILL, option));
                        if option == OPT_NAWS {
                            responses.push(self.build_naws());
                        }
                    }
                } else {
                    self.set(Side::Local, option, false);
                    responses.push(iac_command(WONT, option));
                }
            }
            DONT => {
                if self.is_enabled(Side::Local, option) {
                    self.set(Side::Local, option, false);
                    responses.push(iac_command(WONT, option));
                }
            }
            WILL => {
                if allow_remote(option) {
                    if !self.is_enabled(Side::Remote, option) {
                        self.set(Side::Remote, option, true);
                        responses.push(iac_command(DO, option));
                    }
                } else {
                    self.set(Side::Remote, option, false);
                    responses.push(iac_command(DONT, option));
                }
            }
            WONT => {
                if self.is_enabled(Side::Remote, option) {
                    self.set(Side::Remote, option, false);
                    responses.push(iac_command(DONT, option));
                }
            }
            _ => {}
        }
        responses
    }

    fn is_enabled(&self, side: Side, option: u8) -> bool {
        let table = match side {
            Side::Local => &self.local_enabled,
            Side::Remote => &self.remote_enabled,
        };
        table.get(&option).copied().unwrap_or(false)
    }

    fn set(&mut self, side: Side, option: u8, enabled: bool) {
        let table = match side {
            Side::Local => &mut self.local_enabled,
            Side::Remote => &mut self.remote_enabled,
        };
        table.insert(option, enabled);
    }

    fn build_naws(&self) -> Vec<u8> {
        let mut payload = vec![IAC, SB, OPT_NAWS];
        payload.extend_from_slice(&escape_iac(&self.terminal.cols.to_be_bytes()));
        payload.extend_from_slice(&escape_iac(&self.terminal.rows.to_be_bytes()));
        payload.extend_from_slice(&[IAC, SE]);
        payload
    }

    fn build_ttype(&self) -> Vec<u8> {
        let mut payload = vec![IAC, SB, OPT_TTYPE, TTYPE_IS];
        payload.extend_from_slice(&escape_iac(self.terminal.term.as_bytes()));
        payload.extend_from_slice(&[IAC, SE]);
        payload
    }
}

#[derive(Clone, Copy)]
enum Side {
    Local,
    Remote,
}

fn allow_local(option: u8) -> bool {
    matches!(option, OPT_SGA | OPT_TTYPE | OPT_NAWS)
}

fn allow_remote(option: u8) -> bool {
    matches!(option, OPT_ECHO | OPT_SGA | OPT_EOR)
}

fn iac_command(cmd: u8, option: u8) -> Vec<u8> {
    vec![IAC, cmd, option]
}

fn escape_iac(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_unescapes_iac_iac() {
        let mut parser = TelnetParser::default();
        let items = parser.process(&[IAC, IAC, b'A']);
        assert_eq!(items, vec![TelnetItem::Data(vec![IAC, b'A'])]);
    }

    #[test]
    fn parser_keeps_prompt_marker_in_order() {
        let mut parser = TelnetParser::default();
        let items = parser.process(b"HP:50> \xff\xf9look\n");
        assert_eq!(
            items,
            vec![
                TelnetItem::Data(b"HP:50> ".to_vec()),
                TelnetItem::Event(TelnetEvent::EndOfPrompt),
                TelnetItem::Data(b"look\n".to_vec()),
            ]
        );
    }

    #[test]
    fn parser_handles_split_subnegotiation() {
        let mut parser = TelnetParser::default();
        assert!(parser.process(&[IAC, SB, OPT_TTYPE, TTYPE_SEND]).is_empty());
        let items = parser.process(&[IAC, SE]);
        assert_eq!(
            items,
            vec![TelnetItem::Event(TelnetEvent::Subnegotiation {
                option: OPT_TTYPE,
                data: vec![TTYPE_SEND],
            })]
        );
    }

    #[test]
    fn negotiator_reports_terminal_type() {
        let mut negotiator = Negotiator::new(TerminalOptions::default());
        let responses = negotiator.handle_event(TelnetEvent::Subnegotiation {
            option: OPT_TTYPE,
            data: vec![TTYPE_SEND],
        });
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with(&[IAC, SB, OPT_TTYPE, TTYPE_IS]));
        assert!(responses[0].windows(6).any(|w| w == b"mudtap"));
    }

    #[test]
    fn negotiator_sends_window_size_once() {
        let mut negotiator = Negotiator::new(TerminalOptions {
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
        });
        let responses = negotiator.handle_event(TelnetEvent::Negotiation {
            command: DO,
            option: OPT_NAWS,
        });
        assert_eq!(
            responses,
            vec![
                vec![IAC, WILL, OPT_NAWS],
                vec![IAC, SB, OPT_NAWS, 0, 80, 0, 24, IAC, SE],
            ]
        );
        let again = negotiator.handle_event(TelnetEvent::Negotiation {
            command: DO,
            option: OPT_NAWS,
        });
        assert!(again.is_empty());
    }

    #[test]
    fn negotiator_refuses_unknown_options() {
        let mut negotiator = Negotiator::new(TerminalOptions::default());
        let responses = negotiator.handle_event(TelnetEvent::Negotiation {
            command: WILL,
            option: 201,
        });
        assert_eq!(responses, vec![vec![IAC, DONT, 201]]);
        let responses = negotiator.handle_event(TelnetEvent::Negotiation {
            command: WILL,
            option: OPT_ECHO,
        });
        assert_eq!(responses, vec![vec![IAC, DO, OPT_ECHO]]);
    }

    #[test]
    fn escape_doubles_iac() {
        assert_eq!(escape_iac(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
    }
}
