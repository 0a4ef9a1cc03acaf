use clap::Parser;
use mudtap::config::{self, Cli, Command, ConnectArgs};
use mudtap::error::TapResult;
use mudtap::session::GameSession;
use mudtap::stream::{Consumer, StreamBuffer, StreamMask};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::watch;

const CONSOLE_SCRIPT: &str = "console";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Connect(args) => run_connect(args).await?,
    }
    Ok(())
}

async fn run_connect(args: ConnectArgs) -> TapResult<()> {
    let config = config::Config::load(&args)?;
    init_logging(&config.logging);

    let session = GameSession::connect(&config).await?;
    let streams = Arc::clone(session.streams());
    let printer = streams.subscribe_to(args.printer_mask(&config))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let print_task = tokio::spawn(print_records(
        Arc::clone(&streams),
        printer.clone(),
        shutdown_rx,
    ));

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(line) => handle_input(&session, &printer, &line).await,
                None => break,
            },
            _ = wait_for_eof(&session) => break,
        }
    }

    session.close().await?;
    let _ = shutdown_tx.send(true);
    let _ = print_task.await;
    Ok(())
}

async fn handle_input(session: &GameSession, printer: &Consumer, line: &str) {
    if let Some(text) = line.strip_prefix("#echo ") {
        session.echo(CONSOLE_SCRIPT, text);
        return;
    }
    if let Some(value) = line.strip_prefix("#mask ") {
        match value.parse::<StreamMask>() {
            Ok(mask) => {
                if let Err(err) = session.streams().set_mask(printer, mask) {
                    eprintln!("{err}");
                }
            }
            Err(err) => eprintln!("{err}"),
        }
        return;
    }
    if line.trim() == "#stats" {
        eprintln!("{:?}", session.streams().stats());
        eprintln!("{:?}", session.metrics());
        return;
    }
    if let Err(err) = session.send(line).await {
        tracing::error!(session_id = %session.id(), error = %err, "Failed to send command");
    }
}

async fn print_records(
    streams: Arc<StreamBuffer>,
    printer: Consumer,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stdout = tokio::io::stdout();
    loop {
        let record = tokio::select! {
            record = streams.read(&printer) => record,
            _ = shutdown.changed() => break,
        };
        if write_line(&mut stdout, record.text()).await.is_err() {
            return;
        }
    }
    for record in streams.drain(&printer) {
        if write_line(&mut stdout, record.text()).await.is_err() {
            return;
        }
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, text: &str) -> std::io::Result<()> {
    stdout.write_all(text.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn wait_for_eof(session: &GameSession) {
    while !session.is_eof() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn init_logging(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(logging.level.clone());
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
