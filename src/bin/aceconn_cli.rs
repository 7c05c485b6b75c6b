use std::{
    error::Error,
    io,
    process,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use log::debug;

use aceconn::{
    Command, Connection, ConnectionConfig, Status, config::DEFAULT_TIMEOUT, prompt,
    protocol::AbortHandle,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host name or address
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Server port
    #[arg(long)]
    port: u16,
    /// User id presented during the handshake
    #[arg(long, default_value = "anonymous")]
    user: String,
    /// Password for the user
    #[arg(long, default_value = "")]
    password: String,
    /// Per-call timeout in seconds, 0 waits forever
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let config = ConnectionConfig::new(cli.host, cli.port, cli.user, cli.password)
        .with_timeout(Duration::from_secs(cli.timeout));

    let mut conn = Connection::create(config)?;
    if conn.connect().is_err() {
        eprintln!("{}", conn.last_error().1);
        process::exit(1);
    }

    // Set while a request is in flight, so Ctrl-C aborts it instead of exiting.
    let in_flight: Arc<Mutex<Option<AbortHandle>>> = Arc::default();
    let handler_slot = Arc::clone(&in_flight);
    ctrlc::set_handler(move || match handler_slot.lock() {
        Ok(mut slot) => match slot.take() {
            Some(handle) => {
                if let Err(e) = handle.abort() {
                    eprintln!("failed to abort request: {e}");
                }
            }
            None => process::exit(130),
        },
        Err(_) => process::exit(130),
    })?;

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let reader = stdio.lock();
        let writer = StdOut {
            inner: stdout.lock(),
        };

        let cmd = match prompt(reader, writer) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let result = match cmd {
            Command::Exit => break,
            Command::Request(text) => {
                set_in_flight(&in_flight, conn.abort_handle());
                let result = conn.request(&text);
                set_in_flight(&in_flight, None);
                result
            }
            Command::Data(text) => {
                set_in_flight(&in_flight, conn.abort_handle());
                let result = conn.request_data(&text);
                set_in_flight(&in_flight, None);
                result
            }
        };

        match result {
            Ok(reply) => {
                println!("{}", reply.text());
                if matches!(reply.status, Status::Quit | Status::ServerKilled) {
                    debug!("session ended: {}", reply.status);
                    return Ok(());
                }
            }
            Err(e) => {
                eprintln!("{}", conn.last_error().1);
                if matches!(e.status(), Status::InvalidConnection | Status::NotOpen) {
                    break;
                }
            }
        }
    }

    if let Err(e) = conn.disconnect() {
        eprintln!("failed to close connection cleanly. error: {e}");
    }
    Ok(())
}

fn set_in_flight(slot: &Mutex<Option<AbortHandle>>, handle: Option<AbortHandle>) {
    if let Ok(mut slot) = slot.lock() {
        *slot = handle;
    }
}

/// StdOut wrapper that automatically flushes content after every write.
struct StdOut<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for StdOut<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let res = self.inner.write(buf);
        if res.is_ok() {
            self.inner.flush()?
        }
        res
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
