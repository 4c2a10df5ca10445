#![forbid(unsafe_code)]

//! `devhost-ctl`: local companion CLI for `devhost-orchestrator`.
//!
//! `connect` opens a control channel the way a host would: it sends the
//! `hello` handshake, then forwards NDJSON requests from stdin and prints
//! every reply. `info` prints the session surface's capability descriptor.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "devhost-ctl",
    about = "Local CLI for devhost-orchestrator",
    version,
    long_about = None
)]
struct Cli {
    /// Orchestrator address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Act as a host on the control channel, reading requests from stdin.
    Connect {
        /// Control channel port.
        #[arg(long)]
        port: u16,
        /// Shared secret (`DEBUG_SESSION_TOKEN`).
        #[arg(long, env = "DEBUG_SESSION_TOKEN")]
        token: String,
    },

    /// Print the `/info` descriptor of a session surface.
    Info {
        /// Session surface port (`DEBUG_SESSION_PORT`).
        #[arg(long)]
        port: u16,
    },
}

fn main() {
    let args = Cli::parse();

    let outcome = match &args.command {
        Command::Connect { port, token } => connect(&args.host, *port, token),
        Command::Info { port } => info(&args.host, *port),
    };

    if let Err(err) = outcome {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

/// Handshake, then forward stdin lines and print one reply per request.
fn connect(
    host: &str,
    port: u16,
    token: &str,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect((host, port))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut hello = serde_json::to_string(&serde_json::json!({
        "type": "hello",
        "token": token,
        "protocol_version": 1,
    }))?;
    hello.push('\n');
    stream.write_all(hello.as_bytes())?;
    stream.flush()?;

    let welcome = read_reply(&mut reader)?;
    println!("{welcome}");
    if welcome.get("type").and_then(serde_json::Value::as_str) != Some("welcome") {
        return Err("handshake rejected".into());
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Malformed JSON is rejected before sending.
        let request: serde_json::Value = serde_json::from_str(trimmed)?;
        let mut request_line = serde_json::to_string(&request)?;
        request_line.push('\n');
        stream.write_all(request_line.as_bytes())?;
        stream.flush()?;

        let reply = read_reply(&mut reader)?;
        println!("{reply}");
    }
    Ok(())
}

fn read_reply(
    reader: &mut BufReader<TcpStream>,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err("orchestrator closed the connection".into());
    }
    Ok(serde_json::from_str(line.trim())?)
}

fn info(host: &str, port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let body: serde_json::Value = runtime.block_on(async {
        reqwest::get(format!("http://{host}:{port}/info"))
            .await?
            .error_for_status()?
            .json()
            .await
    })?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
