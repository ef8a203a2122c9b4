// File:    main.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Command-line peer for one-time-pad messaging: pad provisioning, offline encrypt/decrypt and relay send/listen.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! A command-line interface for exchanging one-time-pad messages through a relay.

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use otp_core::messaging::{self, ChunkOpener, ChunkSealer};
use otp_core::pad_generator;
use otp_core::pad_store::{DEFAULT_PAGE_LENGTH, PadPaths, PadStore};
use otp_core::{CipherPayload, MessagingError, PadError};
use otp_relay::{Inbound, RelayClient};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default relay address, the relay's standard port on this machine.
const DEFAULT_RELAY: &str = "127.0.0.1:65432";

/// 1024 frames of 16-bit mono audio.
const DEFAULT_CHUNK_SIZE: usize = 2048;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(
    after_help = "EXAMPLES:\n  \n# Provision a vault with 1000 pages and share it with your peer out of band\notp-cli --vault ./my_vault pad generate --pages 1000\n\n# Check both copies are identical\notp-cli --vault ./my_vault pad fingerprint\n\n# Send a message to bob through a relay\notp-cli --vault ./my_vault send --relay 10.0.0.5:65432 --id alice --to bob \"meet at noon\"\n\n# Wait for messages as bob\notp-cli --vault ./bob_vault listen --relay 10.0.0.5:65432 --id bob"
)]
struct Cli {
    /// Directory holding the pad, the consumed-pages record and the lock file.
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Pad file, overriding `<vault>/otp_cipher.txt`.
    #[arg(long, global = true, value_name = "FILE")]
    pads: Option<PathBuf>,

    /// Consumed-pages record, overriding `<vault>/used_pages.txt`.
    #[arg(long, global = true, value_name = "FILE")]
    consumed: Option<PathBuf>,

    /// Lock file, overriding `<vault>/used_pages.lock`.
    #[arg(long, global = true, value_name = "FILE")]
    lock: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the pad in the vault
    Pad {
        #[command(subcommand)]
        command: PadCommands,
    },
    /// Encrypt a message with the next unused page and print the payload
    Encrypt {
        /// The plaintext message
        message: String,
    },
    /// Decrypt a `PAGEID:HEX` or `PAGEID:OFFSET:HEX` payload and mark its page used
    Decrypt {
        /// The payload to decrypt
        payload: String,
    },
    /// Encrypt messages and send them to a peer through a relay
    Send {
        #[command(flatten)]
        relay: RelayArgs,

        /// The recipient's identifier
        #[arg(long)]
        to: String,

        /// One or more plaintext messages, each sealed with its own page
        #[arg(required = true)]
        messages: Vec<String>,
    },
    /// Receive and decrypt messages from a relay
    Listen {
        #[command(flatten)]
        relay: RelayArgs,

        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,

        /// Treat every payload as an audio chunk and append the decrypted bytes to this file
        #[arg(long, value_name = "FILE")]
        audio_out: Option<PathBuf>,
    },
    /// Stream a raw audio file to a peer as encrypted fixed-size chunks
    Stream {
        #[command(flatten)]
        relay: RelayArgs,

        /// The recipient's identifier
        #[arg(long)]
        to: String,

        /// Raw sample file to send
        #[arg(long)]
        input: PathBuf,

        /// Bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

#[derive(Subcommand)]
#[command(
    after_help = "EXAMPLES:\n  \n# Generate 500 pages of 5000 characters\notp-cli --vault ./my_vault pad generate --pages 500\n\n# Show how many pages are left, as JSON\notp-cli --vault ./my_vault pad status --json"
)]
enum PadCommands {
    /// Generate a new pad file
    Generate {
        /// The number of pages
        #[arg(short, long, default_value_t = 100)]
        pages: usize,
        /// Characters per page, identifier included
        #[arg(short = 'l', long, default_value_t = DEFAULT_PAGE_LENGTH)]
        page_length: usize,
        /// Replace an existing pad and forget its consumed pages
        #[arg(long)]
        force: bool,
    },
    /// Show how many pages are consumed and remaining
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Claim the next unused page and print its identifier
    Claim,
    /// Print the SHA-256 of the pad file
    Fingerprint,
}

#[derive(clap::Args)]
struct RelayArgs {
    /// Relay address as host:port
    #[arg(long, default_value = DEFAULT_RELAY)]
    relay: String,

    /// The identifier to register as
    #[arg(long)]
    id: String,
}

fn pad_paths(cli: &Cli) -> PadPaths {
    let mut paths = PadPaths::in_dir(&cli.vault);
    if let Some(pads) = &cli.pads {
        paths.pad_file.clone_from(pads);
    }
    if let Some(consumed) = &cli.consumed {
        paths.consumed_file.clone_from(consumed);
    }
    if let Some(lock) = &cli.lock {
        paths.lock_file.clone_from(lock);
    }
    paths
}

fn open_store(paths: PadPaths) -> PadStore {
    PadStore::open(paths).unwrap_or_else(|e| {
        error!("Failed to open pad: {e}");
        std::process::exit(1);
    })
}

fn exit_on_messaging_error(e: &MessagingError) -> ! {
    if matches!(e, MessagingError::Pad(PadError::Exhausted)) {
        error!("{e}. Provision a new pad with your peer before sending again.");
    } else {
        error!("{e}");
    }
    std::process::exit(1);
}

async fn connect(relay: &RelayArgs) -> RelayClient {
    match RelayClient::connect(relay.relay.as_str(), &relay.id).await {
        Ok(client) => {
            info!("Connected to relay {} as '{}'", relay.relay, relay.id);
            client
        }
        Err(e) => {
            error!("Failed to connect to relay {}: {e}", relay.relay);
            std::process::exit(1);
        }
    }
}

async fn finish_sending(client: RelayClient) {
    match client.close().await {
        Ok(rest) => {
            for inbound in rest {
                if let Inbound::Notice(notice) = inbound {
                    warn!("Relay: {notice}");
                    eprintln!("{notice}");
                }
            }
        }
        Err(e) => {
            error!("Relay connection failed: {e}");
            std::process::exit(1);
        }
    }
}

fn generate(paths: &PadPaths, pages: usize, page_length: usize, force: bool) {
    if paths.pad_file.exists() && !force {
        error!(
            "Pad file '{}' already exists. Use --force to replace it.",
            paths.pad_file.display()
        );
        std::process::exit(1);
    }
    if let Some(dir) = paths.pad_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir) {
            error!("Failed to create vault directory: {e}");
            std::process::exit(1);
        }
    }
    info!("Generating {pages} page(s) of {page_length} characters...");
    if let Err(e) = pad_generator::generate_pad_file(&paths.pad_file, pages, page_length) {
        error!("Failed to generate pad file: {e}");
        std::process::exit(1);
    }
    if force {
        match fs::remove_file(&paths.consumed_file) {
            Ok(()) => warn!("Forgot the consumed pages of the replaced pad."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!("Failed to reset consumed pages record: {e}");
                std::process::exit(1);
            }
        }
    }
    println!(
        "Generated {pages} page(s) in '{}'",
        paths.pad_file.display()
    );
}

fn append_audio(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(bytes)
}

async fn listen(store: &PadStore, relay: &RelayArgs, count: Option<usize>, audio_out: Option<&Path>) {
    let mut client = connect(relay).await;
    let mut opener = ChunkOpener::new(store);
    let mut received = 0usize;

    while count.is_none_or(|n| received < n) {
        let inbound = match client.recv().await {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                info!("Relay closed the connection.");
                break;
            }
            Err(e) => {
                error!("Relay connection failed: {e}");
                std::process::exit(1);
            }
        };
        let (sender, payload) = match inbound {
            Inbound::Message { sender, payload } => (sender, payload),
            Inbound::Notice(notice) => {
                warn!("Relay: {notice}");
                continue;
            }
        };
        received += 1;

        let payload: CipherPayload = match payload.parse() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ignoring undecodable payload from '{sender}': {e}");
                continue;
            }
        };
        if let Some(path) = audio_out {
            match opener.open_chunk(&payload) {
                Ok(audio) => {
                    if let Err(e) = append_audio(path, &audio) {
                        error!("Failed to write audio to '{}': {e}", path.display());
                        std::process::exit(1);
                    }
                }
                Err(e) => warn!("Failed to decrypt chunk from '{sender}': {e}"),
            }
        } else {
            match messaging::open_message(store, &payload) {
                Ok(plaintext) => println!("{sender}: {}", String::from_utf8_lossy(&plaintext)),
                Err(e) => warn!("Failed to decrypt message from '{sender}': {e}"),
            }
        }
    }
}

async fn stream(store: &PadStore, relay: &RelayArgs, to: &str, input: &Path, chunk_size: usize) {
    if chunk_size == 0 {
        error!("--chunk-size must be at least 1");
        std::process::exit(1);
    }
    let audio = fs::read(input).unwrap_or_else(|e| {
        error!("Failed to read '{}': {e}", input.display());
        std::process::exit(1);
    });

    let mut client = connect(relay).await;
    let mut sealer = ChunkSealer::new(store);
    let mut sent = 0usize;
    for chunk in audio.chunks(chunk_size) {
        let payload = sealer
            .seal_chunk(chunk)
            .unwrap_or_else(|e| exit_on_messaging_error(&e));
        if let Err(e) = client.send(to, &payload.to_string()).await {
            error!("Failed to send chunk {sent}: {e}");
            std::process::exit(1);
        }
        sent += 1;
    }
    finish_sending(client).await;
    println!("Streamed {sent} chunk(s) to '{to}'");
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let paths = pad_paths(&cli);

    match &cli.command {
        Commands::Pad { command } => match command {
            PadCommands::Generate {
                pages,
                page_length,
                force,
            } => generate(&paths, *pages, *page_length, *force),
            PadCommands::Status { json } => {
                let store = open_store(paths);
                let status = store.status().unwrap_or_else(|e| {
                    error!("Failed to read consumed pages: {e}");
                    std::process::exit(1);
                });
                if *json {
                    match serde_json::to_string_pretty(&status) {
                        Ok(out) => println!("{out}"),
                        Err(e) => {
                            error!("Failed to serialize status: {e}");
                            std::process::exit(1);
                        }
                    }
                } else {
                    println!("Pad Status for: {}", store.paths().pad_file.display());
                    println!("{:-<40}", "");
                    println!("Total Pages: {}", status.total_pages);
                    println!("  - Consumed: {}", status.consumed_pages);
                    println!("  - Remaining: {}", status.remaining_pages);
                }
            }
            PadCommands::Claim => {
                let store = open_store(paths);
                match store.claim_next_unused_page() {
                    Ok(page) => println!("{}", page.id()),
                    Err(e) => {
                        error!("{e}");
                        std::process::exit(1);
                    }
                }
            }
            PadCommands::Fingerprint => {
                let store = open_store(paths);
                match store.fingerprint() {
                    Ok(hash) => println!("{hash}"),
                    Err(e) => {
                        error!("Failed to hash pad file: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Commands::Encrypt { message } => {
            let store = open_store(paths);
            let payload = messaging::seal_message(&store, message.as_bytes())
                .unwrap_or_else(|e| exit_on_messaging_error(&e));
            info!("Encrypted with page '{}'.", payload.page_id);
            println!("{payload}");
        }
        Commands::Decrypt { payload } => {
            let payload: CipherPayload = payload.parse().unwrap_or_else(|e| {
                error!("Invalid payload: {e}");
                std::process::exit(1);
            });
            let store = open_store(paths);
            let plaintext = messaging::open_message(&store, &payload).unwrap_or_else(|e| {
                error!("Failed to decrypt: {e}");
                std::process::exit(1);
            });
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Commands::Send {
            relay,
            to,
            messages,
        } => {
            let store = open_store(paths);
            let payloads: Vec<CipherPayload> = messages
                .iter()
                .map(|m| {
                    messaging::seal_message(&store, m.as_bytes())
                        .unwrap_or_else(|e| exit_on_messaging_error(&e))
                })
                .collect();

            let mut client = connect(relay).await;
            for payload in &payloads {
                if let Err(e) = client.send(to, &payload.to_string()).await {
                    error!("Failed to send: {e}");
                    std::process::exit(1);
                }
                info!("Sent page '{}' to '{to}'.", payload.page_id);
            }
            finish_sending(client).await;
            println!("Sent {} message(s) to '{to}'", payloads.len());
        }
        Commands::Listen {
            relay,
            count,
            audio_out,
        } => {
            let store = open_store(paths);
            listen(&store, relay, *count, audio_out.as_deref()).await;
        }
        Commands::Stream {
            relay,
            to,
            input,
            chunk_size,
        } => {
            let store = open_store(paths);
            stream(&store, relay, to, input, *chunk_size).await;
        }
    }
}
