use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Parser, Subcommand};
use nfc_core::{NfcWorker, PcscTransport, ProtocolRecord, WorkerConfig, WorkerState};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Contactless card toolbox (PC/SC backend)", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect and classify whatever enters the field
    Detect,
    /// Read a tag with the protocol matching its type
    Read,
    /// Recover Mifare Classic keys with a dictionary
    Crack,
    /// Read the payment applet of an EMV card
    Emv,
    /// Enumerate the applications and files of a DESFire card
    Desfire,
}

impl Command {
    fn worker_state(&self) -> WorkerState {
        match self {
            Command::Detect => WorkerState::Detect,
            Command::Read => WorkerState::ReadGeneric,
            Command::Crack => WorkerState::ReadClassicDictAttack,
            Command::Emv => WorkerState::ReadEmv,
            Command::Desfire => WorkerState::ReadDesfire,
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => WorkerConfig::load_from_file(path)?,
        None => WorkerConfig::default(),
    };

    let transport = Arc::new(PcscTransport::open()?);
    let mut worker = NfcWorker::new(transport, config);

    info!("Waiting for a card...");
    let result = Arc::new(Mutex::new(ProtocolRecord::default()));
    worker.start(args.command.worker_state(), result.clone())?;
    worker.wait();

    print_record(&result.lock().unwrap());
    Ok(())
}

fn print_record(record: &ProtocolRecord) {
    match record {
        ProtocolRecord::None => println!("No card data obtained"),
        ProtocolRecord::Generic { identity } => {
            println!("UID:  {}", identity.uid_hex());
            println!(
                "ATQA: {:02X}{:02X}  SAK: {:02X}",
                identity.atqa[1], identity.atqa[0], identity.sak
            );
        }
        ProtocolRecord::Emv { identity, data } => {
            println!("UID:  {}", identity.uid_hex());
            println!("Name: {}", data.name);
            println!("PAN:  {}", data.pan_string());
            if data.exp_month != 0 {
                println!("Exp:  {:02}/{:02}", data.exp_month, data.exp_year);
            }
        }
        ProtocolRecord::MifareClassic { identity, data } => {
            println!("UID:  {}", identity.uid_hex());
            println!("Type: Mifare Classic {}", data.card_type);
            println!(
                "Keys: {}/{} sectors, {} blocks read",
                data.sectors_with_keys(),
                data.card_type.total_sectors(),
                data.blocks_read()
            );
        }
        ProtocolRecord::MifareUltralight { identity, data } => {
            println!("UID:  {}", identity.uid_hex());
            println!("Type: {}", data.card_type);
            println!(
                "Pages: {}/{} read",
                data.pages_read,
                data.card_type.total_pages()
            );
        }
        ProtocolRecord::MifareDesfire { identity, data } => {
            println!("UID:  {}", identity.uid_hex());
            println!(
                "DESFire hw {}.{}, {} application(s)",
                data.version.hardware.major,
                data.version.hardware.minor,
                data.applications.len()
            );
            for app in &data.applications {
                println!(
                    "  App {:02X}{:02X}{:02X}: {} file(s)",
                    app.id[2],
                    app.id[1],
                    app.id[0],
                    app.files.len()
                );
            }
        }
    }
}
