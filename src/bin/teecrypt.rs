//! teecrypt CLI — encrypt stored records with keys held by a trusted application
//!
//! Commands:
//!   teecrypt put     — store a record payload
//!   teecrypt get     — show a record payload
//!   teecrypt encrypt — encode a record in place through the TEE
//!   teecrypt decrypt — decode a record in place through the TEE
//!   teecrypt verify  — encode + decode a record and compare, without writing
//!   teecrypt keygen  — resolve (find or generate) the key for a record
//!   teecrypt slot    — show which key slot a record uses
//!   teecrypt status  — show backend, config and store summary
//!   teecrypt demo    — run the full flow in a scratch directory

use log::{error, warn};
use std::env;
use std::path::Path;
use teecrypt_core::keys::slot_for_record;
use teecrypt_core::storage::{DataRecord, KeyFile, RecordFile, RecordStore};
use teecrypt_core::tee::{Mode, SecureSession, SimulatedTrustedApp, TeeBackend, TeeError, SERVICE_UUID};
use teecrypt_core::{process_record, verify_round_trip, KeyLifecycleManager, PipelineConfig};

const CONFIG_FILE: &str = "teecrypt.json";

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        teecrypt — TEE-delegated record encryption            ║
╚══════════════════════════════════════════════════════════════╝

Usage: teecrypt <command> [options]

Commands:
  put      <id> <text...>     Store a record (zero-padded to the block size)
  get      <id>               Show a record payload
  encrypt  <id>               Encode a record in place
  decrypt  <id>               Decode a record in place
  verify   <id>               Encode + decode and compare, nothing written
  keygen   <id>               Find or generate the key for a record's slot
  slot     <id>               Show the key slot for a record id
  status                      Show backend, config and stores
  demo                        Run the full flow in a scratch directory

Configuration is read from ./{CONFIG_FILE} when present.

Examples:
  teecrypt put 0 "hello trusted world"
  teecrypt encrypt 0
  teecrypt decrypt 0
  teecrypt slot 150
"#
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    if let Err(e) = run(&args[1], &args[2..]) {
        match e.status() {
            Some((code, Some(origin))) => {
                error!("{}: {} (code {} origin {})", e.kind(), e, code, origin)
            }
            Some((code, None)) => error!("{}: {} (code {})", e.kind(), e, code),
            None => error!("{}: {}", e.kind(), e),
        }
        std::process::exit(1);
    }
}

fn run(command: &str, args: &[String]) -> Result<(), TeeError> {
    match command {
        "put" => cmd_put(args),
        "get" => cmd_get(args),
        "encrypt" => cmd_process(args, Mode::Encode),
        "decrypt" => cmd_process(args, Mode::Decode),
        "verify" => cmd_verify(args),
        "keygen" => cmd_keygen(args),
        "slot" => cmd_slot(args),
        "status" => cmd_status(),
        "demo" => cmd_demo(),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            Err(TeeError::Config(format!("Unknown command: {}", other)))
        }
    }
}

fn load_config() -> Result<PipelineConfig, TeeError> {
    PipelineConfig::load_or_default(CONFIG_FILE)
}

fn parse_id(args: &[String], usage: &str) -> Result<u64, TeeError> {
    args.first()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TeeError::Config(format!("Usage: teecrypt {}", usage)))
}

/// Open a session with the trusted application
fn open_session() -> Result<SecureSession<SimulatedTrustedApp>, TeeError> {
    let backend = TeeBackend::probe();
    if backend.is_hardware() {
        warn!(
            "{} device present but no vendor client is linked, using the simulated trusted application",
            backend.name()
        );
    }
    SecureSession::open(SimulatedTrustedApp::new(), SERVICE_UUID)
}

fn cmd_put(args: &[String]) -> Result<(), TeeError> {
    let id = parse_id(args, "put <id> <text...>")?;
    if args.len() < 2 {
        return Err(TeeError::Config("Usage: teecrypt put <id> <text...>".into()));
    }
    let text = args[1..].join(" ");
    let config = load_config()?;

    let record = DataRecord::padded(id, text.as_bytes(), config.block_size)?;
    let mut records = RecordFile::open(&config.record_file)?;
    records.write(&record)?;
    println!(
        "\n  Stored record {} ({} bytes, block {})",
        id,
        text.len(),
        config.block_size
    );
    Ok(())
}

fn cmd_get(args: &[String]) -> Result<(), TeeError> {
    let id = parse_id(args, "get <id>")?;
    let config = load_config()?;
    let records = RecordFile::open(&config.record_file)?;
    let record = records.read(id)?;

    println!("\n  Record {}", id);
    println!("  {}", "-".repeat(40));
    println!("  Hex:   {}", hex::encode(&record.payload));
    println!("  Text:  {}", String::from_utf8_lossy(record.trimmed()));
    Ok(())
}

fn cmd_process(args: &[String], mode: Mode) -> Result<(), TeeError> {
    let usage = match mode {
        Mode::Encode => "encrypt <id>",
        Mode::Decode => "decrypt <id>",
    };
    let id = parse_id(args, usage)?;
    let config = load_config()?;

    let mut session = open_session()?;
    let mut keys = KeyLifecycleManager::new(KeyFile::new(&config.key_file), config.key_size);
    let mut records = RecordFile::open(&config.record_file)?;

    let report = process_record(&mut session, &mut keys, &mut records, &config, id, mode)?;
    session.close();

    println!("\n  {:?} record {} done", mode, id);
    println!("  Key slot:   {} ({:?})", report.slot, report.key_origin);
    println!("  Transform:  {:?}, {} bytes", report.transform, report.bytes);
    Ok(())
}

fn cmd_verify(args: &[String]) -> Result<(), TeeError> {
    let id = parse_id(args, "verify <id>")?;
    let config = load_config()?;

    let mut session = open_session()?;
    let mut keys = KeyLifecycleManager::new(KeyFile::new(&config.key_file), config.key_size);
    let records = RecordFile::open(&config.record_file)?;

    let matches = verify_round_trip(&mut session, &mut keys, &records, &config, id)?;
    session.close();

    if matches {
        println!("\n  Clear text and decoded text match");
    } else {
        println!("\n  Clear text and decoded text differ => ERROR");
    }
    Ok(())
}

fn cmd_keygen(args: &[String]) -> Result<(), TeeError> {
    let id = parse_id(args, "keygen <id>")?;
    let config = load_config()?;

    let mut session = open_session()?;
    let mut keys = KeyLifecycleManager::new(KeyFile::new(&config.key_file), config.key_size);
    let key = keys.resolve_key(&mut session, id)?;
    session.close();

    println!("\n  Record {} -> slot {}", id, key.slot);
    println!("  Key:        {} bytes ({:?})", key.key_len(), key.origin);
    Ok(())
}

fn cmd_slot(args: &[String]) -> Result<(), TeeError> {
    let id = parse_id(args, "slot <id>")?;
    println!("\n  Record {} -> key slot {}", id, slot_for_record(id));
    Ok(())
}

fn cmd_status() -> Result<(), TeeError> {
    let config = load_config()?;
    let backend = TeeBackend::probe();
    let key_file = KeyFile::new(&config.key_file);
    let records = RecordFile::open(&config.record_file)?;

    println!("\n  teecrypt Status");
    println!("  {}", "=".repeat(40));
    println!("  TEE device:      {}", backend.name());
    println!("  Trusted app:     {} (simulated)", SERVICE_UUID);
    println!("  Config file:     {}", if Path::new(CONFIG_FILE).exists() { CONFIG_FILE } else { "(defaults)" });
    println!("  Cipher:          {:?} / {:?}", config.algorithm, config.key_size);
    println!("  Block size:      {} bytes", config.block_size);
    println!("  Transform:       {:?}", config.transform);
    println!("  Key slots:       {} ({})", key_file.slot_lines()?, config.key_file.display());
    println!("  Records:         {} ({})", records.count(), config.record_file.display());
    Ok(())
}

fn cmd_demo() -> Result<(), TeeError> {
    let dir = env::temp_dir().join(format!("teecrypt-demo-{}", uuid::Uuid::new_v4()));
    demo_in(&dir)
}

/// Run the demo in `dir`, removing it afterwards whatever the outcome
fn demo_in(dir: &Path) -> Result<(), TeeError> {
    let result = run_demo(dir);
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Could not remove demo directory {}: {}", dir.display(), e);
        }
    }
    result
}

fn run_demo(dir: &Path) -> Result<(), TeeError> {
    let config = PipelineConfig {
        key_file: dir.join("key.txt"),
        record_file: dir.join("records.json"),
        ..PipelineConfig::default()
    };

    println!("\n  teecrypt demo ({})", dir.display());
    println!("  {}", "-".repeat(50));

    let mut records = RecordFile::open(&config.record_file)?;
    for (id, text) in [(0u64, "first record"), (150, "second record"), (180, "third record")] {
        records.write(&DataRecord::padded(id, text.as_bytes(), config.block_size)?)?;
        println!("  Stored record {:>3}: '{}'", id, text);
    }

    println!("  Prepare session with the TA");
    let mut session = open_session()?;
    let mut keys = KeyLifecycleManager::new(KeyFile::new(&config.key_file), config.key_size);

    for id in [0u64, 150, 180] {
        let report = process_record(&mut session, &mut keys, &mut records, &config, id, Mode::Encode)?;
        println!(
            "  Encoded record {:>3} with slot {} key ({:?})",
            id, report.slot, report.key_origin
        );
    }
    println!("  Ciphertext of record 0: {}...", &hex::encode(records.read(0)?.payload)[..32]);

    for id in [0u64, 150, 180] {
        process_record(&mut session, &mut keys, &mut records, &config, id, Mode::Decode)?;
        let record = records.read(id)?;
        println!(
            "  Decoded record {:>3}: '{}'",
            id,
            String::from_utf8_lossy(record.trimmed())
        );
    }

    let matches = verify_round_trip(&mut session, &mut keys, &records, &config, 0)?;
    println!("  Round trip on record 0: {}", if matches { "match" } else { "MISMATCH" });
    println!("  Keys generated in TEE:  {}", keys.generated_count());
    println!("  Commands invoked:       {}", session.invocations());
    session.close();
    Ok(())
}
