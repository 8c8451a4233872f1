//! ledger-runner: headless runner for the investment ledger.
//!
//! Usage:
//!   ledger-runner --db ledger.db --config data/platform.json --job daily-returns --key SECRET
//!   ledger-runner --db ledger.db --job expire-payments        (key from LEDGER_CRON_KEY)
//!   ledger-runner --db ledger.db --ipc-mode
//!
//! Without `--job` every registered job runs once, in order.

use anyhow::{Context, Result};
use invest_ledger_core::{
    config::PlatformConfig, engine::Platform, error::LedgerError, store::LedgerStore,
    types::UserId,
};
use std::env;
use std::io::{self, BufRead, Write};

const KEY_ENV: &str = "LEDGER_CRON_KEY";

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    RunJob {
        job: String,
        key: String,
    },
    PaymentCallback {
        source_ip: String,
        body: serde_json::Value,
    },
    PayoutCallback {
        source_ip: String,
        body: serde_json::Value,
    },
    BalanceAudit {
        user_id: UserId,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag(&args, "--db").unwrap_or(":memory:");
    let config_path = flag(&args, "--config").unwrap_or("./data/platform.json");
    let job = flag(&args, "--job");

    let config = PlatformConfig::load(config_path)?;
    let key = flag(&args, "--key")
        .map(str::to_string)
        .or_else(|| env::var(KEY_ENV).ok())
        .unwrap_or_default();

    let store = if db == ":memory:" {
        LedgerStore::shared_memory(&format!("ledger_run_{}", std::process::id()))?
    } else {
        LedgerStore::open(db)?
    };
    store.migrate().context("migrating ledger schema")?;
    let platform = Platform::offline(store, config)?;

    if ipc_mode {
        return run_ipc_loop(&platform);
    }

    println!("ledger-runner");
    println!("  db:      {db}");
    println!("  config:  {config_path}");
    println!("  jobs:    {}", platform.job_names().join(", "));
    println!();

    let reports = match job {
        Some(name) => vec![platform.trigger(&key, name)?],
        None => platform.trigger_all(&key)?,
    };
    for r in reports {
        println!(
            "  {:<16} processed={} skipped={} failed={}",
            r.job, r.processed, r.skipped, r.failed
        );
    }
    Ok(())
}

fn run_ipc_loop(platform: &Platform) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(platform, cmd) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("ipc command failed: {e}");
                serde_json::json!({
                    "error": e.user_message(),
                    "retryable": e.is_retryable(),
                })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(platform: &Platform, cmd: IpcCommand) -> Result<serde_json::Value, LedgerError> {
    let value = match cmd {
        IpcCommand::RunJob { job, key } => serde_json::to_value(platform.trigger(&key, &job)?)?,
        IpcCommand::PaymentCallback { source_ip, body } => {
            let reply = platform
                .reconciliation
                .handle_payment_webhook(&source_ip, &body.to_string())?;
            serde_json::to_value(reply.ack)?
        }
        IpcCommand::PayoutCallback { source_ip, body } => {
            let reply = platform
                .reconciliation
                .handle_payout_webhook(&source_ip, &body.to_string())?;
            serde_json::to_value(reply.ack)?
        }
        IpcCommand::BalanceAudit { user_id } => serde_json::to_value(platform.balance_audit(user_id)?)?,
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}
