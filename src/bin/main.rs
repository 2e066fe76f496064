// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use bytes::Bytes;
use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use paywall_ledger::{
    AppConfig, ArtifactDescriptor, ArtifactVault, EntitlementStore, MemoryStore, PricingEngine,
    ReconcileRequest, Reconciler, SessionId, TracingEventSink, Transaction, TransactionLedger,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Paywall Ledger - Reconcile pay-per-download batches
///
/// Reads processed artifacts from a CSV file. `fingerprint` prints their
/// fingerprints; `reconcile` charges for them and prints the ledger.
#[derive(Parser, Debug)]
#[command(name = "paywall-ledger")]
#[command(about = "Payment and entitlement reconciliation for pay-per-download artifacts", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fingerprint of every artifact
    ///
    /// Expected format: name,byte_size,width,height[,path]
    Fingerprint {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Reconcile one batch and write the session ledger to stdout
    Reconcile {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Payer mobile-money number
        #[arg(long)]
        phone: String,

        /// Promotional code
        #[arg(long)]
        promo: Option<String>,

        /// Receipt e-mail address
        #[arg(long)]
        email: Option<String>,

        /// Session to reconcile under; a fresh one by default
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match AppConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => AppConfig::default(),
    };
    init_tracing(&config.log_level, args.json_logs);

    let result = match args.command {
        Command::Fingerprint { input } => open(&input)
            .and_then(|file| read_artifacts(BufReader::new(file)).map_err(|e| e.to_string()))
            .and_then(|rows| write_fingerprints(&rows, std::io::stdout()).map_err(|e| e.to_string())),
        Command::Reconcile {
            input,
            phone,
            promo,
            email,
            session,
        } => {
            let rows = match open(&input)
                .and_then(|file| read_artifacts(BufReader::new(file)).map_err(|e| e.to_string()))
            {
                Ok(rows) => rows,
                Err(e) => {
                    eprintln!("Error reading artifacts: {}", e);
                    process::exit(1);
                }
            };
            let session = session.map_or_else(SessionId::generate, SessionId::new);
            reconcile(&config, rows, session, phone, promo, email).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open(path: &Path) -> Result<File, String> {
    File::open(path).map_err(|e| format!("opening '{}': {}", path.display(), e))
}

/// Runs one reconciliation against the configured payment servers.
///
/// The ledger is written even when the reconciliation fails, so a failed or
/// pending row is visible to the operator.
async fn reconcile(
    config: &AppConfig,
    rows: Vec<ArtifactRow>,
    session: SessionId,
    phone: String,
    promo: Option<String>,
    email: Option<String>,
) -> Result<(), String> {
    let gateway = config.gateway.build_adapter().map_err(|e| e.to_string())?;
    let store = Arc::new(MemoryStore::with_config(config.pricing.clone()));
    let ledger = Arc::new(TransactionLedger::new(
        store.clone(),
        config.gateway.reference_prefix.clone(),
    ));

    let (vault, mut released) = ArtifactVault::new();
    let mut fingerprints = Vec::with_capacity(rows.len());
    for row in rows {
        let blob = row.load_blob();
        fingerprints.push(vault.register(row.descriptor(), blob));
    }

    let drain = tokio::spawn(async move {
        while let Some(artifact) = released.recv().await {
            info!(name = %artifact.name, bytes = artifact.blob.len(), "artifact released");
        }
    });

    let reconciler = Reconciler::new(
        Arc::new(EntitlementStore::new(store.clone())),
        Arc::new(PricingEngine::new(store.clone())),
        ledger.clone(),
        Arc::new(gateway),
        Arc::new(vault),
        Arc::new(TracingEventSink),
    );

    let mut request = ReconcileRequest::new(session.clone(), fingerprints, phone);
    request.promo_code = promo;
    request.email = email;
    let outcome = reconciler.reconcile(request).await;

    // Dropping the reconciler closes the vault's channel and ends the drain.
    drop(reconciler);
    if let Err(e) = drain.await {
        warn!(error = %e, "artifact drain task failed");
    }

    let history = ledger.history(&session).await.map_err(|e| e.to_string())?;
    write_ledger(&history, std::io::stdout()).map_err(|e| e.to_string())?;

    match outcome {
        Ok(outcome) => {
            if let Some(rejection) = outcome.promo_warning() {
                eprintln!("Promotional code not applied: {}", rejection);
            }
            info!(
                path = ?outcome.path,
                requested = outcome.requested(),
                delivered = outcome.delivered(),
                "reconciliation finished"
            );
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Raw CSV record describing one processed artifact.
///
/// Fields: `name, byte_size, width, height` and an optional `path` to the
/// processed bytes.
#[derive(Debug, Deserialize)]
struct ArtifactRow {
    name: String,
    byte_size: u64,
    width: u32,
    height: u32,
    #[serde(default)]
    path: Option<PathBuf>,
}

impl ArtifactRow {
    fn descriptor(&self) -> ArtifactDescriptor {
        ArtifactDescriptor::new(self.name.clone(), self.byte_size, self.width, self.height)
    }

    fn load_blob(&self) -> Bytes {
        let Some(path) = &self.path else {
            return Bytes::new();
        };
        match std::fs::read(path) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "artifact bytes unreadable");
                Bytes::new()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct FingerprintRow<'a> {
    name: &'a str,
    fingerprint: String,
}

/// Reads artifact rows, skipping malformed ones.
///
/// # CSV Format
///
/// ```csv
/// name,byte_size,width,height,path
/// beach.jpg,48213,1280,720,out/beach.jpg
/// logo.png,1024,64,64,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
fn read_artifacts<R: Read>(reader: R) -> Result<Vec<ArtifactRow>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in rdr.deserialize::<ArtifactRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!(error = %e, "skipping malformed artifact row"),
        }
    }
    Ok(rows)
}

fn write_fingerprints<W: Write>(rows: &[ArtifactRow], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(FingerprintRow {
            name: &row.name,
            fingerprint: row.descriptor().fingerprint().to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes ledger rows with amounts at 2 decimal places.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_ledger<W: Write>(transactions: &[Transaction], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for transaction in transactions {
        wtr.serialize(transaction)?;
    }
    wtr.flush()?;
    Ok(())
}
