use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.gatehouse.Attendance1",
    default_service = "org.gatehouse.Attendance1",
    default_path = "/org/gatehouse/Attendance1"
)]
trait Attendance {
    fn list_entries(&self, date: &str) -> zbus::Result<String>;
    fn add_resident(
        &self,
        id: &str,
        name: &str,
        address: &str,
        block_no: &str,
        resident_type: &str,
        image: &[u8],
    ) -> zbus::Result<String>;
    fn reload_catalog(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn snapshot(&self) -> zbus::Result<Vec<u8>>;

    #[zbus(signal)]
    fn unrecognized_alert(&self, message: String, at: String) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "gatehouse", about = "Gatehouse attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List attendance entries, newest first
    List {
        /// Only entries for this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Export attendance entries
    Export {
        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportFormat,
        /// Only entries for this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Enroll a resident from a reference photo
    Add {
        /// Resident id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        block_no: String,
        #[arg(long)]
        resident_type: String,
        /// Reference photo (JPEG or PNG)
        image: PathBuf,
    },
    /// Rebuild the daemon's identity catalog from stored residents
    Reload,
    /// Show daemon status
    Status,
    /// Save the latest annotated frame as JPEG
    Snapshot {
        output: PathBuf,
    },
    /// Print unrecognized-face alerts as they happen
    Watch,
}

/// Attendance row as served by the daemon.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    date: String,
    name: String,
    entry_time: Option<String>,
    exit_time: Option<String>,
    re_entry: bool,
    re_entry_time: Option<String>,
    status: String,
    visit_id: String,
}

fn parse_rows(json: &str) -> Result<Vec<Row>> {
    serde_json::from_str(json).context("daemon returned malformed entries")
}

fn write_csv<W: Write>(rows: &[Row], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_table(rows: &[Row]) {
    if rows.is_empty() {
        println!("No entries");
        return;
    }
    println!(
        "{:<10}  {:<20}  {:<8}  {:<8}  {:<8}  {:<6}  {}",
        "DATE", "NAME", "IN", "OUT", "RE-IN", "STATUS", "ID"
    );
    for r in rows {
        println!(
            "{:<10}  {:<20}  {:<8}  {:<8}  {:<8}  {:<6}  {}",
            r.date,
            r.name,
            r.entry_time.as_deref().unwrap_or("-"),
            r.exit_time.as_deref().unwrap_or("-"),
            r.re_entry_time.as_deref().unwrap_or("-"),
            r.status,
            r.visit_id
        );
    }
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("gatehoused is not reachable")?;

    match cli.command {
        Commands::List { date, json } => {
            let raw = proxy.list_entries(date.as_deref().unwrap_or("")).await?;
            if json {
                println!("{raw}");
            } else {
                print_table(&parse_rows(&raw)?);
            }
        }
        Commands::Export { format, date, output } => {
            let raw = proxy.list_entries(date.as_deref().unwrap_or("")).await?;
            let rows = parse_rows(&raw)?;
            let mut out = open_output(output.as_deref())?;
            match format {
                ExportFormat::Csv => write_csv(&rows, &mut out)?,
                ExportFormat::Json => {
                    serde_json::to_writer_pretty(&mut out, &rows)?;
                    writeln!(out)?;
                }
            }
            tracing::debug!(rows = rows.len(), "entries exported");
        }
        Commands::Add {
            id,
            name,
            address,
            block_no,
            resident_type,
            image,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let id = proxy
                .add_resident(
                    id.as_deref().unwrap_or(""),
                    &name,
                    &address,
                    &block_no,
                    &resident_type,
                    &bytes,
                )
                .await?;
            println!("Added resident {id}");
            println!("Run `gatehouse reload` to make them recognizable");
        }
        Commands::Reload => {
            let summary: serde_json::Value = serde_json::from_str(&proxy.reload_catalog().await?)?;
            println!("Catalog reloaded: {} resident(s)", summary["loaded"]);
            if let Some(excluded) = summary["excluded"].as_array() {
                for e in excluded {
                    println!("  excluded {} ({}): {}", e["id"], e["name"], e["reason"]);
                }
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Snapshot { output } => {
            let jpeg = proxy.snapshot().await?;
            std::fs::write(&output, &jpeg)
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("Wrote {} bytes to {}", jpeg.len(), output.display());
        }
        Commands::Watch => {
            let mut alerts = proxy.receive_unrecognized_alert().await?;
            println!("Watching for unrecognized faces (Ctrl-C to stop)");
            while let Some(signal) = alerts.next().await {
                match signal.args() {
                    Ok(args) => println!("[{}] {}", args.at(), args.message()),
                    Err(e) => tracing::warn!(error = %e, "malformed alert signal"),
                }
            }
        }
    }

    Ok(())
}
