use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.presenz.Attendance1",
    default_service = "org.presenz.Attendance1",
    default_path = "/org/presenz/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image: Vec<u8>, location: String) -> zbus::Result<String>;
    async fn enroll(
        &self,
        employee_code: String,
        display_name: String,
        org_unit: String,
        images: Vec<Vec<u8>>,
    ) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn deactivate(&self, identity_id: String) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "presenz", about = "Presenz attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from one to five face images
    Enroll {
        /// Stable employee code (e.g., "E-1042")
        #[arg(short, long)]
        employee_code: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Organizational unit
        #[arg(short, long, default_value = "")]
        org_unit: String,
        /// Paths to face sample images
        images: Vec<PathBuf>,
    },
    /// Recognize a capture and record attendance
    Recognize {
        /// Path to the captured image
        image: PathBuf,
        /// Kiosk location tag
        #[arg(short, long, default_value = "main-entrance")]
        location: String,
    },
    /// List enrolled identities
    List,
    /// Deactivate an identity
    Deactivate {
        /// Identity id to deactivate
        id: String,
    },
    /// Show daemon status
    Status,
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Pretty-print a JSON reply, falling back to the raw string.
fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{raw}"),
        },
        Err(_) => println!("{raw}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("connecting to the system bus — is presenzd running?")?;
    let proxy = AttendanceProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll {
            employee_code,
            name,
            org_unit,
            images,
        } => {
            if images.is_empty() {
                bail!("at least one face image is required");
            }
            let payloads = images
                .iter()
                .map(|p| read_image(p))
                .collect::<Result<Vec<_>>>()?;
            let id = proxy
                .enroll(employee_code, name, org_unit, payloads)
                .await
                .context("enroll failed")?;
            println!("enrolled: {id}");
        }
        Commands::Recognize { image, location } => {
            let payload = read_image(&image)?;
            let reply = proxy
                .recognize(payload, location)
                .await
                .context("recognize failed")?;
            print_json(&reply);
        }
        Commands::List => {
            let reply = proxy.list_identities().await?;
            print_json(&reply);
        }
        Commands::Deactivate { id } => {
            if proxy.deactivate(id.clone()).await? {
                println!("deactivated: {id}");
            } else {
                println!("no identity with id {id}");
            }
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            print_json(&reply);
        }
    }

    Ok(())
}
