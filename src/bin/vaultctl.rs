//! VaultCtl - Command line client for WolfVault
//!
//! Usage:
//!   vaultctl upload <path>            - Store a local file
//!   vaultctl list                     - List stored names
//!   vaultctl download <name> [-o out] - Retrieve a stored file
//!   vaultctl delete <name>            - Remove a stored file

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use reqwest::{multipart, Body, Certificate, Client, Identity, Response, Url};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// WolfVault Control Tool
#[derive(Parser)]
#[command(name = "vaultctl")]
#[command(about = "Store and retrieve files on a WolfVault server", long_about = None)]
struct Cli {
    /// Server base URL
    #[arg(short, long, default_value = "https://localhost:8443")]
    endpoint: String,

    /// CA bundle used to verify the server certificate
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Client certificate (PEM)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// File to upload
        path: PathBuf,
        /// Name to store it under (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List stored files
    List,
    /// Download a stored file
    Download {
        /// Stored name
        name: String,
        /// Output path (defaults to the stored name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a stored file
    Delete {
        /// Stored name
        name: String,
    },
}

// ============ API Response Types ============

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct UploadResponse {
    client: String,
    stored_name: String,
    original_name: String,
    size_bytes: u64,
    created_at_millis: i64,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    deleted: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match build_client(&cli) {
        Ok(client) => run(&cli, &client).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, client: &Client) -> Result<()> {
    let endpoint = Url::parse(&cli.endpoint)
        .with_context(|| format!("invalid endpoint {}", cli.endpoint))?;

    match &cli.command {
        Commands::Upload { path, name } => upload(client, &endpoint, path, name.as_deref()).await,
        Commands::List => list(client, &endpoint).await,
        Commands::Download { name, output } => {
            let output = output.clone().unwrap_or_else(|| PathBuf::from(name));
            download(client, &endpoint, name, &output).await
        }
        Commands::Delete { name } => delete(client, &endpoint, name).await,
    }
}

/// Build an HTTPS client carrying the configured client certificate
fn build_client(cli: &Cli) -> Result<Client> {
    let mut builder = Client::builder().use_rustls_tls();

    if let Some(ca) = &cli.ca_cert {
        let pem = std::fs::read(ca).with_context(|| format!("reading {}", ca.display()))?;
        builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
    }

    if let (Some(cert), Some(key)) = (&cli.cert, &cli.key) {
        let mut pem = std::fs::read(cert).with_context(|| format!("reading {}", cert.display()))?;
        pem.push(b'\n');
        pem.extend(std::fs::read(key).with_context(|| format!("reading {}", key.display()))?);
        builder = builder.identity(Identity::from_pem(&pem)?);
    }

    Ok(builder.build()?)
}

fn file_url(endpoint: &Url, name: &str) -> Result<Url> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("endpoint cannot be a base URL"))?
        .pop_if_empty()
        .push("files")
        .push(name);
    Ok(url)
}

/// Turn a non-success response into an error carrying the server's message
async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(err) => bail!("{} ({}, {})", err.error, err.code, status),
        Err(_) => bail!("API error: {}", status),
    }
}

// ============ Commands ============

async fn upload(client: &Client, endpoint: &Url, path: &Path, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?,
    };

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let length = file.metadata().await?.len();

    let body = Body::wrap_stream(ReaderStream::new(file));
    let part = multipart::Part::stream_with_length(body, length).file_name(name);
    let form = multipart::Form::new().part("file", part);

    let response = client.post(endpoint.join("upload")?).multipart(form).send().await?;
    let stored: UploadResponse = check(response).await?.json().await?;

    println!(
        "Stored {} as {} ({} bytes)",
        stored.original_name, stored.stored_name, stored.size_bytes
    );
    Ok(())
}

async fn list(client: &Client, endpoint: &Url) -> Result<()> {
    let response = client.get(endpoint.join("files")?).send().await?;
    let listing: ListResponse = check(response).await?.json().await?;

    if listing.files.is_empty() {
        println!("No files stored");
        return Ok(());
    }

    for name in &listing.files {
        println!("{}", name);
    }
    println!();
    println!("{} file(s)", listing.files.len());
    Ok(())
}

async fn download(client: &Client, endpoint: &Url, name: &str, output: &Path) -> Result<()> {
    let response = client.get(file_url(endpoint, name)?).send().await?;
    let response = check(response).await?;

    let mut out = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;

    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;

    println!("Downloaded {} to {} ({} bytes)", name, output.display(), written);
    Ok(())
}

async fn delete(client: &Client, endpoint: &Url, name: &str) -> Result<()> {
    let response = client.delete(file_url(endpoint, name)?).send().await?;
    let deleted: DeleteResponse = check(response).await?.json().await?;

    println!("Deleted {}", deleted.deleted);
    Ok(())
}
