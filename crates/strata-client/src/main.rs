use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata_client::Client;
use strata_client::config::ClientConfig;
use strata_client::uploader::MirrorState;
use strata_crypto::keys::{generate_chunk_key, key_to_base64};
use tracing::info;

#[derive(Parser)]
#[command(name = "strata-client", version, about = "Upload files to a strata network")]
struct Cli {
    /// Control node base URL (overrides STRATA_CONTROL_URL)
    #[arg(long, global = true)]
    control_url: Option<String>,
    /// Working directory for chunks and transfer logs (overrides STRATA_WORKING_DIR)
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Split a file into chunks without uploading
    Prepare {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        encrypt: bool,
        #[arg(long, default_value_t = false)]
        compress: bool,
    },
    /// Prepare and upload a file
    Upload {
        path: PathBuf,
        #[arg(long)]
        volume: Option<String>,
        #[arg(long, default_value_t = false)]
        encrypt: bool,
        #[arg(long, default_value_t = false)]
        compress: bool,
    },
    /// Upload an already prepared chunk directory
    UploadChunks {
        chunk_dir: PathBuf,
        #[arg(long)]
        volume: Option<String>,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        file_name: Option<String>,
    },
    /// Resume an interrupted upload
    Resume { chunk_dir: PathBuf },
    /// Join downloaded chunks back into a file
    Assemble {
        download_dir: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = false)]
        compressed: bool,
        #[arg(long, default_value_t = false)]
        encrypted: bool,
    },
    /// Print a new base64 chunk encryption key
    GenKey,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "strata_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.control_url {
        config.control_url = url.trim_end_matches('/').to_string();
    }
    if let Some(dir) = cli.working_dir {
        config.working_dir = dir;
    }
    let client = Client::new(&config);

    match cli.cmd {
        Cmd::Prepare { path, encrypt, compress } => {
            let dir = client.prepare_file(&path, encrypt, compress)?;
            println!("{}", dir.display());
        }
        Cmd::Upload { path, volume, encrypt, compress } => {
            let report = client.upload_file(&path, volume.as_deref(), encrypt, compress)?;
            print_report(report.uploaded, &report.mirror);
        }
        Cmd::UploadChunks { chunk_dir, volume, threads, file_name } => {
            let report = client.upload_file_chunks(
                &chunk_dir,
                volume.as_deref(),
                threads,
                file_name.as_deref(),
                serde_json::Map::new(),
            )?;
            print_report(report.uploaded, &report.mirror);
        }
        Cmd::Resume { chunk_dir } => {
            let report = client.resume_upload(&chunk_dir)?;
            print_report(report.uploaded, &report.mirror);
        }
        Cmd::Assemble { download_dir, output, compressed, encrypted } => {
            client.assemble_download(&download_dir, &output, compressed, encrypted)?;
            info!("Wrote {}", output.display());
        }
        Cmd::GenKey => println!("{}", key_to_base64(&generate_chunk_key())),
    }
    Ok(())
}

fn print_report(uploaded: usize, mirror: &MirrorState) {
    match mirror {
        MirrorState::Mirrored { min_count } => {
            println!("Uploaded {} chunks, every chunk has at least {} mirror(s)", uploaded, min_count)
        }
        MirrorState::StoredUnderReplicated { unmirrored } => println!(
            "Uploaded {} chunks; {} not mirrored yet: {:?}",
            uploaded,
            unmirrored.len(),
            unmirrored
        ),
        MirrorState::Unknown => println!("Uploaded {} chunks; mirror status unknown", uploaded),
    }
}
