//! strongbox-client - secure upload and backup management

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use strongbox::client::{BackupClient, ClientIdentity, UploadEngine, UploadOutcome};
use strongbox::config::{TransferInfo, UserInfo, TRANSFER_INFO_FILE, USER_INFO_FILE};
use strongbox::crypto::{KeyPair, DEFAULT_KEY_BITS};
use strongbox::protocol::{UserId, BACKUP_PROTOCOL_VERSION, HANDSHAKE_PROTOCOL_VERSION};

#[derive(Parser, Debug)]
#[command(name = "strongbox-client", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register if needed, exchange keys and upload the file named in transfer.info
    Upload {
        #[arg(long, default_value = TRANSFER_INFO_FILE)]
        transfer_info: PathBuf,

        #[arg(long, default_value = USER_INFO_FILE)]
        me_info: PathBuf,

        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        key_bits: usize,

        #[arg(long, default_value_t = strongbox::client::DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        #[arg(long, default_value_t = HANDSHAKE_PROTOCOL_VERSION)]
        version: u8,
    },
    /// Back up a local file
    Backup {
        #[command(flatten)]
        target: BackupTarget,
        file: PathBuf,
    },
    /// Restore a file from the server
    Restore {
        #[command(flatten)]
        target: BackupTarget,
        filename: String,
        /// Where to write it; defaults to the filename
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file on the server
    Delete {
        #[command(flatten)]
        target: BackupTarget,
        filename: String,
    },
    /// List backed up files
    List {
        #[command(flatten)]
        target: BackupTarget,
    },
}

#[derive(Args, Debug)]
struct BackupTarget {
    /// Backup server `host:port`
    #[arg(short, long, env = "STRONGBOX_SERVER", default_value = "127.0.0.1:1337")]
    server: String,

    /// User id; defaults to the one derived from me.info
    #[arg(short, long)]
    user: Option<UserId>,

    #[arg(long, default_value = USER_INFO_FILE)]
    me_info: PathBuf,

    #[arg(long, default_value_t = BACKUP_PROTOCOL_VERSION)]
    version: u8,
}

impl BackupTarget {
    fn client(&self) -> Result<BackupClient> {
        let user_id = match self.user {
            Some(id) => id,
            None => match UserInfo::load_if_exists(&self.me_info)? {
                Some(info) => info.client_id.storage_id(),
                None => bail!(
                    "No --user given and {} does not exist",
                    self.me_info.display()
                ),
            },
        };
        Ok(BackupClient::new(&self.server, user_id, self.version))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Upload {
            transfer_info,
            me_info,
            key_bits,
            max_attempts,
            version,
        } => upload(transfer_info, me_info, key_bits, max_attempts, version).await,
        Command::Backup { target, file } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable file name", file.display()))?;
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            target.client()?.backup(filename, content).await?;
            println!("Backed up {}", filename);
            Ok(())
        }
        Command::Restore {
            target,
            filename,
            output,
        } => {
            let content = target.client()?.restore(&filename).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(&filename));
            tokio::fs::write(&output, &content)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Restored {} ({} bytes) to {}", filename, content.len(), output.display());
            Ok(())
        }
        Command::Delete { target, filename } => {
            target.client()?.delete(&filename).await?;
            println!("Deleted {}", filename);
            Ok(())
        }
        Command::List { target } => {
            for name in target.client()?.list().await? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn upload(
    transfer_info: PathBuf,
    me_info: PathBuf,
    key_bits: usize,
    max_attempts: u32,
    version: u8,
) -> Result<()> {
    let transfer = TransferInfo::load(&transfer_info)?;

    let mut identity = match UserInfo::load_if_exists(&me_info)? {
        Some(info) => {
            if info.name != transfer.name {
                warn!(
                    "{} belongs to {:?}, {} names {:?}; using the saved identity",
                    me_info.display(),
                    info.name,
                    transfer_info.display(),
                    transfer.name
                );
            }
            ClientIdentity::from_user_info(info)
        }
        None => {
            info!("Generating {}-bit RSA key", key_bits);
            let keypair = tokio::task::spawn_blocking(move || KeyPair::generate(key_bits))
                .await
                .context("Key generation task failed")??;
            ClientIdentity::new(transfer.name.clone(), keypair)
        }
    };
    let was_registered = identity.client_id.is_some();

    let stream = TcpStream::connect(&transfer.server)
        .await
        .with_context(|| format!("Failed to connect to {}", transfer.server))?;
    let mut engine = UploadEngine::new(stream, version).with_max_attempts(max_attempts);
    let outcome = engine.upload_path(&mut identity, &transfer.file_path).await;

    // keep the identity even if the upload itself failed
    if !was_registered {
        if let Some(info) = identity.to_user_info() {
            info.save(&me_info)?;
            info!("Saved identity to {}", me_info.display());
        }
    }

    match outcome? {
        UploadOutcome::Verified { attempts, checksum } => {
            println!(
                "Uploaded {} (cksum {}, {} attempt(s))",
                transfer.file_path.display(),
                checksum,
                attempts
            );
            Ok(())
        }
        UploadOutcome::GaveUp { attempts } => {
            bail!("Checksum never matched after {} attempts", attempts)
        }
    }
}
