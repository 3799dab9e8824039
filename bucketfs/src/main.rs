use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use bucketfs::cadapter::client::ObjectBackend;
use bucketfs::cadapter::localfs::LocalFsBackend;
use bucketfs::cadapter::s3::{S3Backend, S3Config};
use bucketfs::fuse::mount::mount_vfs_unprivileged;
use bucketfs::vfs::config::VfsConfig;
use bucketfs::vfs::fs::Vfs;

#[derive(Parser)]
#[command(name = "bucketfs", version, about = "Mount an object-storage bucket via FUSE")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount a bucket.
    Mount(MountArgs),
}

#[derive(Args)]
struct MountArgs {
    /// Directory to mount the filesystem.
    #[arg(value_name = "MOUNT_POINT")]
    mount_point: PathBuf,

    /// Bucket to mount.
    #[arg(long, value_name = "NAME", required_unless_present = "local_root")]
    bucket: Option<String>,

    /// S3-compatible endpoint URL; AWS when omitted.
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Serve a local directory as the bucket instead of S3.
    #[arg(long, value_name = "DIR", conflicts_with = "bucket")]
    local_root: Option<PathBuf>,

    /// Cache directory; holds the attribute store and cached file content.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Attribute store path (defaults to <cache-dir>/meta.db).
    #[arg(long, value_name = "FILE")]
    db_path: Option<PathBuf>,

    /// Seconds a directory listing is trusted before the remote is listed again.
    #[arg(long, default_value_t = 60)]
    listing_ttl: u64,

    /// Seconds the kernel may cache attributes and entries.
    #[arg(long, default_value_t = 1)]
    attr_ttl: u64,

    /// Seconds before a remote request is abandoned.
    #[arg(long, default_value_t = 30)]
    remote_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "bucketfs=info".to_string()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Mount(args) => mount_cmd(args).await?,
    }

    Ok(())
}

async fn mount_cmd(args: MountArgs) -> anyhow::Result<()> {
    if !args.mount_point.exists() {
        std::fs::create_dir_all(&args.mount_point)?;
    }
    let mp_meta = std::fs::metadata(&args.mount_point)?;
    if !mp_meta.is_dir() {
        anyhow::bail!("mount point must be a directory");
    }

    let mut config = VfsConfig::default()
        .owner(mp_meta.uid(), mp_meta.gid())
        .listing_ttl(Duration::from_secs(args.listing_ttl))
        .attr_ttl(Duration::from_secs(args.attr_ttl))
        .remote_timeout(Duration::from_secs(args.remote_timeout));
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(db) = &args.db_path {
        config = config.db_path(db);
    }

    match (&args.local_root, &args.bucket) {
        (Some(root), _) => {
            std::fs::create_dir_all(root)?;
            info!(root = %root.display(), "using local directory backend");
            serve(LocalFsBackend::new(root), config, &args).await
        }
        (None, Some(bucket)) => {
            let mut s3 = S3Config::default().region(&args.region);
            if let Some(endpoint) = &args.endpoint {
                s3 = s3.endpoint(endpoint);
            }
            let backend = S3Backend::new(bucket, s3).await?;
            info!(bucket, "using s3 backend");
            serve(backend, config, &args).await
        }
        (None, None) => anyhow::bail!("either --bucket or --local-root is required"),
    }
}

async fn serve<B: ObjectBackend + 'static>(
    backend: B,
    config: VfsConfig,
    args: &MountArgs,
) -> anyhow::Result<()> {
    let fs = Vfs::new(backend, config).await?;
    let handle = mount_vfs_unprivileged(fs, &args.mount_point).await?;

    println!("mounted at {}", args.mount_point.display());
    tokio::signal::ctrl_c().await?;
    println!("unmounting...");
    handle.unmount().await?;
    Ok(())
}
