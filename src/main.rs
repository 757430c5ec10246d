use std::{path::PathBuf, process::ExitCode};

use ::tracing::{error, info_span, Instrument};
use clap::Parser;
use config::{ConfigOverrides, UploaderConfig};
use service::Service;

mod config;
mod service;
mod tracing;

#[derive(Parser)]
#[command(version, about = "Stream a local file to Cloudflare R2", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "File to upload")]
    file: Option<PathBuf>,

    #[arg(short, long, help = "Destination bucket")]
    bucket: Option<String>,

    #[arg(short, long, help = "Object key, defaults to the file name")]
    key: Option<String>,

    #[arg(long, help = "Cloudflare account id")]
    account_id: Option<String>,

    #[arg(long, help = "Bytes read from the file per chunk")]
    chunk_size: Option<usize>,

    #[arg(long, help = "Do not create the bucket before uploading")]
    skip_bucket_check: bool,

    #[arg(long, help = "Abort the upload after this many seconds")]
    deadline_secs: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            source: self.file.clone(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            account_id: self.account_id.clone(),
            chunk_size: self.chunk_size,
            skip_bucket_check: self.skip_bucket_check,
            deadline_secs: self.deadline_secs,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match UploaderConfig::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(err) => {
            tracing::init(false);
            error!("Error loading config: {:?}", err);
            return ExitCode::FAILURE;
        }
    };
    tracing::setup_tracing(&config);

    let root_span = info_span!("r2-stream", bucket = %config.bucket);
    let result = async {
        let service = Service::new(config).await?;
        service.start().await
    }
    .instrument(root_span)
    .await;

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Upload failed: {:?}", err);
            ExitCode::FAILURE
        }
    }
}
