//! wfetch: send one HTTP request from the command line.
//!
//! # Usage
//!
//! ```text
//! wfetch GET localhost 8080 /wines --decode json
//! wfetch POST localhost 8080 /upload --file ./dump.bin --timeout 30s
//! wfetch PUT api.example.com 443 /items/7 --tls --json '{"qty":3}' -H 'X-Tenant: acme'
//! ```

use std::path::PathBuf;

use clap::Parser;
use warpgrid_webclient::Method;

use crate::commands::fetch::{Decode, FetchArgs, Payload};

mod commands;

#[derive(Parser)]
#[command(
    name = "wfetch",
    about = "WarpGrid web client: send one HTTP request",
    version
)]
struct Cli {
    /// Request method (GET, HEAD, DELETE, POST, PUT, PATCH, OPTIONS).
    method: Method,
    /// Server host name or address.
    host: String,
    /// Server port.
    port: u16,
    /// Path plus query string.
    #[arg(default_value = "/")]
    path: String,

    /// Extra request header, repeatable.
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Send this text as the body.
    #[arg(short, long, conflicts_with_all = ["json", "file"])]
    data: Option<String>,

    /// Send this JSON document as the body.
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,

    /// Stream this file as the body.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Declare the streamed file's length instead of using chunked encoding.
    #[arg(long, requires = "file")]
    content_length: Option<u64>,

    /// Request deadline, e.g. "500ms", "5s", "2m".
    #[arg(short, long)]
    timeout: Option<String>,

    /// Connect with TLS.
    #[arg(long)]
    tls: bool,

    /// How to decode the response body.
    #[arg(long, value_enum, default_value = "text")]
    decode: Decode,

    /// Print the status line and response headers before the body.
    #[arg(short, long)]
    include: bool,

    /// Client options file (webclient.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("warpgrid_webclient=info,wfetch=info"))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let payload = match (cli.data, cli.json, cli.file) {
        (Some(text), _, _) => Payload::Text(text),
        (_, Some(json), _) => Payload::Json(json),
        (_, _, Some(path)) => Payload::File {
            path,
            content_length: cli.content_length,
        },
        _ => Payload::None,
    };

    commands::fetch::fetch(FetchArgs {
        method: cli.method,
        host: cli.host,
        port: cli.port,
        path: cli.path,
        headers: cli.headers,
        payload,
        timeout: cli.timeout,
        tls: cli.tls,
        decode: cli.decode,
        include: cli.include,
        config: cli.config,
    })
    .await
}
