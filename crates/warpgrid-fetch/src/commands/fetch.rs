use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::info;
use warpgrid_webclient::config::parse_duration;
use warpgrid_webclient::{
    AutoBody, BodyCodec, BodySource, ClientOptions, HttpRequest, HttpResponse, Method, WebClient,
};

/// Response body rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Decode {
    /// Bytes as received.
    Raw,
    /// UTF-8 text.
    Text,
    /// Pretty-printed JSON.
    Json,
    /// JSON when the response says so, raw bytes otherwise.
    Auto,
    /// Drop the body.
    None,
}

#[derive(Debug)]
pub enum Payload {
    None,
    Text(String),
    Json(String),
    File {
        path: PathBuf,
        content_length: Option<u64>,
    },
}

pub struct FetchArgs {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: Vec<String>,
    pub payload: Payload,
    pub timeout: Option<String>,
    pub tls: bool,
    pub decode: Decode,
    pub include: bool,
    pub config: Option<PathBuf>,
}

pub async fn fetch(args: FetchArgs) -> anyhow::Result<()> {
    let mut options = match &args.config {
        Some(path) => ClientOptions::from_file(path)?,
        None => ClientOptions::default(),
    };
    options.tls |= args.tls;

    let client = WebClient::with_options(options);
    let mut request = client.request(args.method, &args.host, args.port, &args.path);

    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.add_header(name, value);
    }
    if let Some(raw) = &args.timeout {
        let timeout = parse_duration(raw).with_context(|| format!("invalid timeout {raw:?}"))?;
        request = request.timeout(timeout);
    }

    let (request, body) = attach_payload(request, args.payload).await?;
    info!(
        method = %args.method,
        target = %request.target(),
        "sending request"
    );

    let mut out = std::io::stdout().lock();
    match args.decode {
        Decode::Raw => {
            let resp = request.send_body(body).await?;
            write_head(&mut out, &resp, args.include)?;
            out.write_all(resp.body())?;
        }
        Decode::Text => {
            let resp = request.codec(BodyCodec::text()).send_body(body).await?;
            write_head(&mut out, &resp, args.include)?;
            writeln!(out, "{}", resp.body())?;
        }
        Decode::Json => {
            let resp = request.codec(BodyCodec::json_value()).send_body(body).await?;
            write_head(&mut out, &resp, args.include)?;
            writeln!(out, "{:#}", resp.body())?;
        }
        Decode::Auto => {
            let resp = request.codec(BodyCodec::auto_json()).send_body(body).await?;
            write_head(&mut out, &resp, args.include)?;
            match resp.body() {
                AutoBody::Json(value) => writeln!(out, "{value:#}")?,
                AutoBody::Raw(bytes) => out.write_all(bytes)?,
            }
        }
        Decode::None => {
            let resp = request.codec(BodyCodec::discard()).send_body(body).await?;
            write_head(&mut out, &resp, args.include)?;
        }
    }
    out.flush()?;
    Ok(())
}

async fn attach_payload(
    request: HttpRequest,
    payload: Payload,
) -> anyhow::Result<(HttpRequest, BodySource)> {
    Ok(match payload {
        Payload::None => (request, BodySource::Empty),
        Payload::Text(text) => (request, BodySource::Buffer(text.into())),
        Payload::Json(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("--json is not valid JSON")?;
            (request, BodySource::json(&value)?)
        }
        Payload::File {
            path,
            content_length,
        } => {
            let body = BodySource::file(&path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            let request = match content_length {
                Some(len) => request.put_header("Content-Length", len.to_string()),
                None => request,
            };
            (request, body)
        }
    })
}

/// Split `Name: value` into its parts.
fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header {raw:?} must look like NAME:VALUE");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header {raw:?} has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn write_head<T>(out: &mut impl Write, resp: &HttpResponse<T>, include: bool) -> anyhow::Result<()> {
    info!(status = resp.status(), "response received");
    if !include {
        return Ok(());
    }
    writeln!(out, "HTTP/1.1 {} {}", resp.status(), resp.status_message())?;
    for header in resp.headers().iter() {
        writeln!(out, "{}: {}", header.name, header.value)?;
    }
    writeln!(out)?;
    Ok(())
}
