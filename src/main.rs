use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use anyhow::Context as _;
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use tracing::*;

pub use workspaces_controller::{self, controllers, telemetry, webhook, ControllerConfig, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Gateway the generated VirtualServices attach to
    #[arg(long, env = "ISTIO_GATEWAY", default_value = controllers::DEFAULT_ISTIO_GATEWAY)]
    istio_gateway: String,

    /// Host the generated VirtualServices match
    #[arg(long, env = "ISTIO_HOST", default_value = controllers::DEFAULT_ISTIO_HOST)]
    istio_host: String,

    #[arg(long, env = "CLUSTER_DOMAIN", default_value = controllers::DEFAULT_CLUSTER_DOMAIN)]
    cluster_domain: String,

    /// Timeout of the Jupyter activity probe
    #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = 15)]
    http_timeout_seconds: u64,

    /// Directory holding tls.crt and tls.key for the admission webhook.
    /// Without it the webhook is not served.
    #[arg(long, env = "WEBHOOK_CERT_DIR", value_name = "DIR")]
    webhook_cert_dir: Option<PathBuf>,

    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
    webhook_port: u16,

    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,
}

impl Arguments {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            istio_gateway: self.istio_gateway.clone(),
            istio_host: self.istio_host.clone(),
            cluster_domain: self.cluster_domain.clone(),
            http_timeout: Duration::from_secs(self.http_timeout_seconds),
        }
    }
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

fn load_tls_config(cert_dir: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let cert_path = cert_dir.join("tls.crt");
    let key_path = cert_dir.join("tls.key");

    let mut certs = BufReader::new(
        File::open(&cert_path).with_context(|| format!("Failed to open {}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut certs)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read certificates from {}", cert_path.display()))?;

    let mut key = BufReader::new(
        File::open(&key_path).with_context(|| format!("Failed to open {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key)
        .with_context(|| format!("Failed to read private key from {}", key_path.display()))?
        .with_context(|| format!("No private key found in {}", key_path.display()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid webhook certificate")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args: Arguments = Arguments::parse();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install the rustls crypto provider");
    }

    let client = kube::Client::try_default()
        .await
        .context("Failed to create kube client")?;

    // Initiatilize Kubernetes controller state
    let state = State::new(args.controller_config());
    let controller = controllers::run(client.clone(), state.clone());
    tokio::pin!(controller);

    let tls_config = args
        .webhook_cert_dir
        .as_deref()
        .map(load_tls_config)
        .transpose()?;
    if tls_config.is_none() {
        warn!("WEBHOOK_CERT_DIR is not set; admission webhook is disabled because the api server only calls it over TLS");
    }

    // Start web server
    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server_state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(("0.0.0.0", args.metrics_port))?
    .shutdown_timeout(5)
    .run();
    tokio::pin!(server);

    let webhook_server = async move {
        let Some(tls_config) = tls_config else {
            return Ok(());
        };
        info!("Serving admission webhook over TLS on port {}", args.webhook_port);
        HttpServer::new(move || {
            App::new()
                .app_data(Data::new(client.clone()))
                .wrap(middleware::Logger::default())
                .configure(webhook::configure)
        })
        .bind_rustls_0_23(("0.0.0.0", args.webhook_port), tls_config)?
        .shutdown_timeout(5)
        .run()
        .await
    };

    // All runtimes implement graceful shutdown, so poll until all are done
    let (_, server, webhook_server) = tokio::join!(controller, server, webhook_server);
    server?;
    webhook_server?;
    Ok(())
}
