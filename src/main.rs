mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, DemoArgs, RenderArgs, SendArgs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walink_whatsapp::pairing::{format_pairing_code, render_qr_png};
use walink_whatsapp::{
    render_qr_terminal, ClientConfig, ClientEvent, LoopbackTransport, TemplateParams,
    TemplateRegistry, WhatsAppClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = load_config(&cli)?;
    let qr_png = cli.qr_png;
    match cli.command {
        Commands::Templates => list_templates(),
        Commands::Render(args) => render(args),
        Commands::Send(args) => send(config, qr_png, args).await,
        Commands::Demo(args) => demo(config, qr_png, args).await,
        Commands::Logout => logout(config).await,
    }
}

/// Log level comes from `LOG_LEVEL` (default `info`); `log` records from
/// the library are bridged into the subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(ref path) = cli.auth_path {
        config.auth_state_path = path.clone();
    }
    Ok(config)
}

fn to_params(pairs: Vec<(String, String)>) -> TemplateParams {
    pairs.into_iter().collect()
}

fn list_templates() -> Result<()> {
    let registry = TemplateRegistry::builtin();
    for name in registry.names() {
        let description = registry.describe(name)?;
        let variables = registry.variables(name)?;
        if variables.is_empty() {
            println!("{:<30} {}", name, description);
        } else {
            println!("{:<30} {} [{}]", name, description, variables.join(", "));
        }
    }
    Ok(())
}

fn render(args: RenderArgs) -> Result<()> {
    let registry = TemplateRegistry::builtin();
    let text = registry.render(&args.template, &to_params(args.params))?;
    println!("{}", text);
    Ok(())
}

const QR_PNG_SIZE: u32 = 400;

/// Next client event, skipping over any the printer fell behind on.
async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> Option<ClientEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(missed)) => warn!("Skipped {} client events", missed),
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn write_qr_png(payload: &str, path: &Path) -> Result<()> {
    let png = render_qr_png(payload, QR_PNG_SIZE)?;
    tokio::fs::write(path, png)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!("QR code written to {}", path.display());
    Ok(())
}

/// Build a client on the loopback transport and wait for the link.
async fn connect(config: ClientConfig, qr_png: Option<PathBuf>) -> Result<WhatsAppClient> {
    let client = WhatsAppClient::new(config, Arc::new(LoopbackTransport::new()));

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            match event {
                ClientEvent::Qr(payload) => {
                    match render_qr_terminal(&payload) {
                        Ok(art) => println!("Scan this QR code with WhatsApp:\n{}", art),
                        Err(e) => warn!("Cannot render QR code: {}", e),
                    }
                    if let Some(ref path) = qr_png {
                        if let Err(e) = write_qr_png(&payload, path).await {
                            warn!("Cannot save QR code: {:#}", e);
                        }
                    }
                }
                ClientEvent::PairingCode(code) => {
                    println!("Enter this pairing code on your phone: {}", format_pairing_code(&code))
                }
                ClientEvent::ConnectionStateChanged(state) => info!("Connection {}", state),
                _ => {}
            }
        }
    });

    info!("Initializing WhatsApp client");
    client.initialize().await?;
    info!("Client is connected");
    Ok(client)
}

async fn send(config: ClientConfig, qr_png: Option<PathBuf>, args: SendArgs) -> Result<()> {
    let client = connect(config, qr_png).await?;
    let result = client
        .send_template(&args.to, &args.template, &to_params(args.params))
        .await;
    client.disconnect().await;

    let receipt = result?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn demo(config: ClientConfig, qr_png: Option<PathBuf>, args: DemoArgs) -> Result<()> {
    let pause = Duration::from_secs(args.pause_secs);
    let steps: [(&str, &[(&str, &str)]); 3] = [
        (
            "welcome",
            &[("name", "John Doe"), ("company", "S JAY Web Solutions")],
        ),
        ("verificationCode", &[("code", "812399")]),
        (
            "shippingUpdate",
            &[
                ("orderId", "OXU-10293"),
                ("carrier", "FedEx"),
                ("trackingNumber", "9876543210"),
            ],
        ),
    ];

    let client = connect(config, qr_png).await?;
    for (i, (template, params)) in steps.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(pause).await;
        }
        let params: TemplateParams = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        info!("Sending '{}' to {}", template, args.to);
        if let Err(e) = client.send_template(&args.to, template, &params).await {
            client.disconnect().await;
            return Err(e).context(format!("sending '{}'", template));
        }
    }

    info!("All messages sent; disconnecting");
    client.disconnect().await;
    Ok(())
}

async fn logout(config: ClientConfig) -> Result<()> {
    let path = config.auth_state_path.clone();
    let client = WhatsAppClient::new(config, Arc::new(LoopbackTransport::new()));
    client.logout().await?;
    println!("Removed credentials at {}", path);
    Ok(())
}
