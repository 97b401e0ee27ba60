use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "walink")]
#[command(version, about = "walink - templated WhatsApp messaging over a linked device")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Credential directory (defaults to auth_info_baileys)
    #[arg(long, global = true, env = "WALINK_AUTH_PATH")]
    pub auth_path: Option<String>,

    /// JSON client configuration file
    #[arg(long, global = true, env = "WALINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write each pairing QR code to this PNG file
    #[arg(long, global = true, value_name = "FILE")]
    pub qr_png: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List built-in templates and their variables
    Templates,

    /// Render a template without sending it
    Render(RenderArgs),

    /// Connect, send one template, and disconnect
    Send(SendArgs),

    /// Send the welcome, verification, and shipping samples in sequence
    Demo(DemoArgs),

    /// Unlink the device and delete stored credentials
    Logout,
}

#[derive(Args)]
pub struct RenderArgs {
    /// Template name
    pub template: String,

    /// Template variable as key=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(Args)]
pub struct SendArgs {
    /// Recipient phone number or JID
    #[arg(long)]
    pub to: String,

    /// Template name
    #[arg(long)]
    pub template: String,

    /// Template variable as key=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Recipient phone number or JID
    #[arg(long)]
    pub to: String,

    /// Seconds to wait between messages
    #[arg(long, default_value_t = 5)]
    pub pause_secs: u64,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
