//! CLI argument definitions for the keyserver binary.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cluster certificate authority and authorization server
#[derive(Parser, Debug)]
#[command(name = "keyserver")]
#[command(about = "Keyserver: short-lived cluster credentials from a declarative policy")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile the policy and serve the keyserver API
    Serve(ServeArgs),
    /// Check health of a running keyserver
    Health(HealthArgs),
    /// Compile the policy and summarize it
    Info(InfoArgs),
    /// Print the admission fingerprint of a certificate signing request
    Fingerprint(FingerprintArgs),
}

/// Arguments for the serve command
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Policy document (JSON)
    #[arg(short, long, env = "KEYSERVER_CONFIG")]
    pub config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = 20557, env = "KEYSERVER_PORT")]
    pub port: u16,

    /// Bind address. Clients reach the server through the TLS-terminating
    /// proxy, so this defaults to loopback.
    #[arg(long, default_value = "127.0.0.1", env = "KEYSERVER_HOST")]
    pub host: String,

    /// Peers whose `X-Client-Certificate` and `X-Forwarded-For` headers are
    /// believed. Those headers are ignored from any other peer.
    #[arg(
        long = "trusted-proxy",
        value_delimiter = ',',
        default_values = ["127.0.0.1", "::1"],
        env = "KEYSERVER_TRUSTED_PROXIES"
    )]
    pub trusted_proxies: Vec<IpAddr>,

    /// Directory to keep the server's own `server.key` and `server.pem` in,
    /// for the TLS-terminating proxy. Requires `server-tls` in the policy.
    #[arg(long, env = "KEYSERVER_TLS_DIR")]
    pub tls_dir: Option<PathBuf>,
}

/// Arguments for the health command
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    /// Port of the server to check
    #[arg(short, long, default_value_t = 20557, env = "KEYSERVER_PORT")]
    pub port: u16,

    /// Host of the server to check
    #[arg(long, default_value = "127.0.0.1", env = "KEYSERVER_HOST")]
    pub host: String,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}

/// Arguments for the info command
#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Policy document (JSON)
    #[arg(short, long, env = "KEYSERVER_CONFIG")]
    pub config: PathBuf,

    /// Emit JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the fingerprint command
#[derive(clap::Args, Debug)]
pub struct FingerprintArgs {
    /// PEM certificate signing request
    pub csr: PathBuf,
}
