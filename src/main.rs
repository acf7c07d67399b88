mod cli;

use anyhow::Result;
use billing_portal::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portal", about = "Billing portal client: invoices and payments")]
pub struct Args {
    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PORTAL_BASE_URL", help = "Portal base URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "PORTAL_STORE", help = "Session store file")]
    pub store: Option<PathBuf>,

    #[arg(short, long, help = "Verbose output (log each request and retry)")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (print HTTP details and settings)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the session
    Login {
        /// Email or client id; defaults to the remembered one
        identifier: Option<String>,
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long, help = "Remember the identifier after logout")]
        remember: bool,
    },
    /// Forget the session
    Logout,
    /// Email a password reset code
    ForgotPassword { email: String },
    /// Set a new password with the emailed code
    ResetPassword {
        email: String,
        #[arg(long, help = "Code from the reset email")]
        token: String,
        #[arg(long, env = "PORTAL_NEW_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, help = "Repeat the new password; defaults to --password")]
        confirm: Option<String>,
    },
    /// Show whether the stored session is still valid
    Status,
    /// Show the client profile
    Profile,
    /// List invoices
    Invoices {
        #[arg(long, help = "Ignore cached invoices")]
        refresh: bool,
    },
    /// Show one invoice with its payment info
    Invoice { id: String },
    /// Invoices with their hosting and product lines (raw JSON)
    InvoiceDetails,
    /// Show the current billing period
    BillingPeriod,
    /// List the portal's client directory
    Clients,
    /// Show which method code and handler a gateway name maps to
    Classify {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Pay an invoice with a gateway; without arguments resumes the last payment
    Pay {
        invoice_id: Option<String>,
        gateway: Vec<String>,
        #[arg(long, value_name = "N", help = "Virtual account polls after the first")]
        retries: Option<u32>,
        #[arg(long, value_name = "MS", help = "Delay between polls")]
        delay_ms: Option<u64>,
        #[arg(long, value_name = "SECS", help = "Cancel if not resolved in time")]
        give_up_after: Option<u64>,
    },
}

fn init_tracing(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env("PORTAL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,billing_portal={0},portal={0}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);

    let mut cfg = if let Some(config_path) = &args.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };

    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = Some(base_url.clone());
    }
    if let Some(store) = &args.store {
        cfg.storage.path = Some(store.clone());
    }

    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("Config error {}", error);
        }
        anyhow::bail!("Invalid configuration ({} error(s))", errors.len());
    }

    if args.debug {
        eprintln!("[DEBUG] Base URL: {}", cfg.api.base_url());
        eprintln!("[DEBUG] Retry policy: {:?}", cfg.retry.policy());
        eprintln!("[DEBUG] Cache duration: {}s", cfg.cache.duration_secs());
    }

    let ctx = cli::Context::new(cfg);
    cli::run(&ctx, args.command)
}
