mod cli;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use formsauth::audit::AuditLog;
use formsauth::config::{self, Config};
use formsauth::{FormsAuth, ProtectionMode};
use std::cell::RefCell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formsauth", about = "Issue and verify forms authentication tickets")]
pub struct Args {
    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Audit log directory")]
    pub audit_dir: Option<PathBuf>,

    #[arg(long, help = "Do not write an audit log")]
    pub no_audit: bool,

    #[arg(
        long,
        env = "FORMSAUTH_PROTECTION",
        value_name = "MODE",
        help = "Protection mode: none, encrypt, validate, all"
    )]
    pub protection: Option<String>,

    #[arg(long, value_name = "RFC3339", help = "Evaluate tickets as of this time")]
    pub now: Option<String>,

    #[arg(long, help = "Debug output (print effective settings)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Issue a ticket and print the authentication cookie
    Issue {
        name: String,
        #[arg(long)]
        persistent: bool,
        #[arg(long, default_value = "")]
        user_data: String,
        #[arg(long, help = "Print only the encoded ticket")]
        value_only: bool,
    },
    /// Check a user against the credentials table and issue a cookie
    Login {
        name: String,
        password: String,
        #[arg(long)]
        persistent: bool,
        #[arg(long)]
        return_url: Option<String>,
    },
    /// Decode a ticket and print it as JSON
    Decode { value: String },
    /// Reissue a ticket that is past half its lifetime
    Renew { value: String },
    /// Run the per-request check on a cookie value
    Authenticate {
        value: Option<String>,
        #[arg(long, default_value = "/", help = "Requested path, for the login redirect")]
        path: String,
    },
    /// Print the cookie that signs the user out
    SignOut,
    /// URL token encoding of raw bytes
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Generate a machine key
    Keygen {
        #[arg(long, help = "Save to .formsauth/config.local.toml")]
        write: bool,
    },
    /// Hash a password for the credentials table
    HashPassword {
        password: String,
        #[arg(long, default_value = "sha1", help = "clear, sha1 or md5")]
        format: String,
    },
    /// Validate and print the effective configuration
    CheckConfig,
}

impl Command {
    /// Key and hashing tools run without a valid site config, so they can
    /// repair one
    fn handles_tickets(&self) -> bool {
        !matches!(
            self,
            Command::Token { .. } | Command::Keygen { .. } | Command::HashPassword { .. }
        )
    }
}

#[derive(Subcommand)]
pub enum TokenAction {
    /// Hex bytes to URL token
    Encode { hex: String },
    /// URL token to hex bytes
    Decode { token: String },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: failed to load config, using defaults: {:#}", e);
            Config::default()
        })
    };

    if let Some(mode_str) = &args.protection {
        cfg.forms.protection = ProtectionMode::from_str(mode_str).ok_or_else(|| {
            anyhow!(
                "Invalid protection mode: {}. Use: none, encrypt, validate, all",
                mode_str
            )
        })?;
    }

    let handles_tickets = args.command.handles_tickets();
    if let Err(errors) = cfg.validate() {
        if handles_tickets {
            for error in &errors {
                eprintln!("Config error {}", error);
            }
            return Err(anyhow!("Invalid configuration ({} errors)", errors.len()));
        }
        for error in &errors {
            eprintln!("Warning: config error {}", error);
        }
    }

    let now = match &args.now {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| anyhow!("Invalid --now '{}': {}", s, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    if args.debug {
        eprintln!("[DEBUG] Cookie: {}", cfg.forms.cookie_name);
        eprintln!("[DEBUG] Protection: {}", cfg.forms.protection.as_str());
        eprintln!("[DEBUG] Timeout: {} min", cfg.forms.timeout_minutes);
        eprintln!("[DEBUG] Cookieless: {}", cfg.forms.cookieless.as_str());
        eprintln!("[DEBUG] Sliding expiration: {}", cfg.forms.sliding_expiration);
        eprintln!("[DEBUG] Now: {}", now.to_rfc3339());
    }

    let forms = if handles_tickets {
        if cfg.machine_key.is_auto_generated() {
            eprintln!(
                "Warning: no machine key configured; using a random key (run `formsauth keygen --write`)"
            );
        }
        Some(FormsAuth::new(cfg.forms.clone(), cfg.machine_key.build()?))
    } else {
        None
    };

    let root = std::env::current_dir()?;
    let audit = if args.no_audit || !cfg.audit.enabled {
        None
    } else {
        let dir = args
            .audit_dir
            .clone()
            .or_else(|| cfg.audit.dir.clone())
            .unwrap_or_else(|| root.join(config::CONFIG_DIR).join("audit"));
        match AuditLog::create_in(&dir) {
            Ok(log) => Some(log),
            Err(e) => {
                eprintln!("Warning: audit log disabled: {:#}", e);
                None
            }
        }
    };

    let ctx = cli::Context {
        forms,
        config: cfg,
        args,
        root,
        now,
        audit: RefCell::new(audit),
    };

    cli::run(&ctx)
}
