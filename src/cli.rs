use crate::{Args, Command, TokenAction};
use anyhow::{anyhow, Context as _, Result};
use chrono::{DateTime, SubsecRound, Utc};
use formsauth::audit::AuditLog;
use formsauth::config::{Config, MachineKeyConfig};
use formsauth::credentials::{hash_password_for_storing, CredentialStore, PasswordFormat};
use formsauth::forms::TICK_DIGITS;
use formsauth::{crypto, url_token, AuthOutcome, FormsAuth};
use std::cell::RefCell;
use std::path::PathBuf;

pub struct Context {
    pub args: Args,
    pub root: PathBuf,
    pub now: DateTime<Utc>,
    pub config: Config,
    /// Built only for commands that handle tickets
    pub forms: Option<FormsAuth>,
    pub audit: RefCell<Option<AuditLog>>,
}

impl Context {
    fn forms(&self) -> Result<&FormsAuth> {
        self.forms
            .as_ref()
            .ok_or_else(|| anyhow!("This command has no machine key"))
    }

    /// Audit failures are reported but never abort the command
    fn audit(&self, record: impl FnOnce(&mut AuditLog) -> Result<()>) {
        if let Some(log) = self.audit.borrow_mut().as_mut() {
            if let Err(e) = record(log) {
                eprintln!("Warning: failed to write audit event: {}", e);
            }
        }
    }
}

pub fn run(ctx: &Context) -> Result<()> {
    match &ctx.args.command {
        Command::Issue {
            name,
            persistent,
            user_data,
            value_only,
        } => issue(ctx, name, *persistent, user_data, *value_only),
        Command::Login {
            name,
            password,
            persistent,
            return_url,
        } => login(ctx, name, password, *persistent, return_url.as_deref()),
        Command::Decode { value } => decode(ctx, value),
        Command::Renew { value } => renew(ctx, value),
        Command::Authenticate { value, path } => authenticate(ctx, value.as_deref(), path),
        Command::SignOut => {
            let cookie = ctx.forms()?.sign_out_cookie();
            ctx.audit(|log| log.signed_out(&cookie.name));
            println!("Set-Cookie: {}", cookie.to_header_value());
            Ok(())
        }
        Command::Token { action } => token(action),
        Command::Keygen { write } => keygen(ctx, *write),
        Command::HashPassword { password, format } => {
            let format = PasswordFormat::from_str(format)
                .ok_or_else(|| anyhow!("Unknown password format: {}. Use: clear, sha1, md5", format))?;
            println!("{}", hash_password_for_storing(password, format));
            ctx.audit(|log| log.password_hashed(format.as_str()));
            Ok(())
        }
        Command::CheckConfig => check_config(ctx),
    }
}

fn issue(ctx: &Context, name: &str, persistent: bool, user_data: &str, value_only: bool) -> Result<()> {
    let (ticket, cookie) = ctx.forms()?.auth_cookie(name, persistent, user_data, ctx.now)?;
    ctx.audit(|log| log.ticket_issued(&ticket));

    if value_only {
        println!("{}", cookie.value);
    } else {
        println!("Set-Cookie: {}", cookie.to_header_value());
    }
    Ok(())
}

fn login(
    ctx: &Context,
    name: &str,
    password: &str,
    persistent: bool,
    return_url: Option<&str>,
) -> Result<()> {
    let store = CredentialStore::from_config(&ctx.config.credentials);
    if store.is_empty() {
        return Err(anyhow!("No users configured in [credentials]"));
    }
    if !store.authenticate(name, password) {
        ctx.audit(|log| log.ticket_rejected("bad_credentials"));
        return Err(anyhow!("Invalid user name or password"));
    }

    let (ticket, cookie) = ctx.forms()?.auth_cookie(name, persistent, "", ctx.now)?;
    ctx.audit(|log| log.ticket_issued(&ticket));

    println!("Set-Cookie: {}", cookie.to_header_value());
    println!("Location: {}", ctx.forms()?.redirect_url(return_url));
    Ok(())
}

fn decode(ctx: &Context, value: &str) -> Result<()> {
    let Some(ticket) = ctx.forms()?.decrypt(value)? else {
        ctx.audit(|log| log.ticket_rejected("invalid"));
        return Err(anyhow!("Ticket rejected"));
    };
    ctx.audit(|log| log.ticket_decoded(&ticket));

    println!("{}", serde_json::to_string_pretty(&ticket)?);
    if ticket.expired(ctx.now) {
        eprintln!("Note: ticket expired at {}", ticket.expiration.to_rfc3339());
    }
    Ok(())
}

fn renew(ctx: &Context, value: &str) -> Result<()> {
    let Some(ticket) = ctx.forms()?.decrypt(value)? else {
        ctx.audit(|log| log.ticket_rejected("invalid"));
        return Err(anyhow!("Ticket rejected"));
    };

    if !ticket.needs_renewal(ctx.now) {
        eprintln!("Ticket does not need renewal yet");
        println!("{}", value);
        return Ok(());
    }

    let renewed = ticket.renew_if_old(ctx.now.trunc_subsecs(TICK_DIGITS));
    let cookie = ctx.forms()?.cookie_for(&renewed)?;
    ctx.audit(|log| log.ticket_renewed(&renewed));
    println!("{}", cookie.value);
    Ok(())
}

fn authenticate(ctx: &Context, value: Option<&str>, path: &str) -> Result<()> {
    match ctx.forms()?.authenticate_request(value, ctx.now) {
        AuthOutcome::Authenticated { ticket, refreshed } => {
            ctx.audit(|log| log.ticket_decoded(&ticket));
            println!("Authenticated: {}", ticket.name);
            if let Some(cookie) = refreshed {
                ctx.audit(|log| log.ticket_renewed(&ticket));
                println!("Set-Cookie: {}", cookie.to_header_value());
            }
            Ok(())
        }
        outcome => {
            let reason = match outcome {
                AuthOutcome::Anonymous => "anonymous",
                AuthOutcome::Expired(_) => "expired",
                _ => "rejected",
            };
            if reason != "anonymous" {
                ctx.audit(|log| log.ticket_rejected(reason));
            }
            println!("Location: {}", ctx.forms()?.login_redirect(path));
            Err(anyhow!("Not authenticated ({})", reason))
        }
    }
}

fn token(action: &TokenAction) -> Result<()> {
    match action {
        TokenAction::Encode { hex } => {
            let bytes = hex::decode(hex.trim()).context("Input is not hex")?;
            println!("{}", url_token::encode(&bytes));
        }
        TokenAction::Decode { token } => {
            let bytes = url_token::decode(token.trim()).ok_or_else(|| anyhow!("Invalid URL token"))?;
            println!("{}", hex::encode(bytes));
        }
    }
    Ok(())
}

fn keygen(ctx: &Context, write: bool) -> Result<()> {
    let (validation_key, decryption_key) = crypto::generate_hex_keys();
    let keys = MachineKeyConfig {
        validation_key: Some(validation_key),
        decryption_key: Some(decryption_key),
        ..Default::default()
    };

    if write {
        let path = Config::save_local_machine_key(&ctx.root, &keys)?;
        println!("Wrote machine key to {}", path.display());
    } else {
        println!("[machine_key]");
        print!("{}", toml::to_string_pretty(&keys)?);
    }
    Ok(())
}

fn check_config(ctx: &Context) -> Result<()> {
    let config = &ctx.config;
    println!("[forms]");
    print!("{}", toml::to_string_pretty(&config.forms)?);
    println!();
    println!(
        "Machine key: {}",
        if config.machine_key.is_auto_generated() {
            "auto-generated (tickets do not survive restarts)"
        } else {
            "configured"
        }
    );
    println!(
        "Credentials: {} users ({})",
        config.credentials.users.len(),
        config.credentials.password_format.as_str()
    );
    println!(
        "Audit: {}",
        if config.audit.enabled { "enabled" } else { "disabled" }
    );
    println!("Configuration OK");
    Ok(())
}
