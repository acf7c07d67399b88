use crate::Command;
use anyhow::{anyhow, bail, Result};
use billing_portal::api::types::{InvoiceDetails, InvoiceSummary};
use billing_portal::api::{HttpPortal, PasswordReset, PortalApi};
use billing_portal::cache::{Cache, INVOICE_DATA_KEY};
use billing_portal::config::Config;
use billing_portal::gateway::{self, Handler};
use billing_portal::journal::Journal;
use billing_portal::resolver::{BindingHandle, PaymentBinding, PaymentMethodResolver, Resolution};
use billing_portal::retry::ThreadSleeper;
use billing_portal::session::{Clock, SessionStore, SystemClock};
use billing_portal::storage::{FileStore, KeyValueStore};
use billing_portal::PortalError;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Context {
    pub config: Config,
    pub session: Arc<SessionStore>,
    pub cache: Cache,
    pub portal: HttpPortal,
}

impl Context {
    pub fn new(config: Config) -> Self {
        let path = config
            .storage
            .path
            .clone()
            .unwrap_or_else(FileStore::default_path);
        tracing::debug!(path = %path.display(), "using session store");

        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&path));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let session = Arc::new(SessionStore::new(store.clone(), clock.clone()));
        let cache = Cache::new(store, clock, config.cache.duration_secs());
        let portal = HttpPortal::new(
            config.api.base_url(),
            config.api.timeout(),
            config.api.device_name(),
            session.clone(),
        );

        Self {
            config,
            session,
            cache,
            portal,
        }
    }
}

pub fn run(ctx: &Context, command: Command) -> Result<()> {
    let result = match command {
        Command::Login {
            identifier,
            password,
            remember,
        } => login(ctx, identifier, password, remember),
        Command::Logout => logout(ctx),
        Command::ForgotPassword { email } => forgot_password(ctx, &email),
        Command::ResetPassword {
            email,
            token,
            password,
            confirm,
        } => reset_password(ctx, &email, &token, &password, confirm.as_deref()),
        Command::Status => status(ctx),
        Command::Profile => profile(ctx),
        Command::Invoices { refresh } => invoices(ctx, refresh),
        Command::Invoice { id } => invoice(ctx, &id),
        Command::InvoiceDetails => invoice_details(ctx),
        Command::BillingPeriod => billing_period(ctx),
        Command::Clients => clients(ctx),
        Command::Classify { name } => {
            classify(&name.join(" "));
            Ok(())
        }
        Command::Pay {
            invoice_id,
            gateway,
            retries,
            delay_ms,
            give_up_after,
        } => pay(
            ctx,
            invoice_id,
            gateway,
            retries,
            delay_ms,
            give_up_after.map(Duration::from_secs),
        ),
    };

    // An expired or missing session means starting over from login
    if let Err(err) = &result {
        if err.downcast_ref::<PortalError>().is_some_and(PortalError::is_auth) {
            if let Err(clear_err) = ctx.session.clear() {
                tracing::warn!(error = %clear_err, "failed to clear session");
            }
        }
    }
    result
}

fn login(
    ctx: &Context,
    identifier: Option<String>,
    password: Option<String>,
    remember: bool,
) -> Result<()> {
    let identifier = identifier
        .or_else(|| ctx.session.remembered_identifier())
        .ok_or_else(|| anyhow!("No identifier given and none remembered"))?;
    let password =
        password.ok_or_else(|| anyhow!("Password required (--password or PORTAL_PASSWORD)"))?;

    let login = ctx.portal.login(&identifier, &password)?;

    // Drop whatever a previous session left behind before storing the new one
    ctx.session.clear()?;
    ctx.session.establish(&login)?;
    if remember {
        ctx.session.remember_identifier(&identifier)?;
    }

    // Prefill the invoice cache; the login stamp goes last so it covers it
    match ctx.portal.invoices() {
        Ok(list) => {
            ctx.cache.save(INVOICE_DATA_KEY, &list);
            ctx.cache.touch();
        }
        Err(err) => tracing::warn!(error = %err, "could not prefetch invoices"),
    }
    ctx.cache.mark_login();

    let name = login
        .client
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .unwrap_or(&identifier);
    println!("Logged in as {}", name);
    match ctx.session.expires_at() {
        Some(at) => println!("Session valid until {}", at.to_rfc3339()),
        None => println!("Warning: no session expiry received; you will need to log in again"),
    }
    Ok(())
}

fn logout(ctx: &Context) -> Result<()> {
    ctx.session.logout()?;
    println!("Logged out");
    Ok(())
}

fn forgot_password(ctx: &Context, email: &str) -> Result<()> {
    let message = ctx.portal.forgot_password(email)?;
    println!("{}", message);
    println!("Then run `portal reset-password {} --token <code>`", email.trim());
    Ok(())
}

fn reset_password(
    ctx: &Context,
    email: &str,
    token: &str,
    password: &str,
    confirm: Option<&str>,
) -> Result<()> {
    let reset = PasswordReset {
        email,
        token,
        password,
        confirmation: confirm.unwrap_or(password),
    };
    let message = ctx.portal.reset_password(&reset)?;
    println!("{}", message);
    println!("You can now log in with the new password.");
    Ok(())
}

fn status(ctx: &Context) -> Result<()> {
    if !ctx.session.is_active() {
        println!("Not logged in");
        return Ok(());
    }

    if let Some(client) = ctx.session.user_data() {
        if let Some(name) = &client.name {
            println!("User: {}", name);
        }
    }
    match ctx.session.expires_at() {
        Some(at) if !ctx.session.is_expired() => {
            println!("Session valid until {}", at.to_rfc3339())
        }
        Some(at) => println!("Session expired at {}", at.to_rfc3339()),
        None => println!("Session has no recorded expiry; please log in again"),
    }
    Ok(())
}

fn profile(ctx: &Context) -> Result<()> {
    let client = ctx.portal.client_profile()?;
    ctx.session.set_user_data(&client)?;

    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("ID:     {}", field(&client.id));
    println!("Name:   {}", field(&client.name));
    println!("Email:  {}", field(&client.email));
    println!("Status: {}", field(&client.status));
    for (key, value) in &client.extra {
        match value.as_str() {
            Some(s) => println!("{}: {}", key, s),
            None => println!("{}: {}", key, value),
        }
    }
    Ok(())
}

fn invoices(ctx: &Context, refresh: bool) -> Result<()> {
    let cached: Option<Vec<InvoiceSummary>> = if !refresh && ctx.cache.is_valid() {
        ctx.cache.get(INVOICE_DATA_KEY)
    } else {
        None
    };

    let list = match cached {
        Some(list) => {
            tracing::debug!(count = list.len(), "serving invoices from cache");
            list
        }
        None => {
            let list = ctx.portal.invoices()?;
            ctx.cache.save(INVOICE_DATA_KEY, &list);
            ctx.cache.touch();
            list
        }
    };

    if list.is_empty() {
        println!("No invoices");
        return Ok(());
    }

    let cell = |v: &Option<String>| v.as_deref().unwrap_or("-").to_string();
    println!(
        "{:<8} {:<10} {:>14} {:<12} {}",
        "ID", "STATUS", "TOTAL", "DUE", "METHOD"
    );
    for inv in &list {
        println!(
            "{:<8} {:<10} {:>14} {:<12} {}",
            cell(&inv.id),
            cell(&inv.status),
            cell(&inv.total),
            cell(&inv.duedate),
            cell(&inv.paymentmethod)
        );
    }
    Ok(())
}

fn print_details(details: &InvoiceDetails) {
    if let Some(inv) = &details.invoice {
        let cell = |v: &Option<String>| v.as_deref().unwrap_or("-").to_string();
        println!("Invoice #{}", cell(&inv.id));
        println!("  Status:  {}", cell(&inv.status));
        println!("  Total:   {}", cell(&inv.total));
        println!("  Date:    {}", cell(&inv.date));
        println!("  Due:     {}", cell(&inv.duedate));
        println!("  Method:  {}", cell(&inv.paymentmethod));
    }

    let Some(info) = &details.payment_info else {
        return;
    };
    let numbers = [
        ("VA number", &info.va_number),
        ("Virtual account", &info.virtual_account_number),
        ("Account number", &info.account_number),
    ];
    for (label, value) in numbers {
        if let Some(value) = value {
            println!("  {}: {}", label, value);
        }
    }
    if !info.available_payment_methods.is_empty() {
        println!("  Payment methods:");
        for method in &info.available_payment_methods {
            println!(
                "    {:<24} {}",
                method.gateway.as_deref().unwrap_or("?"),
                method.va_number.as_deref().unwrap_or("")
            );
        }
    }
}

fn invoice(ctx: &Context, id: &str) -> Result<()> {
    let details = ctx.portal.invoice(id)?;
    print_details(&details);
    Ok(())
}

fn invoice_details(ctx: &Context) -> Result<()> {
    let details = ctx.portal.detailed_invoices()?;
    println!("{}", serde_json::to_string_pretty(&details)?);
    Ok(())
}

fn billing_period(ctx: &Context) -> Result<()> {
    let period = ctx.portal.billing_period()?;
    println!("Period start: {}", period.start_date);
    println!("Due date:     {}", period.due_date);
    println!("Amount:       {}", period.amount);
    if period.estimated {
        println!("(estimated; the portal did not report the full period)");
    }
    Ok(())
}

fn clients(ctx: &Context) -> Result<()> {
    let list = ctx.portal.all_clients()?;
    if list.is_empty() {
        println!("No clients");
        return Ok(());
    }
    let cell = |v: &Option<String>| v.as_deref().unwrap_or("-").to_string();
    println!("{:<8} {:<28} {:<32} {}", "ID", "NAME", "EMAIL", "STATUS");
    for client in &list {
        println!(
            "{:<8} {:<28} {:<32} {}",
            cell(&client.id),
            cell(&client.name),
            cell(&client.email),
            cell(&client.status)
        );
    }
    Ok(())
}

fn classify(name: &str) {
    match gateway::classify(name) {
        Some(code) => {
            let handler = match code.handler() {
                Handler::VirtualAccount => "virtual account",
                Handler::HostedInvoice => "hosted invoice page",
                Handler::PayNowEndpoint => "payNow redirect",
            };
            let keywords: Vec<&str> = code.keywords().collect();
            println!("{} -> {} ({})", name, code, handler);
            println!("  keywords: {}", keywords.join(", "));
        }
        None => println!("{} -> unrecognised, pays on the invoice page", name),
    }
}

/// Journal writes are best effort
fn record(journal: &mut Option<Journal>, write: impl FnOnce(&mut Journal) -> billing_portal::Result<()>) {
    if let Some(journal) = journal.as_mut() {
        if let Err(err) = write(journal) {
            tracing::warn!(error = %err, "failed to write payment journal");
        }
    }
}

fn open_journal(config: &Config) -> Option<Journal> {
    if !config.journal.enabled() {
        return None;
    }
    let dir = config.journal.dir()?;
    match Journal::create_in(&dir) {
        Ok(journal) => {
            tracing::debug!(path = %journal.path.display(), "payment journal opened");
            Some(journal)
        }
        Err(err) => {
            tracing::warn!(error = %err, "payment journal unavailable");
            None
        }
    }
}

fn pay(
    ctx: &Context,
    invoice_id: Option<String>,
    gateway: Vec<String>,
    retries: Option<u32>,
    delay_ms: Option<u64>,
    give_up_after: Option<Duration>,
) -> Result<()> {
    let (invoice_id, gateway) = match invoice_id {
        Some(_) if gateway.is_empty() => bail!("Missing gateway name"),
        Some(id) => (id, gateway.join(" ")),
        None => ctx
            .cache
            .resume_payment()
            .ok_or_else(|| anyhow!("No payment to resume; pass an invoice id and gateway"))?,
    };
    ctx.cache.remember_payment(&invoice_id, &gateway);

    let mut policy = ctx.config.retry.policy();
    if let Some(retries) = retries {
        policy.max_retries = retries;
    }
    if let Some(delay_ms) = delay_ms {
        policy.delay = Duration::from_millis(delay_ms);
    }

    let resolver = PaymentMethodResolver::new(&ctx.portal, ThreadSleeper, policy);
    let binding = BindingHandle::new(PaymentBinding::new(&invoice_id, &gateway));
    let mut journal = open_journal(&ctx.config);

    println!("Setting up {} for invoice #{}...", gateway, invoice_id);
    record(&mut journal, |j| j.resolve_start(&invoice_id, &gateway));
    let started = Instant::now();
    let deadline = give_up_after.map(|limit| binding.cancel_after(limit));

    let outcome = resolver.resolve(&binding);
    if let Some(disarm) = deadline {
        disarm.cancel();
    }
    let resolution = match outcome {
        Ok(resolution) => resolution,
        Err(err) => {
            record(&mut journal, |j| j.resolve_error(&binding.snapshot(), &err));
            return Err(err.into());
        }
    };
    let elapsed = started.elapsed().as_millis() as u64;
    record(&mut journal, |j| {
        j.resolve_end(&binding.snapshot(), &resolution, elapsed)
    });

    match resolution {
        Resolution::VirtualAccount { code, number } => {
            println!("Virtual account ({}): {}", code, number);
            println!("Transfer the invoice total to this account number.");
        }
        Resolution::VaPending { code, retries } => {
            println!(
                "Payment method set to {}, but the virtual account was not issued after {} retries.",
                code, retries
            );
            println!("Run `portal pay` again in a moment to check.");
        }
        Resolution::Redirect { url: Some(url), .. } => {
            println!("Open this page to complete the payment:");
            println!("  {}", url);
        }
        Resolution::Redirect { message, .. } => {
            bail!(
                "Could not get a payment link: {}",
                message.unwrap_or_else(|| "no link returned".to_string())
            );
        }
        Resolution::Cancelled => {
            println!("Gave up waiting; the payment method may still be set.");
            println!("Run `portal pay` to check again.");
        }
    }
    Ok(())
}
