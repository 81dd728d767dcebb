// Campus Match - operator CLI
//
//   campus-match init
//   campus-match import <accounts.csv>
//   campus-match seed-admin <id> <display_name>
//   campus-match token <account_id>

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::fs::File;
use tracing_subscriber::EnvFilter;

use campus_match::entities::account::get_account;
use campus_match::entities::load_accounts_csv;
use campus_match::{Config, HmacTokenVerifier, Identity, LedgerError, MatchService, NewAccount};

fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str())),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&config),
        Some("import") => {
            let path = args.get(2).context("usage: campus-match import <accounts.csv>")?;
            run_import(&config, path)
        }
        Some("seed-admin") => {
            let (id, name) = match (args.get(2), args.get(3)) {
                (Some(id), Some(name)) => (id, name),
                _ => bail!("usage: campus-match seed-admin <id> <display_name>"),
            };
            run_seed_admin(&config, id, name)
        }
        Some("token") => {
            let id = args.get(2).context("usage: campus-match token <account_id>")?;
            run_token(&config, id)
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("Campus Match v{}", campus_match::VERSION);
    println!();
    println!("Commands:");
    println!("  init                              Create the database schema");
    println!("  import <accounts.csv>             Register accounts from a roster");
    println!("  seed-admin <id> <display_name>    Register an administrator");
    println!("  token <account_id>                Sign a bearer token for an account");
}

fn run_init(config: &Config) -> Result<()> {
    println!("🔧 Setting up database...");
    MatchService::from_config(config)?;
    println!("✓ Database ready at {} (WAL mode)", config.database_path.display());
    Ok(())
}

fn run_import(config: &Config, csv_path: &str) -> Result<()> {
    println!("📂 Loading roster...");
    let file = File::open(csv_path).with_context(|| format!("Failed to open {}", csv_path))?;
    let accounts = load_accounts_csv(file)?;
    println!("✓ Loaded {} rows from {}", accounts.len(), csv_path);

    println!("\n💾 Registering accounts...");
    let service = MatchService::from_config(config)?;
    let summary = service.import_accounts(&accounts)?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Registered: {}", summary.inserted);
    println!("✓ Already present (skipped): {}", summary.duplicates);
    Ok(())
}

fn run_seed_admin(config: &Config, id: &str, display_name: &str) -> Result<()> {
    let service = MatchService::from_config(config)?;
    match service.register_account(&NewAccount::admin(id, display_name)) {
        Ok(account) => {
            println!("✅ Administrator {} ({}) registered", account.display_name, account.id);
            Ok(())
        }
        Err(LedgerError::DuplicateAccount(_)) => {
            println!("✓ Account {} already exists, nothing to do", id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_token(config: &Config, account_id: &str) -> Result<()> {
    let verifier = HmacTokenVerifier::new(config.require_token_secret()?);
    let service = MatchService::from_config(config)?;

    let account = service.store().read(|conn| get_account(conn, account_id))?;
    let token = verifier.issue(&Identity::new(&account.id, account.role), Utc::now())?;

    // Token only on stdout so it can be piped
    eprintln!("🔑 Token for {} ({})", account.id, account.role.as_str());
    println!("{}", token);
    Ok(())
}
