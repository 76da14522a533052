//! `taxrecords` command line.
//!
//! The acting identity comes from `--email` (or `TAXRECORDS_EMAIL`) and the
//! `TAXRECORDS_SECRET` environment variable. Only `init` runs without one.
//!
//! ```bash
//! TAXRECORDS_SECRET=... taxrecords init --admin-email root@example.com
//! TAXRECORDS_SECRET=... taxrecords --email root@example.com import users.xlsx
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;

use taxrecords_lib::access::{authenticate, Caller, Operation};
use taxrecords_lib::archive::prune_archives;
use taxrecords_lib::config::{load_config, load_config_from, Config};
use taxrecords_lib::credentials::Argon2Hasher;
use taxrecords_lib::db::{NewSubsidiary, RecordDb};
use taxrecords_lib::importer::Importer;
use taxrecords_lib::services::{reference, setup, tax, users};

#[derive(Parser)]
#[command(name = "taxrecords")]
#[command(version)]
#[command(about = "Tax qualification records, reference data, and bulk user import")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Email of the acting user
    #[arg(long, global = true, env = "TAXRECORDS_EMAIL")]
    email: Option<String>,

    /// Secret of the acting user (set through the environment)
    #[arg(long, global = true, env = "TAXRECORDS_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Config file (default ~/.taxrecords/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create configured roles and, on an empty database, the first admin
    Init(InitArgs),

    /// Import users from a spreadsheet
    Import {
        /// .xlsx, .xlsm, .xlsb, .xls or .ods file
        file: PathBuf,
    },

    /// Show recent import attempts
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Manage user accounts
    #[command(subcommand)]
    Users(UsersCommand),

    /// Manage roles
    #[command(subcommand)]
    Roles(RolesCommand),

    /// Manage currencies
    #[command(subcommand)]
    Currencies(CurrenciesCommand),

    /// Manage countries
    #[command(subcommand)]
    Countries(CountriesCommand),

    /// Record and look up exchange rates
    #[command(subcommand)]
    Rates(RatesCommand),

    /// Manage subsidiaries
    #[command(subcommand)]
    Subsidiaries(SubsidiariesCommand),

    /// Manage tax qualifications
    #[command(subcommand)]
    Qualifications(QualificationsCommand),
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    admin_email: String,
    #[arg(long, default_value = "Admin")]
    admin_name: String,
    #[arg(long, default_value = "User")]
    admin_surname: String,
    /// ISO code of the base currency
    #[arg(long, default_value = "CLP")]
    currency: String,
    #[arg(long, default_value = "Peso chileno")]
    currency_name: String,
    #[arg(long, default_value = "Chile")]
    country: String,
    /// ISO code of the country
    #[arg(long, default_value = "CL")]
    country_code: String,
}

#[derive(Subcommand)]
enum UsersCommand {
    /// List users with their role and country
    List,
    /// Create a user; the secret comes from TAXRECORDS_NEW_SECRET
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        surname: String,
        #[arg(long)]
        user_email: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        role_id: i64,
        #[arg(long)]
        country_id: i64,
        #[arg(long, env = "TAXRECORDS_NEW_SECRET", hide_env_values = true)]
        new_secret: String,
        /// Create the account disabled
        #[arg(long)]
        inactive: bool,
    },
    /// Delete a user
    Delete { id: i64 },
    /// Total, recently created and active users
    Stats,
    /// Prior versions of a user
    History { id: i64 },
    /// Change your own secret to TAXRECORDS_NEW_SECRET
    ChangeSecret {
        #[arg(long, env = "TAXRECORDS_NEW_SECRET", hide_env_values = true)]
        new_secret: String,
    },
}

#[derive(Subcommand)]
enum RolesCommand {
    List,
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand)]
enum CurrenciesCommand {
    List,
    Add {
        /// Three-letter ISO code
        code: String,
        name: String,
        #[arg(long)]
        symbol: Option<String>,
        /// Mark as the reference currency for rates
        #[arg(long)]
        base: bool,
    },
}

#[derive(Subcommand)]
enum CountriesCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        code: String,
        /// ISO code of the local currency
        #[arg(long)]
        currency: String,
    },
}

#[derive(Subcommand)]
enum RatesCommand {
    /// Record 1 ORIGIN = RATE DESTINATION on DATE
    Add {
        origin: String,
        destination: String,
        rate: Decimal,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Rate in effect on a date (default today)
    Get {
        origin: String,
        destination: String,
        #[arg(long)]
        on: Option<NaiveDate>,
    },
    /// Convert an amount with the rate in effect on a date (default today)
    Convert {
        amount: Decimal,
        origin: String,
        destination: String,
        #[arg(long)]
        on: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum SubsidiariesCommand {
    List,
    Add {
        legal_name: String,
        #[arg(long)]
        tax_id: String,
        #[arg(long)]
        activity: String,
        #[arg(long)]
        regime: String,
        #[arg(long)]
        country_id: i64,
    },
}

#[derive(Subcommand)]
enum QualificationsCommand {
    /// Qualifications of one subsidiary, latest period first
    List { subsidiary_id: i64 },
    Add {
        subsidiary_id: i64,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        status: String,
    },
    Update {
        id: i64,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        status: String,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print `items` as JSON, or one formatted line per item.
fn print_list<T: Serialize>(json: bool, items: &[T], line: impl Fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        return print_json(items);
    }
    for item in items {
        println!("{}", line(item));
    }
    Ok(())
}

fn resolve_caller(
    cli: &Cli,
    db: &RecordDb,
    hasher: &Argon2Hasher,
    config: &Config,
) -> anyhow::Result<Caller> {
    let Some(email) = cli.email.as_deref() else {
        bail!("--email (or TAXRECORDS_EMAIL) is required");
    };
    let Some(secret) = cli.secret.as_deref() else {
        bail!("TAXRECORDS_SECRET is not set");
    };
    Ok(authenticate(db, hasher, config, email, secret)?)
}

fn run_init(
    cli: &Cli,
    db: &RecordDb,
    hasher: &Argon2Hasher,
    config: &Config,
    args: &InitArgs,
) -> anyhow::Result<()> {
    let secret = cli.secret.clone().unwrap_or_default();
    let report = setup::bootstrap(
        db,
        hasher,
        config,
        &setup::Bootstrap {
            admin_name: args.admin_name.clone(),
            admin_surname: args.admin_surname.clone(),
            admin_email: args.admin_email.clone(),
            admin_secret: secret,
            currency_code: args.currency.clone(),
            currency_name: args.currency_name.clone(),
            country_name: args.country.clone(),
            country_code: args.country_code.clone(),
        },
        Utc::now(),
    )?;

    if cli.json {
        return print_json(&report);
    }
    for role in &report.roles_created {
        println!("Created role {}", role);
    }
    match report.admin_user_id {
        Some(id) => println!("Created administrator {} (id {})", args.admin_email, id),
        None => println!("Users already exist; no administrator created"),
    }
    Ok(())
}

fn run_import(
    cli: &Cli,
    db: &RecordDb,
    hasher: &Argon2Hasher,
    config: &Config,
    caller: &Caller,
    file: &Path,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file name: {}", file.display()))?;

    let archive_dir = config.archive_dir()?;
    let report = Importer::new(db, hasher)
        .with_archive_dir(archive_dir.clone())
        .run_import(caller, filename, &bytes)?;
    prune_archives(&archive_dir, config.archive_retention_days);

    if cli.json {
        return print_json(&report);
    }
    println!("{}", report.summary(config.error_summary_limit));
    Ok(())
}

fn run_users(
    cli: &Cli,
    db: &RecordDb,
    hasher: &Argon2Hasher,
    config: &Config,
    caller: &Caller,
    command: &UsersCommand,
) -> anyhow::Result<()> {
    match command {
        UsersCommand::List => {
            let listing = users::list_users(db, caller)?;
            print_list(cli.json, &listing, |u| {
                format!(
                    "{}\t{}\t{}\t{}\t{}",
                    u.user.id,
                    u.user,
                    u.role_name,
                    u.country_name,
                    if u.user.is_active { "active" } else { "inactive" }
                )
            })
        }
        UsersCommand::Create {
            name,
            surname,
            user_email,
            phone,
            age,
            role_id,
            country_id,
            new_secret,
            inactive,
        } => {
            let form = users::UserForm {
                name: name.clone(),
                surname: surname.clone(),
                age: *age,
                email: user_email.clone(),
                phone: phone.clone(),
                secret: new_secret.clone(),
                secret_confirmation: new_secret.clone(),
                is_active: !inactive,
                role_id: *role_id,
                country_id: *country_id,
            };
            let id = users::create_user(db, hasher, caller, &form, Utc::now())?;
            println!("Created user {}", id);
            Ok(())
        }
        UsersCommand::Delete { id } => {
            users::delete_user(db, caller, *id)?;
            println!("Deleted user {}", id);
            Ok(())
        }
        UsersCommand::Stats => {
            let stats = users::user_stats(db, caller, config, Utc::now())?;
            if cli.json {
                return print_json(&stats);
            }
            println!(
                "{} users, {} created in the last {} days, {} active",
                stats.total, stats.recent, config.recent_window_days, stats.active
            );
            Ok(())
        }
        UsersCommand::History { id } => {
            let history = users::user_history(db, caller, *id)?;
            print_list(cli.json, &history, |h| {
                format!(
                    "{}\t{} {} <{}>",
                    h.modified_at, h.name, h.surname, h.email
                )
            })
        }
        UsersCommand::ChangeSecret { new_secret } => {
            let current = cli.secret.as_deref().unwrap_or_default();
            users::change_own_secret(db, hasher, caller, current, new_secret, new_secret)?;
            println!("Secret changed");
            Ok(())
        }
    }
}

fn run_roles(cli: &Cli, db: &RecordDb, caller: &Caller, command: &RolesCommand) -> anyhow::Result<()> {
    match command {
        RolesCommand::List => {
            let roles = reference::list_roles(db, caller)?;
            print_list(cli.json, &roles, |r| format!("{}\t{}\t{}", r.id, r.name, r.description))
        }
        RolesCommand::Add { name, description } => {
            let id = reference::add_role(db, caller, name, description)?;
            println!("Created role {} (id {})", name, id);
            Ok(())
        }
    }
}

fn run_currencies(
    cli: &Cli,
    db: &RecordDb,
    caller: &Caller,
    command: &CurrenciesCommand,
) -> anyhow::Result<()> {
    match command {
        CurrenciesCommand::List => {
            let currencies = reference::list_currencies(db, caller)?;
            print_list(cli.json, &currencies, |c| {
                format!(
                    "{}\t{}\t{}{}",
                    c.iso_code,
                    c.name,
                    c.symbol.as_deref().unwrap_or(""),
                    if c.is_base { "\tbase" } else { "" }
                )
            })
        }
        CurrenciesCommand::Add {
            code,
            name,
            symbol,
            base,
        } => {
            let id = reference::add_currency(db, caller, code, name, symbol.as_deref(), *base)?;
            println!("Created currency {} (id {})", code.to_uppercase(), id);
            Ok(())
        }
    }
}

fn run_countries(
    cli: &Cli,
    db: &RecordDb,
    caller: &Caller,
    command: &CountriesCommand,
) -> anyhow::Result<()> {
    match command {
        CountriesCommand::List => {
            let countries = reference::list_countries(db, caller)?;
            print_list(cli.json, &countries, |c| format!("{}\t{}\t{}", c.id, c.iso_code, c.name))
        }
        CountriesCommand::Add {
            name,
            code,
            currency,
        } => {
            let id = reference::add_country(db, caller, name, code, currency)?;
            println!("Created country {} (id {})", name, id);
            Ok(())
        }
    }
}

fn run_rates(cli: &Cli, db: &RecordDb, caller: &Caller, command: &RatesCommand) -> anyhow::Result<()> {
    match command {
        RatesCommand::Add {
            origin,
            destination,
            rate,
            date,
        } => {
            reference::add_exchange_rate(db, caller, origin, destination, *date, *rate)?;
            println!("Recorded 1 {} = {} {} on {}", origin, rate, destination, date);
            Ok(())
        }
        RatesCommand::Get {
            origin,
            destination,
            on,
        } => {
            let on = on.unwrap_or_else(|| Utc::now().date_naive());
            match reference::exchange_rate_on(db, caller, origin, destination, on)? {
                Some(rate) if cli.json => print_json(&rate),
                Some(rate) => {
                    println!("1 {} = {} {} (since {})", origin, rate.rate, destination, rate.rate_date);
                    Ok(())
                }
                None => bail!("No {}/{} rate on or before {}", origin, destination, on),
            }
        }
        RatesCommand::Convert {
            amount,
            origin,
            destination,
            on,
        } => {
            let on = on.unwrap_or_else(|| Utc::now().date_naive());
            match reference::convert_amount(db, caller, *amount, origin, destination, on)? {
                Some(converted) => {
                    println!("{} {} = {} {}", amount, origin, converted, destination);
                    Ok(())
                }
                None => bail!("No {}/{} rate on or before {}", origin, destination, on),
            }
        }
    }
}

fn run_subsidiaries(
    cli: &Cli,
    db: &RecordDb,
    caller: &Caller,
    command: &SubsidiariesCommand,
) -> anyhow::Result<()> {
    match command {
        SubsidiariesCommand::List => {
            let subsidiaries = tax::list_subsidiaries(db, caller)?;
            print_list(cli.json, &subsidiaries, |s| {
                format!("{}\t{}\t{}\t{}", s.id, s.legal_name, s.tax_id, s.tax_regime)
            })
        }
        SubsidiariesCommand::Add {
            legal_name,
            tax_id,
            activity,
            regime,
            country_id,
        } => {
            let id = tax::add_subsidiary(
                db,
                caller,
                &NewSubsidiary {
                    legal_name: legal_name.clone(),
                    tax_id: tax_id.clone(),
                    main_activity: activity.clone(),
                    tax_regime: regime.clone(),
                    country_id: *country_id,
                },
            )?;
            println!("Created subsidiary {} (id {})", legal_name, id);
            Ok(())
        }
    }
}

fn run_qualifications(
    cli: &Cli,
    db: &RecordDb,
    caller: &Caller,
    command: &QualificationsCommand,
) -> anyhow::Result<()> {
    match command {
        QualificationsCommand::List { subsidiary_id } => {
            let qualifications = tax::list_tax_qualifications(db, caller, *subsidiary_id)?;
            print_list(cli.json, &qualifications, |q| {
                format!(
                    "{}\t{}..{}\t{}\t{}",
                    q.id, q.period_start, q.period_end, q.tax_amount, q.status
                )
            })
        }
        QualificationsCommand::Add {
            subsidiary_id,
            start,
            end,
            amount,
            status,
        } => {
            let id = tax::add_tax_qualification(
                db,
                caller,
                *subsidiary_id,
                *start,
                *end,
                *amount,
                status,
            )?;
            println!("Created qualification {}", id);
            Ok(())
        }
        QualificationsCommand::Update {
            id,
            end,
            amount,
            status,
        } => {
            let updated = tax::update_tax_qualification(db, caller, *id, *end, *amount, status)?;
            if cli.json {
                return print_json(&updated);
            }
            println!("Updated qualification {}", updated.id);
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .map_err(|e| anyhow!("Failed to load config: {e}"))?;

    let db = RecordDb::open(&config).context("Failed to open database")?;
    let hasher = Argon2Hasher::default();

    let caller = || resolve_caller(&cli, &db, &hasher, &config);
    match &cli.command {
        Commands::Init(args) => run_init(&cli, &db, &hasher, &config, args),
        Commands::Import { file } => run_import(&cli, &db, &hasher, &config, &caller()?, file),
        Commands::History { limit } => {
            caller()?.require(Operation::ReadRecords)?;
            let audits = db.list_import_audits(*limit)?;
            print_list(cli.json, &audits, |a| {
                format!(
                    "{}\t{}\t{}\t{}\t{} rows, {} created, {} errors",
                    a.id,
                    a.uploaded_at,
                    a.status,
                    a.filename,
                    a.row_count,
                    a.imported_count,
                    a.error_count
                )
            })
        }
        Commands::Users(command) => run_users(&cli, &db, &hasher, &config, &caller()?, command),
        Commands::Roles(command) => run_roles(&cli, &db, &caller()?, command),
        Commands::Currencies(command) => run_currencies(&cli, &db, &caller()?, command),
        Commands::Countries(command) => run_countries(&cli, &db, &caller()?, command),
        Commands::Rates(command) => run_rates(&cli, &db, &caller()?, command),
        Commands::Subsidiaries(command) => run_subsidiaries(&cli, &db, &caller()?, command),
        Commands::Qualifications(command) => run_qualifications(&cli, &db, &caller()?, command),
    }
}
