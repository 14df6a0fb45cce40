use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rds_iam_wrapper::adapters::aws::profile_utils::read_aws_profiles_from_home;
use rds_iam_wrapper::adapters::config::file_store::TomlFileConfigAdapter;
use rds_iam_wrapper::config::{self, models::AppConfig, models::LogFormat, models::LoggingConfig};
use rds_iam_wrapper::core::types::ConnectionProperties;
use rds_iam_wrapper::ports::ConfigurationStore;
use rds_iam_wrapper::{AppContext, InterceptedConnection};
use serde_json::json;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    #[clap(long, global = true, help = "Path to the TOML configuration file")]
    config: Option<PathBuf>,

    #[clap(
        long,
        global = true,
        help = "Log filter, overrides the configured level (RUST_LOG still wins)"
    )]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an auth token for a wrapper URL
    Token {
        url: String,
        #[clap(short = 'p', long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
        #[clap(long, action)]
        json: bool,
    },
    /// Show the delegate URL and properties a wrapper URL turns into
    Rewrite {
        url: String,
        #[clap(short = 'p', long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
        #[clap(long, action, help = "Print the token instead of hiding it")]
        show_password: bool,
        #[clap(long, action)]
        json: bool,
    },
    /// Resolve AWS credentials through the configured chain
    Credentials {
        #[clap(long)]
        profile: Option<String>,
    },
    /// List profiles found in the AWS shared config files
    Profiles,
    /// Write a configuration file with default values
    InitConfig {
        #[clap(long, action)]
        force: bool,
    },
}

fn init_logger_cli(logging_config: &LoggingConfig, terminal_colors_enabled: bool) {
    let env_filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| logging_config.level.clone());
    let env_filter = EnvFilter::try_new(&env_filter_str).unwrap_or_else(|e| {
        eprintln!(
            "[LOGGER WARN] Failed to parse RUST_LOG/config log level '{env_filter_str}': {e}. Defaulting to 'warn'."
        );
        EnvFilter::new("warn")
    });

    let subscriber_builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_writer(std::io::stderr);

    match logging_config.format {
        LogFormat::Pretty => {
            let pretty_fmt = subscriber_builder
                .pretty()
                .with_ansi(terminal_colors_enabled);
            let _ = tracing::subscriber::set_global_default(pretty_fmt.finish());
        }
        LogFormat::Json => {
            let _ = tracing::subscriber::set_global_default(subscriber_builder.json().finish());
        }
        LogFormat::Compact => {
            let _ = tracing::subscriber::set_global_default(
                subscriber_builder
                    .compact()
                    .with_ansi(terminal_colors_enabled)
                    .finish(),
            );
        }
    }
    tracing::debug!(
        "CLI logger initialized with filter '{}' and format '{:?}'",
        env_filter_str,
        logging_config.format
    );
}

fn parse_properties(pairs: &[String]) -> anyhow::Result<ConnectionProperties> {
    let mut properties = ConnectionProperties::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid property '{pair}', expected KEY=VALUE");
        };
        properties.set(key.trim(), value);
    }
    Ok(properties)
}

fn print_rewrite(connection: &InterceptedConnection, show_password: bool, as_json: bool) {
    let properties = if show_password {
        connection.properties.clone()
    } else {
        connection.properties.redacted()
    };
    if as_json {
        let output = json!({
            "identity": connection.identity,
            "delegate_url": connection.delegate_url,
            "delegate_driver": connection.delegate_driver,
            "properties": properties,
            "token_expires_at": connection.token.expires_at(),
        });
        println!("{output:#}");
        return;
    }
    println!("identity:     {}", connection.identity);
    println!("delegate url: {}", connection.delegate_url);
    if let Some(driver) = &connection.delegate_driver {
        println!("driver:       {driver}");
    }
    println!("expires at:   {}", connection.token.expires_at());
    println!("properties:");
    for (key, value) in properties.iter() {
        println!("  {key} = {value}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();

    let config_path = match cli_args.config.clone() {
        Some(path) => path,
        None => config::find_config_file()?,
    };
    let config_store = TomlFileConfigAdapter::new();

    let app_config = match &cli_args.command {
        Command::InitConfig { .. } => AppConfig::default(),
        _ => config_store
            .load_app_config_file(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?,
    };

    let mut logging_config = app_config.logging.clone();
    if let Some(level) = &cli_args.log_level {
        logging_config.level = level.clone();
    }
    init_logger_cli(&logging_config, std::io::stderr().is_terminal());
    info!("Using configuration {}", config_path.display());

    let credentials_file = app_config.credentials.credentials_file.clone();
    let context = AppContext::from_config(app_config)?;

    match cli_args.command {
        Command::Token {
            url,
            properties,
            json,
        } => {
            let properties = parse_properties(&properties)?;
            let connection = context.interceptor().intercept(&url, &properties).await?;
            if json {
                let output = json!({
                    "identity": connection.identity,
                    "token": connection.token.value(),
                    "issued_at": connection.token.issued_at(),
                    "expires_at": connection.token.expires_at(),
                });
                println!("{output:#}");
            } else {
                println!("{}", connection.token.value());
            }
        }
        Command::Rewrite {
            url,
            properties,
            show_password,
            json,
        } => {
            let properties = parse_properties(&properties)?;
            let connection = context.interceptor().intercept(&url, &properties).await?;
            print_rewrite(&connection, show_password, json);
        }
        Command::Credentials { profile } => {
            let resolved = context
                .resolver()
                .resolve_for_profile(profile.as_deref())
                .await?;
            println!("source:        {}", resolved.source_name);
            println!("access key id: {}", resolved.credentials.access_key_id());
            println!(
                "session token: {}",
                if resolved.credentials.session_token().is_some() {
                    "yes"
                } else {
                    "no"
                }
            );
            match resolved.expiry_time() {
                Some(expiry) => println!("expires at:    {expiry}"),
                None => println!("expires at:    never"),
            }
        }
        Command::Profiles => {
            let profiles = read_aws_profiles_from_home(credentials_file.as_deref())?;
            if profiles.is_empty() {
                println!("No profiles found.");
            }
            for profile in profiles {
                println!("{profile}");
            }
        }
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                bail!(
                    "Configuration file {} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            config_store.save_app_config_file(context.config(), &config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}
