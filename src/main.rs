use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use portico::{
    config::{loader, models::GatewayFileConfig},
    core::{Gateway, GatewayBuilder},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = loader::DEFAULT_CONFIG_PATH)]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a configuration file
    Validate {
        #[clap(short, long, default_value = loader::DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Write a starter configuration file
    Init {
        #[clap(short, long, default_value = loader::DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = loader::DEFAULT_CONFIG_PATH)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_config_command(&config_path),
        "init" => return init_config_command(&config_path),
        _ => {}
    }

    let config = loader::load_config(&config_path)
        .wrap_err_with(|| format!("loading config from {config_path}"))?;

    let disabled = config
        .logger_config
        .as_ref()
        .map(|l| l.disabled_loggers.clone())
        .unwrap_or_default();
    if config.production_level.unwrap_or(1) != 0 {
        tracing_setup::init_tracing(&disabled)?;
    } else {
        tracing_setup::init_console_tracing(&disabled)?;
    }

    let gateway: Gateway = GatewayBuilder::from_file_config(&config).build();
    Arc::new(gateway).start().await
}

fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config: GatewayFileConfig = match loader::load_config(config_path) {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(err) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {err}");
            std::process::exit(1);
        }
    };

    println!();
    println!("Configuration summary:");
    println!("   - Listen port: {}", config.address);
    println!("   - Services: {}", config.services.len());
    println!(
        "   - gRPC proxy: {}",
        config
            .grpc_proxy
            .as_ref()
            .map(|g| g.address.to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!(
        "   - Health check interval: {}",
        if config.health_check_interval.is_empty() {
            "default"
        } else {
            &config.health_check_interval
        }
    );
    Ok(())
}

fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let starter = r#"{
    "address": 8000,
    "middlewaresEnabled": 1,
    "productionLevel": 1,
    "secretKey": "change-me",
    "healthCheckInterval": "2m",
    "services": [
        {
            "serviceType": 0,
            "name": "example",
            "prefix": "/api/example",
            "protocol": "http",
            "host": "127.0.0.1",
            "port": "3000",
            "timeOutSec": 3,
            "statusPath": "/api/status/health-check"
        }
    ]
}
"#;

    std::fs::write(path, starter).wrap_err("writing starter config")?;
    println!("Created configuration at: {config_path}");
    println!("   Run 'portico serve --config {config_path}' to start the gateway");
    Ok(())
}
