//! Configuration display commands

use colored::Colorize;

use stockdash_net::Result;
use stockdash_net::error::ConfigError;

use crate::cli::OutputFormat;
use crate::cli::args::GlobalOptions;
use crate::output::json::format_json;

/// Print the effective configuration (file values plus overrides)
pub fn show(opts: &GlobalOptions) -> Result<()> {
    let config = opts.load_config()?;

    match opts.format {
        OutputFormat::Json => println!("{}", format_json(&config)?),
        _ => {
            let yaml = serde_yaml::to_string(&config)
                .map_err(|e| ConfigError::SaveError(e.to_string()))?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

/// Print the config file location and whether it exists
pub fn path(opts: &GlobalOptions) -> Result<()> {
    let path = opts.config_path()?;

    match opts.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": path.display().to_string(),
                "exists": path.exists(),
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            println!("{}", path.display());
            if !path.exists() {
                eprintln!("{}", "(not created yet, defaults in use)".dimmed());
            }
        }
    }
    Ok(())
}
