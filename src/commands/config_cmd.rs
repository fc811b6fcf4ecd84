use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# agrisync configuration

# Signed-in user; default scope for farms, activities and notifications
# user_id: "<user uuid>"

backend:
  # url: "https://<project>.example.co"
  # api_key: "<anon key>"
  ping_table: profiles

sync:
  freshness_window_secs: 30
  ping_interval_secs: 30
  backoff_base_ms: 1000
  backoff_cap_secs: 30
  # Stop reconnecting after this many failures (default: retry forever)
  # max_reconnect_attempts: 10
  refresh_interval_secs: 120
  event_queue_capacity: 256
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "user_id: {}",
                            config.user_id.value.as_deref().unwrap_or("(not set)")
                        );
                        println!("  source: {}", config.user_id.source);
                        println!();

                        println!("log_filter: {}", config.log_filter.value);
                        println!("  source: {}", config.log_filter.source);
                        println!();

                        println!(
                            "backend.url: {}",
                            config.backend.url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "backend.api_key: {}",
                            if config.backend.api_key.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!();

                        println!("sync: {}", serde_json::to_string(&config.sync)?);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = config_path.unwrap_or_else(Config::default_config_path);

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'agrisync config show' to view current configuration.");
                    return Ok(());
                }

                // Create parent directory
                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}
