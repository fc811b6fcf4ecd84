//! Backend configuration and reachability.

use agrisync_core::{QueryClient, RestClient};
use clap::Args;

use super::{runtime, CommandError};
use crate::config::Config;

/// Show backend configuration and connection status
#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let rt = runtime()?;
        rt.block_on(self.status(config))
    }

    async fn status(&self, config: &Config) -> Result<(), CommandError> {
        println!("Backend Configuration");
        println!("=====================");
        println!();

        let (url, api_key) = match (&config.backend.url, &config.backend.api_key) {
            (Some(url), Some(key)) => (url, key),
            _ => {
                println!("Status: Not configured");
                println!();
                println!("To connect, add to your config file:");
                println!();
                println!("  backend:");
                println!("    url: \"https://<project>.example.co\"");
                println!("    api_key: \"<anon key>\"");
                println!();
                println!("Or set environment variables:");
                println!("  AGRISYNC_URL, AGRISYNC_API_KEY");
                return Ok(());
            }
        };

        let settings = config.sync.to_settings();
        println!("Backend:   {}", url);
        match &config.user_id.value {
            Some(user) => println!("User:      {}", user),
            None => println!("User:      (not set)"),
        }
        println!(
            "Ping:      every {}s on '{}'",
            settings.ping_interval.as_secs(),
            config.backend.ping_table
        );
        println!(
            "Backoff:   {}ms doubling, capped at {}s, {}",
            settings.backoff_base.as_millis(),
            settings.backoff_cap.as_secs(),
            match settings.max_reconnect_attempts {
                Some(max) => format!("give up after {} attempts", max),
                None => "retry forever".to_string(),
            }
        );
        println!("Cache:     {}s freshness window", settings.freshness_window.as_secs());
        println!();

        print!("Backend status: ");
        let client = RestClient::new(url.clone(), api_key.clone())
            .with_ping_table(config.backend.ping_table.clone());
        match client.ping().await {
            Ok(()) => println!("✓ reachable"),
            Err(e) => println!("✗ unreachable ({})", e),
        }

        Ok(())
    }
}
