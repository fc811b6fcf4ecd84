//! Live view of one resource in the terminal.

use agrisync_core::{ConnectionState, Resource, Scope, SubscriptionManager};
use chrono::Local;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;

use super::resource::{print_records, with_resource, ResourceArg};
use super::{connect, runtime, CommandError, OutputFormat};
use crate::config::Config;

/// Watch a resource and print every change until interrupted
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Resource to watch
    #[arg(value_enum)]
    resource: ResourceArg,

    /// Owner filter, e.g. owner_id=U1 (defaults to the configured user)
    #[arg(long, short)]
    scope: Option<Scope>,

    /// Print the full record list on every change
    #[arg(long)]
    full: bool,

    /// Print the recent event log on exit
    #[arg(long)]
    events: bool,

    /// Output format for record lists
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl WatchCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let scope = self.resource.resolve_scope(self.scope.as_ref(), config)?;
        let rt = runtime()?;

        rt.block_on(async {
            let manager = connect(config)?;
            let result = with_resource!(self.resource, R => self.watch::<R>(&manager, scope).await);

            if self.events {
                println!();
                println!("Recent events");
                println!("=============");
                for entry in manager.recent_events() {
                    println!("  {}", entry);
                }
            }
            manager.shutdown().await;
            result
        })
    }

    async fn watch<R: Resource>(
        &self,
        manager: &SubscriptionManager,
        scope: Scope,
    ) -> Result<(), CommandError> {
        let mut view = manager.view::<R>(scope);
        let mut notices = manager.notices();
        let mut connection = manager.connection();
        let mut previous = *connection.borrow_and_update();
        let mut monitoring = true;

        println!("Watching {} (Ctrl-C to stop)", view.key());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    println!("Stopped.");
                    return Ok(());
                }
                snapshot = view.changed() => {
                    let Some(snapshot) = snapshot else {
                        return Ok(());
                    };
                    println!(
                        "[{}] v{}: {} record{}",
                        Local::now().format("%H:%M:%S"),
                        snapshot.version(),
                        snapshot.len(),
                        if snapshot.len() == 1 { "" } else { "s" }
                    );
                    if self.full || snapshot.version() == 1 {
                        print_records(snapshot.records(), self.format)?;
                    }
                }
                notice = notices.recv() => match notice {
                    Ok(notice) => println!("{}", notice),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Notice receiver lagged");
                    }
                    Err(RecvError::Closed) => {}
                },
                changed = connection.changed(), if monitoring => {
                    if changed.is_err() {
                        monitoring = false;
                        continue;
                    }
                    let state = *connection.borrow_and_update();
                    print_transition(previous, state);
                    previous = state;
                }
            }
        }
    }
}

fn print_transition(previous: ConnectionState, state: ConnectionState) {
    match state {
        ConnectionState::Reconnecting { attempt } => {
            println!("⚠ Connection lost. Reconnecting (attempt {})...", attempt);
        }
        ConnectionState::Connected if !previous.is_connected() => {
            println!("✓ Reconnected");
        }
        ConnectionState::Connected => {}
        ConnectionState::Disconnected => {
            println!("✗ Disconnected. Showing last known data.");
        }
    }
}
