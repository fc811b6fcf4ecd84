//! One-shot read of a resource.

use agrisync_core::{Resource, Scope, SubscriptionManager};
use clap::Args;

use super::resource::{print_records, with_resource, ResourceArg};
use super::{connect, runtime, CommandError, OutputFormat};
use crate::config::Config;

/// Fetch the current records of a resource
#[derive(Debug, Args)]
pub struct FetchCommand {
    /// Resource to fetch
    #[arg(value_enum)]
    resource: ResourceArg,

    /// Owner filter, e.g. farm_id=F1 (defaults to the configured user)
    #[arg(long, short)]
    scope: Option<Scope>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl FetchCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let scope = self.resource.resolve_scope(self.scope.as_ref(), config)?;
        let rt = runtime()?;

        rt.block_on(async {
            let manager = connect(config)?;
            let result = with_resource!(self.resource, R => self.fetch::<R>(&manager, scope).await);
            manager.shutdown().await;
            result
        })
    }

    async fn fetch<R: Resource>(
        &self,
        manager: &SubscriptionManager,
        scope: Scope,
    ) -> Result<(), CommandError> {
        let snapshot = manager.fetch::<R>(scope.clone(), false).await?;

        if matches!(self.format, OutputFormat::Text) {
            println!(
                "{} [{}]: {} record{}",
                R::TABLE,
                scope,
                snapshot.len(),
                if snapshot.len() == 1 { "" } else { "s" }
            );
        }
        print_records(snapshot.records(), self.format)
    }
}
