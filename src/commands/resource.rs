//! Resource selection shared by `watch` and `fetch`.

use agrisync_core::{Resource, Scope};
use clap::ValueEnum;

use super::{CommandError, OutputFormat};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceArg {
    Farms,
    Crops,
    Credits,
    CreditTransactions,
    FinancialRecords,
    Activities,
    Notifications,
}

impl ResourceArg {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceArg::Farms => "farms",
            ResourceArg::Crops => "crops",
            ResourceArg::Credits => "credits",
            ResourceArg::CreditTransactions => "credit_transactions",
            ResourceArg::FinancialRecords => "financial_records",
            ResourceArg::Activities => "farm_activities",
            ResourceArg::Notifications => "notifications",
        }
    }

    /// Column holding the signed-in user for resources owned per user.
    /// Farm-level resources have none and need an explicit scope.
    fn user_column(&self) -> Option<&'static str> {
        match self {
            ResourceArg::Farms => Some("owner_id"),
            ResourceArg::Activities | ResourceArg::Notifications => Some("user_id"),
            ResourceArg::Crops
            | ResourceArg::Credits
            | ResourceArg::CreditTransactions
            | ResourceArg::FinancialRecords => None,
        }
    }

    /// Explicit scope, else the configured user on the resource's user column.
    pub fn resolve_scope(&self, scope: Option<&Scope>, config: &Config) -> Result<Scope, CommandError> {
        if let Some(scope) = scope {
            return Ok(scope.clone());
        }
        self.user_column()
            .zip(config.user_id.value.as_ref())
            .map(|(column, user)| Scope::new(column, user.clone()))
            .ok_or(CommandError::MissingScope(self.name()))
    }
}

/// Runs `$body` with `$r` bound to the record type of a [`ResourceArg`].
macro_rules! with_resource {
    ($arg:expr, $r:ident => $body:expr) => {
        match $arg {
            ResourceArg::Farms => {
                type $r = agrisync_core::Farm;
                $body
            }
            ResourceArg::Crops => {
                type $r = agrisync_core::Crop;
                $body
            }
            ResourceArg::Credits => {
                type $r = agrisync_core::Credit;
                $body
            }
            ResourceArg::CreditTransactions => {
                type $r = agrisync_core::CreditTransaction;
                $body
            }
            ResourceArg::FinancialRecords => {
                type $r = agrisync_core::FinancialRecord;
                $body
            }
            ResourceArg::Activities => {
                type $r = agrisync_core::FarmActivity;
                $body
            }
            ResourceArg::Notifications => {
                type $r = agrisync_core::Notification;
                $body
            }
        }
    };
}

pub(crate) use with_resource;

/// Prints records one per line (text) or as a JSON array.
pub fn print_records<R: Resource>(records: &[R], format: OutputFormat) -> Result<(), CommandError> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
        OutputFormat::Text => {
            if records.is_empty() {
                println!("  (no records)");
            }
            for record in records {
                let mut fields = serde_json::to_value(record)?;
                if let Some(object) = fields.as_object_mut() {
                    object.remove("id");
                }
                println!("  {}  {}", record.key(), fields);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, ConfigValue};
    use tempfile::tempdir;

    fn config_with_user(user: Option<&str>) -> Config {
        let temp_dir = tempdir().unwrap();
        let mut config = Config::load(Some(temp_dir.path().join("none.yaml"))).unwrap();
        config.user_id = ConfigValue::new(user.map(str::to_string), ConfigSource::File);
        config
    }

    #[test]
    fn test_explicit_scope_wins() {
        let config = config_with_user(Some("U1"));
        let scope = Scope::farm("F1");
        assert_eq!(
            ResourceArg::Farms.resolve_scope(Some(&scope), &config).unwrap(),
            scope
        );
    }

    #[test]
    fn test_user_scope_from_config() {
        let config = config_with_user(Some("U1"));
        assert_eq!(
            ResourceArg::Farms.resolve_scope(None, &config).unwrap(),
            Scope::owner("U1")
        );
        assert_eq!(
            ResourceArg::Notifications.resolve_scope(None, &config).unwrap(),
            Scope::user("U1")
        );
    }

    #[test]
    fn test_farm_level_resource_needs_scope() {
        let config = config_with_user(Some("U1"));
        let err = ResourceArg::Crops.resolve_scope(None, &config).unwrap_err();
        assert!(err.to_string().contains("crops"));

        let anonymous = config_with_user(None);
        assert!(ResourceArg::Farms.resolve_scope(None, &anonymous).is_err());
    }

    #[test]
    fn test_names_match_tables() {
        with_resource!(ResourceArg::Activities, R => {
            assert_eq!(ResourceArg::Activities.name(), <R as Resource>::TABLE);
        });
        with_resource!(ResourceArg::CreditTransactions, R => {
            assert_eq!(ResourceArg::CreditTransactions.name(), <R as Resource>::TABLE);
        });
    }
}
