//! Queue inspection commands

use anyhow::{anyhow, Result};
use clap::{Subcommand, ValueEnum};
use syncgate_core::{GatewayConfig, OperationId, OperationStatus};

use super::common::{open_gateway, print_json};

/// Lifecycle state filter
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Pending,
    InFlight,
    Completed,
    FailedPermanent,
}

impl From<StatusFilter> for OperationStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => OperationStatus::Pending,
            StatusFilter::InFlight => OperationStatus::InFlight,
            StatusFilter::Completed => OperationStatus::Completed,
            StatusFilter::FailedPermanent => OperationStatus::FailedPermanent,
        }
    }
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// List operations in delivery order
    List {
        /// Status to list
        #[arg(long, value_enum, default_value = "pending")]
        status: StatusFilter,
    },

    /// Show one operation
    Show {
        /// Operation id
        id: String,
    },

    /// Cancel a pending operation
    Cancel {
        /// Operation id
        id: String,
    },
}

fn parse_id(raw: &str) -> Result<OperationId> {
    OperationId::parse(raw).ok_or_else(|| anyhow!("malformed operation id '{raw}'"))
}

pub async fn handle_queue_command(cmd: QueueCommand, config: GatewayConfig) -> Result<()> {
    // Queue commands never touch the network.
    let gateway = open_gateway(config, false).await?;
    match cmd {
        QueueCommand::List { status } => {
            let ops = gateway.operations_with_status(status.into()).await?;
            print_json(&ops)
        }
        QueueCommand::Show { id } => {
            let op = gateway.operation(&parse_id(&id)?).await?;
            print_json(&op)
        }
        QueueCommand::Cancel { id } => {
            let op = gateway.cancel(&parse_id(&id)?).await?;
            print_json(&op)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_id() {
        assert!(parse_id("not-an-id").is_err());
        let id = OperationId::from_parts(1_700_000_000_000, 42);
        assert_eq!(parse_id(id.as_str()).unwrap(), id);
    }
}
