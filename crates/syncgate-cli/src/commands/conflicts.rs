//! Conflict record commands

use anyhow::{anyhow, Result};
use clap::Subcommand;
use syncgate_core::{ConflictId, ConflictStatus, GatewayConfig};

use super::common::{open_gateway, print_json};

#[derive(Subcommand)]
pub enum ConflictsCommand {
    /// List conflict records, oldest first
    List {
        /// Include resolved records
        #[arg(long)]
        all: bool,
    },

    /// Mark a conflict resolved
    Resolve {
        /// Conflict id
        id: String,
    },
}

pub async fn handle_conflicts_command(cmd: ConflictsCommand, config: GatewayConfig) -> Result<()> {
    let gateway = open_gateway(config, false).await?;
    match cmd {
        ConflictsCommand::List { all } => {
            let filter = (!all).then_some(ConflictStatus::Unresolved);
            print_json(&gateway.conflicts(filter).await?)
        }
        ConflictsCommand::Resolve { id } => {
            let id = ConflictId::parse(&id).ok_or_else(|| anyhow!("malformed conflict id '{id}'"))?;
            print_json(&gateway.resolve_conflict(&id).await?)
        }
    }
}
