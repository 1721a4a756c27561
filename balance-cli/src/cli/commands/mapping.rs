//! Operator label overrides

use anyhow::Result;
use colored::*;

use crate::balance::CategoryCode;
use crate::cli::{MappingCommands, open_pool};
use crate::config::Config;
use crate::config::repository::mappings;

pub async fn handle_mapping_command(command: MappingCommands, config: &Config) -> Result<()> {
    let pool = open_pool(config).await?;

    match command {
        MappingCommands::List => {
            let overrides = mappings::list_label_mappings(&pool).await?;
            if overrides.is_empty() {
                println!("No label overrides");
            }
            for (label, category) in overrides {
                println!("{} -> {}", label.cyan(), category.code().bright_green());
            }
        }
        MappingCommands::Set { label, category } => {
            let category = parse_category(&category)?;
            let normalized = mappings::set_label_mapping(&pool, &label, category).await?;
            println!(
                "Mapped {} -> {}",
                normalized.cyan(),
                category.code().bright_green().bold()
            );
        }
        MappingCommands::Delete { label } => {
            if mappings::delete_label_mapping(&pool, &label).await? {
                println!("Removed override for {}", label.cyan());
            } else {
                anyhow::bail!("No override for label '{}'", label);
            }
        }
    }
    Ok(())
}

fn parse_category(code: &str) -> Result<CategoryCode> {
    CategoryCode::from_code(&code.trim().to_uppercase()).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown category '{}' (expected REGULADOS, LIBRES, COES_SPOT, PERDIDAS or SERVICIOS_AUX)",
            code
        )
    })
}
