//! Lists the action table the agent serves

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ksagent_core::{ActionRegistry, MemoryCluster, build_registry};

/// Arguments for the actions command
#[derive(Args, Debug)]
pub struct ActionsArgs {
    /// Only show this resource kind
    #[arg(long)]
    pub kind: Option<String>,
}

pub fn run(args: ActionsArgs) -> Result<()> {
    // Handlers are never invoked here; the table does not depend on the cluster
    let registry = build_registry(Arc::new(MemoryCluster::new()))?;
    let rows = action_rows(&registry, args.kind.as_deref());

    if rows.is_empty() {
        if let Some(kind) = args.kind {
            bail!("Resource kind '{}' is not supported", kind);
        }
        println!("No actions registered.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Kind").fg(Color::Cyan),
        Cell::new("Actions").fg(Color::Cyan),
    ]);
    for (kind, actions) in rows {
        table.add_row(vec![Cell::new(kind), Cell::new(actions)]);
    }

    println!("{table}");
    Ok(())
}

/// (kind, comma-separated verbs) for each matching kind
fn action_rows(registry: &ActionRegistry, kind: Option<&str>) -> Vec<(String, String)> {
    registry
        .kinds()
        .filter(|name| kind.is_none_or(|wanted| wanted == *name))
        .map(|name| {
            let verbs: Vec<&str> = registry.verbs(name).iter().map(|verb| verb.as_str()).collect();
            (name.to_string(), verbs.join(", "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ActionRegistry {
        build_registry(Arc::new(MemoryCluster::new())).unwrap()
    }

    #[test]
    fn rows_cover_every_kind() {
        let rows = action_rows(&registry(), None);
        assert_eq!(rows.len(), 26);
    }

    #[test]
    fn kind_filter_selects_one_row() {
        let rows = action_rows(&registry(), Some("watch"));
        assert_eq!(rows, vec![("watch".to_string(), "get, delete".to_string())]);
    }

    #[test]
    fn unknown_kind_yields_no_rows() {
        assert!(action_rows(&registry(), Some("gadget")).is_empty());
    }
}
