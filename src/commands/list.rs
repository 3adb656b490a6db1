use anyhow::{Context as _, Result, bail};
use apikey::{FilterSpec, IdentityRef, ObservedState, QueryEngine, ResourceDescriptor};
use colored::Colorize;
use std::sync::Arc;

use super::Session;
use crate::Context;
use crate::cli::ListArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &ListArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let filters = args
        .filters
        .iter()
        .map(|raw| parse_filter(raw, args.regex))
        .collect::<Result<Vec<_>>>()?;

    let engine = QueryEngine::new(
        Arc::clone(&session.remote),
        ResourceDescriptor::api_key(),
        session.settings.reconciler_config(),
    );
    let keys: Vec<ObservedState> = engine
        .query(
            IdentityRef::new(&args.user),
            &filters,
            &session.cancel_token(),
        )
        .with_context(|| format!("Failed to list keys of {}", args.user))?
        .collect();

    if args.json {
        let records: Vec<_> = keys.iter().map(ObservedState::to_record).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    ui::header(&format!("Keys of {}", args.user));
    if keys.is_empty() {
        ui::dim("(none)");
        return Ok(());
    }

    for key in &keys {
        let id = key.id().to_string();
        let slot = session
            .state
            .slot_for(&id)
            .map(|s| format!(" [{s}]").cyan().to_string())
            .unwrap_or_default();
        println!(
            "  {} {}{}  {}",
            state_symbol(key),
            id,
            slot,
            key.time_created().format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
    println!();
    ui::dim(&format!("{} keys", keys.len()));
    Ok(())
}

fn state_symbol(key: &ObservedState) -> colored::ColoredString {
    if key.lifecycle_state().is_gone() {
        "✗".red()
    } else {
        "●".green()
    }
}

/// Parse `name=value[,value...]`
fn parse_filter(raw: &str, regex: bool) -> Result<FilterSpec> {
    let Some((name, values)) = raw.split_once('=') else {
        bail!("Invalid filter '{raw}': expected NAME=VALUE[,VALUE...]");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid filter '{raw}': missing attribute name");
    }

    let spec = FilterSpec::new(name, values.split(',').map(str::trim));
    Ok(if regex { spec.regex() } else { spec })
}
