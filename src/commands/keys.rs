//! Key lifecycle commands
//!
//! - `plan` - Show what apply would change
//! - `apply` - Converge tracked keys on the manifest
//! - `refresh` - Re-read tracked keys from the remote
//! - `import` - Track an existing key
//! - `destroy` - Delete a tracked key
//! - `show` - Print tracked keys

use anyhow::{Context as _, Result, bail};
use apikey::{
    Checkpoint, DesiredConfig, ImportResolver, ObservedState, Outcome, Plan, PlanSummary,
    ResourceDescriptor,
};
use colored::Colorize;
use rayon::prelude::*;
use std::sync::Arc;

use super::Session;
use crate::Context;
use crate::cli::{ApplyArgs, ManifestArgs};
use crate::manifest::Manifest;
use crate::ui;

// ============================================================================
// Plan
// ============================================================================

pub fn plan(ctx: &Context, args: &ManifestArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let desired = Manifest::load(&args.manifest)?.desired()?;
    let plans = compute_plans(&session, &desired)?;

    display_plans(&plans);
    display_untracked(&session, &desired);
    display_interrupted(&session);
    Ok(())
}

/// Plans for every manifest slot against its tracked state
fn compute_plans(session: &Session, desired: &[(String, DesiredConfig)]) -> Result<Vec<Plan>> {
    let descriptor = ResourceDescriptor::api_key();
    desired
        .iter()
        .map(|(name, config)| {
            descriptor
                .validate(config)
                .with_context(|| format!("Invalid key slot '{name}'"))?;
            let observed = session
                .state
                .get(name)
                .and_then(|checkpoint| checkpoint.record.as_ref())
                .map(ObservedState::from_record)
                .transpose()
                .with_context(|| format!("State of slot '{name}' is unusable"))?;
            Ok(Plan::compute(
                name.clone(),
                &descriptor,
                config,
                observed.as_ref(),
            ))
        })
        .collect()
}

fn display_plans(plans: &[Plan]) {
    ui::header("Plan");
    for plan in plans {
        println!(
            "  {} {}",
            ui::action_symbol(&plan.action),
            plan.description()
        );
    }

    let summary = PlanSummary::from_plans(plans);
    println!();
    if summary.has_changes() {
        println!(
            "  {} to create, {} to update, {} to replace, {} unchanged",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.replaces.to_string().red(),
            summary.unchanged
        );
    } else {
        ui::success("Everything is up to date");
    }
}

/// Warn about tracked slots the manifest no longer mentions
fn display_untracked(session: &Session, desired: &[(String, DesiredConfig)]) {
    for slot in session.state.slots.keys() {
        if !desired.iter().any(|(name, _)| name == slot) {
            ui::warn(&format!(
                "Slot '{slot}' is tracked but not in the manifest; run 'keyward destroy {slot}' to remove it"
            ));
        }
    }
}

/// Warn about slots whose last run was interrupted
fn display_interrupted(session: &Session) {
    for (slot, checkpoint) in &session.state.slots {
        if checkpoint.refresh_required {
            ui::warn(&format!(
                "Slot '{slot}' was interrupted; run 'keyward refresh' before applying"
            ));
        }
    }
}

fn needs_refresh(session: &Session, slot: &str) -> bool {
    session
        .state
        .get(slot)
        .is_some_and(|checkpoint| checkpoint.refresh_required)
}

// ============================================================================
// Apply
// ============================================================================

/// Result of applying one slot
struct SlotResult {
    name: String,
    outcome: Result<Outcome>,
    checkpoint: Option<Checkpoint>,
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let mut session = Session::open(ctx)?;
    let desired = Manifest::load(&args.manifest.manifest)?.desired()?;
    let plans = compute_plans(&session, &desired)?;

    display_plans(&plans);
    display_untracked(&session, &desired);
    display_interrupted(&session);

    // Interrupted slots go through the reconciler even when unchanged, so
    // they are reported instead of skipped
    let pending: Vec<&(String, DesiredConfig)> = desired
        .iter()
        .zip(&plans)
        .filter(|((name, _), plan)| plan.action.is_change() || needs_refresh(&session, name))
        .map(|(slot, _)| slot)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    if args.dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(());
    }

    if !args.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let jobs = args.jobs.unwrap_or(session.settings.jobs).max(1);
    execute(&mut session, &pending, jobs)
}

/// Apply the pending slots and persist whatever state they end in
fn execute(
    session: &mut Session,
    pending: &[&(String, DesiredConfig)],
    jobs: usize,
) -> Result<()> {
    println!();
    println!("  {} Applying {} keys...", "→".cyan(), pending.len());
    let results = execute_parallel(session, pending, jobs)?;

    let mut failed = 0;
    for result in results {
        session.state.set(&result.name, result.checkpoint);
        match result.outcome {
            Ok(outcome) => ui::success(&ui::outcome_line(&result.name, &outcome)),
            Err(err) => {
                failed += 1;
                match err.downcast_ref::<apikey::Error>() {
                    Some(api_err) => ui::report(api_err),
                    None => ui::error(&format!("{}: {err:#}", result.name)),
                }
            }
        }
    }
    session.save()?;

    if failed > 0 {
        bail!("{failed} of {} keys failed to apply", pending.len());
    }
    Ok(())
}

/// Apply each slot with its own reconciler
fn execute_parallel(
    session: &Session,
    pending: &[&(String, DesiredConfig)],
    jobs: usize,
) -> Result<Vec<SlotResult>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("Failed to create apply thread pool")?;
    let cancel = session.cancel_token();

    Ok(pool.install(|| {
        pending
            .par_iter()
            .map(|(name, desired)| match session.reconciler(name) {
                Ok(reconciler) => {
                    let outcome = reconciler
                        .apply(desired, &cancel)
                        .map_err(anyhow::Error::from);
                    SlotResult {
                        name: name.clone(),
                        outcome,
                        checkpoint: reconciler.checkpoint(),
                    }
                }
                Err(err) => SlotResult {
                    name: name.clone(),
                    outcome: Err(err),
                    checkpoint: session.state.get(name).cloned(),
                },
            })
            .collect()
    }))
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

// ============================================================================
// Refresh
// ============================================================================

pub fn refresh(ctx: &Context) -> Result<()> {
    let mut session = Session::open(ctx)?;
    let cancel = session.cancel_token();
    let slots: Vec<String> = session.state.slots.keys().cloned().collect();

    if slots.is_empty() {
        ui::info("No keys tracked");
        return Ok(());
    }

    let mut failed = 0;
    for slot in &slots {
        let reconciler = session.reconciler(slot)?;
        match reconciler.read(&cancel) {
            Ok(Some(observed)) => {
                ui::success(&format!("{slot}: {} {}", observed.id(), observed.lifecycle_state()));
            }
            Ok(None) => {
                ui::warn(&format!("{slot}: key no longer exists, no longer tracked"));
            }
            Err(err) => {
                failed += 1;
                ui::report(&err);
            }
        }
        session.state.set(slot, reconciler.checkpoint());
    }
    session.save()?;

    if failed > 0 {
        bail!("{failed} of {} keys could not be refreshed", slots.len());
    }
    Ok(())
}

// ============================================================================
// Import
// ============================================================================

pub fn import(ctx: &Context, slot: &str, raw_id: &str, force: bool) -> Result<()> {
    let mut session = Session::open(ctx)?;

    if session.state.get(slot).is_some() && !force {
        bail!("Slot '{slot}' already tracks a key; use --force to replace it");
    }
    if let Some(other) = session.state.slot_for(raw_id).filter(|other| *other != slot) {
        bail!("{raw_id} is already tracked under slot '{other}'");
    }

    let resolver = ImportResolver::new(
        Arc::clone(&session.remote),
        session.settings.reconciler_config(),
    );
    let observed = resolver
        .import(raw_id, &session.cancel_token())
        .with_context(|| format!("Failed to import into slot '{slot}'"))?;

    session.state.set(slot, Some(observed.to_record().into()));
    session.save()?;

    ui::success(&format!("Imported {} as '{slot}'", observed.id()));
    ui::observed(&observed);
    Ok(())
}

// ============================================================================
// Destroy
// ============================================================================

pub fn destroy(ctx: &Context, slot: &str, yes: bool) -> Result<()> {
    let mut session = Session::open(ctx)?;
    let Some(checkpoint) = session.state.get(slot) else {
        bail!("No key tracked under slot '{slot}'");
    };

    let target = checkpoint.id().unwrap_or("the key of an interrupted create");
    ui::warn(&format!("This deletes {target} from the remote"));
    if !yes && !confirm_proceed()? {
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let reconciler = session.reconciler(slot)?;
    let result = reconciler.delete(&session.cancel_token());
    session.state.set(slot, reconciler.checkpoint());
    session.save()?;
    result.with_context(|| format!("Failed to destroy slot '{slot}'"))?;

    ui::success(&format!("Destroyed '{slot}'"));
    Ok(())
}

// ============================================================================
// Show
// ============================================================================

pub fn show(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    ui::header("Tracked keys");

    if session.state.slots.is_empty() {
        ui::dim("(none)");
        return Ok(());
    }

    for (slot, checkpoint) in &session.state.slots {
        ui::section(slot);
        if checkpoint.refresh_required {
            ui::warn("Interrupted; run 'keyward refresh'");
        }
        match checkpoint.record.as_ref().map(ObservedState::from_record) {
            Some(Ok(observed)) => ui::observed(&observed),
            Some(Err(err)) => ui::report(&err),
            None => ui::dim("(create pending)"),
        }
    }
    Ok(())
}
