use std::path::Path;
use std::sync::Arc;

use ac_engine::{CommitSummary, Engine, MemoryAuthority, MemoryStore};
use ac_rules::{AdvantageMode, ForcedOutcome, Resolution, RollDelta, Side};
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use serde_json::json;

use crate::scenario::Scenario;

pub fn run(path: &Path, json: bool, commit: bool, select: &[String]) -> Result<(), String> {
    let scenario = Scenario::load(path)?;
    let mut request = scenario.request()?.clone();
    request.selected_opt_ins.extend(select.iter().cloned());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {e}"))?;

    runtime.block_on(async {
        let store = Arc::new(MemoryStore::from_battlefield(&scenario.battlefield));
        let peer = Arc::new(MemoryAuthority::new(
            store.clone(),
            scenario.config.cadence_path(),
        ));
        let engine = Engine::new(scenario.config.clone(), store, peer);
        let geometry = scenario.geometry();

        let cadence = engine
            .load_cadence(&scenario.battlefield)
            .await
            .map_err(|e| e.to_string())?;
        let mut session = engine.open_session(request);
        let delta = engine
            .evaluate(&mut session, &scenario.battlefield, &geometry, &cadence)
            .map_err(|e| e.to_string())?;
        let resolution = session.resolution().cloned().unwrap_or_default();
        let tooltip = engine.describe(&resolution);

        let summary = if commit {
            Some(
                engine
                    .commit_pending_uses(&mut session)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        } else {
            None
        };
        engine.shutdown().await.map_err(|e| e.to_string())?;

        if json {
            let out = json!({
                "resolution": resolution,
                "delta": delta,
                "parts": session.parts(),
                "tooltip": tooltip,
                "commit": summary,
            });
            let text = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
            println!("{text}");
        } else {
            print_resolution(&resolution);
            print_delta(&delta, session.parts());
            println!();
            for line in tooltip.lines() {
                println!("  {line}");
            }
            if let Some(summary) = &summary {
                print_summary(summary);
            }
        }
        Ok::<(), String>(())
    })
}

fn print_resolution(resolution: &Resolution) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Side", "Mode", "Rule", "Value"]);
    let mut rows = 0;
    for side in [Side::Subject, Side::Opponent] {
        for (mode, entries) in resolution.side(side).iter() {
            for entry in entries {
                let value = entry
                    .value
                    .clone()
                    .or_else(|| entry.set.map(|s| format!("= {s}")))
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(vec![
                    format!("{side:?}").to_lowercase(),
                    mode.to_string(),
                    entry.label.clone(),
                    value,
                ]);
                rows += 1;
            }
        }
    }

    if rows == 0 {
        println!("  No rules fired.");
    } else {
        println!("{table}");
    }

    for choice in &resolution.opt_ins {
        let mark = if choice.selected { "[x]" } else { "[ ]" };
        println!("  opt-in {mark} {} ({}) {}", choice.label, choice.mode, choice.id.dimmed());
    }
    for skipped in &resolution.skipped {
        println!("  {} {}: {}", "skipped".dimmed(), skipped.id, skipped.reason);
    }
}

fn print_delta(delta: &RollDelta, parts: &[String]) {
    let mode = match delta.advantage_mode {
        AdvantageMode::Advantage => "advantage".green().bold(),
        AdvantageMode::Disadvantage => "disadvantage".red().bold(),
        AdvantageMode::Normal => "normal".normal(),
    };
    println!();
    println!("  Roll mode:       {mode}");
    println!("  Default button:  {}", delta.default_button);
    if !delta.injected_formula_parts.is_empty() {
        println!("  Injected parts:  {}", delta.injected_formula_parts.join(" "));
    }
    println!("  Formula:         {}", parts.join(" "));
    if delta.target_value_delta != 0 {
        println!("  Target delta:    {:+}", delta.target_value_delta);
    }
    if let Some(target) = delta.target_value {
        println!("  Target value:    {target}");
    }
    println!(
        "  Critical / fumble: {} / {}",
        delta.critical_threshold, delta.fumble_threshold
    );
    match delta.forced_outcome {
        Some(ForcedOutcome::Fail) => println!("  Outcome:         {}", "forced fail".red().bold()),
        Some(ForcedOutcome::Success) => {
            println!("  Outcome:         {}", "forced success".green().bold());
        }
        None => {}
    }
    if delta.is_critical {
        println!("  {}", "critical".yellow().bold());
    }
    if delta.is_fumble {
        println!("  {}", "fumble".yellow().bold());
    }
    for reason in &delta.reasons {
        println!("  - {reason}");
    }
}

fn print_summary(summary: &CommitSummary) {
    println!();
    if summary.blocked {
        println!("  {}", "Roll blocked; nothing committed.".red());
        return;
    }
    let r = &summary.report;
    println!(
        "  Committed: {} applied, {} delegated, {} dropped, {} missing, {} exhausted, {} cadence",
        r.applied, r.delegated, r.dropped, r.missing, r.exhausted, r.cadence_recorded
    );
}
