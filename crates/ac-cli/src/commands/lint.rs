use std::path::Path;

use ac_expr::CompiledExpr;
use ac_expr::diagnostics::{Diagnostic, Severity, from_error, render_diagnostics};
use ac_rules::{Grammar, RuleEntry};

use crate::scenario::Scenario;

pub fn run(path: &Path) -> Result<(), String> {
    let scenario = Scenario::load(path)?;
    let grammar = Grammar::new(scenario.config.module_id.clone())
        .with_keywords(&scenario.config.context_keywords);

    let mut rules = 0;
    let mut errors = 0;
    let mut warnings = 0;

    for actor in &scenario.battlefield.actors {
        for effect in &actor.effects {
            for (i, change) in effect.changes.iter().enumerate() {
                let diagnostics = match grammar.parse_change(effect, i) {
                    Ok(None) => continue,
                    Ok(Some(entry)) => entry_diagnostics(&entry, &change.value),
                    Err(e) => vec![Diagnostic::error(0..change.value.len(), e.to_string())],
                };
                rules += 1;
                if diagnostics.is_empty() {
                    continue;
                }
                errors += diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .count();
                warnings += diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Warning)
                    .count();
                let filename = format!("{} / {}", effect.name, change.key);
                eprint!(
                    "{}",
                    render_diagnostics(&change.value, &filename, &diagnostics)
                );
            }
        }
    }

    println!(
        "  {rules} rule{}, {errors} error{}, {warnings} warning{}",
        if rules == 1 { "" } else { "s" },
        if errors == 1 { "" } else { "s" },
        if warnings == 1 { "" } else { "s" },
    );

    if errors > 0 {
        Err("lint failed with errors".into())
    } else {
        Ok(())
    }
}

fn entry_diagnostics(entry: &RuleEntry, value: &str) -> Vec<Diagnostic> {
    let whole = 0..value.len();
    let mut out: Vec<Diagnostic> = entry
        .warnings
        .iter()
        .map(|w| Diagnostic::warning(whole.clone(), w.clone()))
        .collect();

    let expressions = entry
        .conditions
        .iter()
        .map(|c| &c.expr)
        .chain(
            [
                &entry.bonus,
                &entry.set,
                &entry.threshold,
                &entry.chance,
                &entry.radius,
                &entry.short,
                &entry.long,
            ]
            .into_iter()
            .flatten(),
        );
    for expr in expressions {
        out.extend(expr_diagnostics(expr, value));
    }
    out
}

fn expr_diagnostics(expr: &CompiledExpr, value: &str) -> Vec<Diagnostic> {
    let Some(error) = expr.error() else {
        return Vec::new();
    };
    let offset = value.find(expr.source()).unwrap_or(0);
    from_error(expr.source(), error)
        .into_iter()
        .map(|d| d.offset(offset))
        .collect()
}
