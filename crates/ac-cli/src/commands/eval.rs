use std::path::Path;

use ac_core::Value;
use ac_engine::EngineConfig;
use ac_expr::diagnostics::{from_error, render_diagnostics};
use ac_expr::{Bindings, CompiledExpr, ExprError};
use ac_rules::build_context;
use colored::Colorize;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::scenario::Scenario;

pub fn run(
    expression: &str,
    formula: bool,
    roll: bool,
    scenario: Option<&Path>,
) -> Result<(), String> {
    let (bindings, seed) = match scenario {
        Some(path) => {
            let scenario = Scenario::load(path)?;
            let ctx = build_context(
                &scenario.battlefield,
                &scenario.geometry(),
                scenario.request()?,
            )
            .map_err(|e| e.to_string())?;
            (ctx.bindings, scenario.config.seed)
        }
        None => (Bindings::new(), EngineConfig::default().seed),
    };

    let expr = CompiledExpr::new(expression);
    if !formula {
        return match expr.try_condition(&bindings) {
            Ok(result) => {
                println!("{result}");
                Ok(())
            }
            Err(e) => {
                // Conditions fail closed; still show why.
                println!("false");
                report(expression, &e)
            }
        };
    }

    let result = match expr.try_formula(&bindings) {
        Ok(result) => result,
        Err(e) => return report(expression, &e),
    };
    println!("{result}");
    if roll {
        let mut rng = StdRng::seed_from_u64(seed);
        let total = result.roll(&mut rng).map_err(|e| e.to_string())?;
        println!("  {} {}", "rolled".dimmed(), Value::Number(total));
    }
    Ok(())
}

fn report(source: &str, error: &ExprError) -> Result<(), String> {
    let diagnostics = from_error(source, error);
    eprint!("{}", render_diagnostics(source, "expression", &diagnostics));
    Err(error.to_string())
}
