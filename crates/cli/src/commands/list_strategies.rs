//! Lists the registered strategies.

use anyhow::Result;
use clap::Args;

use btc_predictor_strategy::StrategyRegistry;

/// Arguments for the list-strategies command.
#[derive(Args, Debug, Clone)]
pub struct ListStrategiesArgs {}

/// One line per strategy: name, whether it is fitted, supported timeframes.
pub fn format_strategies(registry: &StrategyRegistry) -> Result<String> {
    let mut output = String::new();
    output.push_str(&format!("{:<16} {:<8} {}\n", "NAME", "FITTED", "TIMEFRAMES"));
    for name in registry.names() {
        let strategy = registry.create(name)?;
        let timeframes = strategy
            .available_timeframes()
            .iter()
            .map(|tf| format!("{tf}m"))
            .collect::<Vec<_>>()
            .join(", ");
        let fitted = if strategy.requires_fitting() { "yes" } else { "no" };
        output.push_str(&format!("{name:<16} {fitted:<8} {timeframes}\n"));
    }
    Ok(output)
}

/// Runs the list-strategies command.
///
/// # Errors
/// Returns an error if a registered factory cannot be listed.
pub fn run_list_strategies(_args: ListStrategiesArgs) -> Result<()> {
    print!("{}", format_strategies(&StrategyRegistry::with_defaults())?);
    Ok(())
}
