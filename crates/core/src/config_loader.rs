use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml`, `BTC_` environment
    /// variables and an optional `config/Config.json`, on top of the
    /// built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed or the
    /// merged configuration fails validation.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Same as [`ConfigLoader::load`] with an explicit TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed or the
    /// merged configuration fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BTC_").split("__"))
            .join(Json::file("config/Config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Venue;
    use rust_decimal::Decimal;

    #[test]
    fn test_missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("does/not/exist.toml").unwrap();
            assert_eq!(config.risk_control.max_daily_trades, 30);
            Ok(())
        });
    }

    #[test]
    fn test_toml_overrides_and_string_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                r#"
                [risk_control]
                bet_range = [2.0, 8.0]
                daily_max_loss = 25.0

                [confidence_thresholds]
                "15" = 0.62

                [polymarket]
                payout_ratio = 1.95
                "#,
            )?;
            let config = ConfigLoader::load_from("Config.toml").unwrap();
            assert_eq!(config.risk_control.bet_range, [2.0, 8.0]);
            assert_eq!(config.risk_control.daily_max_loss, Decimal::from(25));
            assert_eq!(config.risk_control.max_consecutive_losses, 8);
            assert!((config.confidence_threshold(15) - 0.62).abs() < 1e-12);
            assert!((config.payout_ratio(Venue::Polymarket, 60) - 1.95).abs() < 1e-12);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Config.toml", "[risk_control]\nmax_daily_trades = 10\n")?;
            jail.set_env("BTC_RISK_CONTROL__MAX_DAILY_TRADES", "3");
            let config = ConfigLoader::load_from("Config.toml").unwrap();
            assert_eq!(config.risk_control.max_daily_trades, 3);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Config.toml", "[risk_control]\nbet_range = [9.0, 1.0]\n")?;
            assert!(ConfigLoader::load_from("Config.toml").is_err());
            Ok(())
        });
    }
}
