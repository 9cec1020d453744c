use std::env;

use crate::error::ConfigError;

/// Runtime settings loaded from environment variables.
///
/// A `.env` file is honored when present.
#[derive(Debug, Clone)]
pub struct Settings {
    pub finnhub_api_key: String,
    pub edgar_user_agent: String,
    pub market_ttl_seconds: i64,
    pub market_concurrency: usize,
    pub store_raw_market_payload: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            finnhub_api_key: env::var("FINNHUB_API_KEY")
                .map_err(|_| ConfigError::MissingVar("FINNHUB_API_KEY"))?,
            edgar_user_agent: env::var("EDGARPACK_USER_AGENT")
                .map_err(|_| ConfigError::MissingVar("EDGARPACK_USER_AGENT"))?,
            market_ttl_seconds: parse_var("MARKET_TTL_SECONDS", 300)?,
            market_concurrency: parse_var("MARKET_CONCURRENCY", 8)?,
            store_raw_market_payload: parse_var("STORE_RAW_MARKET_PAYLOAD", false)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test so they
    // cannot race each other under the parallel test runner.
    #[test]
    fn settings_parse_and_default() {
        env::set_var("FINNHUB_API_KEY", "test-key");
        env::set_var("EDGARPACK_USER_AGENT", "handspread-tests admin@example.com");
        env::remove_var("MARKET_TTL_SECONDS");
        env::remove_var("MARKET_CONCURRENCY");
        env::remove_var("STORE_RAW_MARKET_PAYLOAD");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.market_ttl_seconds, 300);
        assert_eq!(settings.market_concurrency, 8);
        assert!(!settings.store_raw_market_payload);

        env::set_var("MARKET_TTL_SECONDS", "0");
        env::set_var("MARKET_CONCURRENCY", "4");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.market_ttl_seconds, 0);
        assert_eq!(settings.market_concurrency, 4);

        env::set_var("MARKET_CONCURRENCY", "not-a-number");
        assert!(matches!(
            Settings::from_env(),
            Err(ConfigError::InvalidVar { name: "MARKET_CONCURRENCY", .. })
        ));
        env::remove_var("MARKET_CONCURRENCY");

        env::remove_var("FINNHUB_API_KEY");
        assert!(matches!(
            Settings::from_env(),
            Err(ConfigError::MissingVar("FINNHUB_API_KEY"))
        ));
    }
}
