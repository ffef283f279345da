use std::str::FromStr;

use crate::errors::AppError;

/// Load `.env` from the working directory, falling back to the crate directory
/// (binaries launched from a container often have a different CWD).
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

/// Read `key` from the environment, using `default` when unset.
/// A value that is set but unparsable is a configuration error, never silently defaulted.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

pub fn database_url() -> Result<String, AppError> {
    std::env::var("DATABASE_URL").map_err(|_| AppError::configuration("DATABASE_URL not set"))
}

pub fn app_port() -> Result<u16, AppError> {
    env_or("APP_PORT", 8000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_uses_default_when_unset() {
        std::env::remove_var("SUPPLIER_RISK_TEST_UNSET");
        assert_eq!(env_or("SUPPLIER_RISK_TEST_UNSET", 7u32).unwrap(), 7);
    }

    #[test]
    fn env_or_rejects_garbage() {
        std::env::set_var("SUPPLIER_RISK_TEST_GARBAGE", "five");
        let result = env_or::<u32>("SUPPLIER_RISK_TEST_GARBAGE", 5);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
