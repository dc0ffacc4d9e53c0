use std::fmt;
use std::io;
use std::str::FromStr;

/// Environment variable that selects the runtime environment.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Runtime environment the service is deployed in.
///
/// The environment selects which configuration overlay file is loaded on top of the
/// base configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    /// Reads the environment from `APP_ENVIRONMENT`, defaulting to [`Environment::Dev`]
    /// when the variable is not set.
    pub fn load() -> io::Result<Self> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(value) => value
                .parse()
                .map_err(|err: String| io::Error::new(io::ErrorKind::InvalidInput, err)),
            Err(_) => Ok(Environment::Dev),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => f.write_str("dev"),
            Environment::Staging => f.write_str("staging"),
            Environment::Prod => f.write_str("prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!(
                "`{other}` is not a supported environment, use `dev`, `staging` or `prod`"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_environments() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Prod
        );
        assert_eq!(
            "Staging".parse::<Environment>().unwrap(),
            Environment::Staging
        );
    }

    #[test]
    fn rejects_unknown_environment() {
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for env in [Environment::Dev, Environment::Staging, Environment::Prod] {
            assert_eq!(env.to_string().parse::<Environment>().unwrap(), env);
        }
    }
}
