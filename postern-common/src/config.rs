use core::fmt::{self, Display, Formatter};
use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use tracing::metadata::LevelFilter;

use crate::error::ConfigError;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1025";
const DEFAULT_SOFTWARE_IDENT: &str = "Go25";
const DEFAULT_STATS_REFRESH_SECS: u64 = 10;
const DEFAULT_MAX_IDLE_SECS: u64 = 120;
const DEFAULT_MAX_MSG_SIZE: usize = 16_777_216;

/// Runtime configuration for the server, immutable once loaded.
///
/// Populated from a plain `key: value` file, one directive per line, with
/// `#` comments and blank lines skipped. Every directive has a default, so
/// an absent file yields a usable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local address the SMTP listener binds to.
    pub listen: SocketAddr,
    /// Domain name reported to clients in the banner and HELO replies.
    pub domain: String,
    /// Software identification string used in the banner.
    pub ident: String,
    /// Deadline applied to every client read and write.
    pub max_idle: Duration,
    /// Maximum accepted message body size, in bytes.
    pub max_msg_size: usize,
    /// Worker threads for the runtime.
    pub cores: usize,
    /// Log verbosity.
    pub log_level: LevelFilter,
    /// Interval between periodic server statistics log lines.
    pub stats_refresh: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // The default address is a fixed literal and always resolves.
            listen: resolve_listen_addr(DEFAULT_LISTEN_ADDR).unwrap_or_else(|| {
                SocketAddr::from(([0, 0, 0, 0], 1025))
            }),
            domain: default_domain(),
            ident: DEFAULT_SOFTWARE_IDENT.to_string(),
            max_idle: Duration::from_secs(DEFAULT_MAX_IDLE_SECS),
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            cores: std::thread::available_parallelism().map_or(1, usize::from),
            log_level: LevelFilter::TRACE,
            stats_refresh: Duration::from_secs(DEFAULT_STATS_REFRESH_SECS),
        }
    }
}

fn default_domain() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn resolve_listen_addr(addr: &str) -> Option<SocketAddr> {
    addr.to_socket_addrs().ok()?.next()
}

impl Config {
    /// Load a configuration from the given file path. A path of `None`
    /// yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or any directive
    /// is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let contents = std::fs::read_to_string(path)?;
            config.apply(&contents)?;
        }
        Ok(config)
    }

    /// Apply `key: value` directives from `contents` on top of the current
    /// values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::Parse`] naming the offending line for any
    /// unrecognized directive or malformed value.
    pub fn apply(&mut self, contents: &str) -> Result<(), ConfigError> {
        for (idx, raw) in contents.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((directive, argument)) = line.split_once(':') else {
                return Err(ConfigError::at(
                    lineno,
                    format!("expected 'key: value', got '{line}'"),
                ));
            };
            self.directive(directive.trim(), argument.trim(), lineno)?;
        }
        Ok(())
    }

    fn directive(&mut self, directive: &str, argument: &str, lineno: usize) -> Result<(), ConfigError> {
        if argument.is_empty() {
            return Err(ConfigError::at(
                lineno,
                format!("argument to '{directive}' cannot be blank"),
            ));
        }
        match directive.to_ascii_lowercase().as_str() {
            "cores" => {
                self.cores = parse_number(argument, lineno, "cores", 1)?;
            }
            "domain" => {
                self.domain = argument.to_string();
            }
            "ident" => {
                self.ident = argument.to_string();
            }
            "listen" => {
                self.listen = resolve_listen_addr(argument).ok_or_else(|| {
                    ConfigError::at(
                        lineno,
                        format!("failed to resolve 'listen' address: {argument}"),
                    )
                })?;
            }
            "loglevel" => {
                self.log_level = parse_log_level(argument).ok_or_else(|| {
                    ConfigError::at(lineno, format!("unknown log level ('{argument}')"))
                })?;
            }
            "maxidle" => {
                self.max_idle =
                    Duration::from_secs(parse_number(argument, lineno, "maxidle", 1)? as u64);
            }
            "maxmsgsize" => {
                self.max_msg_size = parse_number(argument, lineno, "maxmsgsize", 1)?;
            }
            "statsrefresh" => {
                self.stats_refresh =
                    Duration::from_secs(parse_number(argument, lineno, "statsrefresh", 1)? as u64);
            }
            _ => {
                return Err(ConfigError::at(
                    lineno,
                    format!("unrecognized directive: {directive}"),
                ));
            }
        }
        Ok(())
    }
}

fn parse_number(
    argument: &str,
    lineno: usize,
    directive: &str,
    min: usize,
) -> Result<usize, ConfigError> {
    let value: usize = argument.parse().map_err(|_| {
        ConfigError::at(
            lineno,
            format!("invalid argument to '{directive}' ('{argument}')"),
        )
    })?;
    if value < min {
        return Err(ConfigError::at(
            lineno,
            format!("'{directive}' value cannot be <{min}"),
        ));
    }
    Ok(value)
}

fn parse_log_level(argument: &str) -> Option<LevelFilter> {
    match argument.to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        // tracing has no level above ERROR, so critical folds into it.
        "error" | "critical" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listen={} domain={} ident='{}' log={} maxidle={}s maxmsg={}B statsrefresh={}s cores={}",
            self.listen,
            self.domain,
            self.ident,
            self.log_level,
            self.max_idle.as_secs(),
            self.max_msg_size,
            self.stats_refresh.as_secs(),
            self.cores,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.listen.port(), 1025);
        assert_eq!(config.ident, "Go25");
        assert_eq!(config.max_idle, Duration::from_secs(120));
        assert_eq!(config.max_msg_size, 16_777_216);
        assert!(config.cores >= 1);
    }

    #[test]
    fn directives_override_defaults() {
        let mut config = Config::default();
        config
            .apply(
                "# server settings\n\
                 listen: 127.0.0.1:2525\n\
                 domain: mail.example.com\n\
                 ident: postern\n\
                 \n\
                 maxidle: 30\n\
                 maxmsgsize: 1024\n\
                 loglevel: warn\n\
                 statsrefresh: 5\n\
                 cores: 2\n",
            )
            .unwrap();

        assert_eq!(config.listen, "127.0.0.1:2525".parse().unwrap());
        assert_eq!(config.domain, "mail.example.com");
        assert_eq!(config.ident, "postern");
        assert_eq!(config.max_idle, Duration::from_secs(30));
        assert_eq!(config.max_msg_size, 1024);
        assert_eq!(config.log_level, LevelFilter::WARN);
        assert_eq!(config.stats_refresh, Duration::from_secs(5));
        assert_eq!(config.cores, 2);
    }

    #[test]
    fn directives_are_case_insensitive() {
        let mut config = Config::default();
        config.apply("MaxIdle: 45").unwrap();
        assert_eq!(config.max_idle, Duration::from_secs(45));
    }

    #[test]
    fn critical_folds_into_error() {
        let mut config = Config::default();
        config.apply("loglevel: critical").unwrap();
        assert_eq!(config.log_level, LevelFilter::ERROR);
    }

    #[test]
    fn rejects_unknown_directive() {
        let mut config = Config::default();
        let err = config.apply("listen: 127.0.0.1:2525\nbogus: 1\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2: unrecognized directive: bogus");
    }

    #[test]
    fn rejects_blank_argument() {
        let mut config = Config::default();
        assert!(config.apply("domain:").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::default();
        assert!(config.apply("maxidle: 0").is_err());
        assert!(config.apply("maxmsgsize: 0").is_err());
        assert!(config.apply("statsrefresh: 0").is_err());
        assert!(config.apply("maxidle: ten").is_err());
    }

    #[test]
    fn rejects_missing_separator() {
        let mut config = Config::default();
        assert!(config.apply("maxidle 30").is_err());
    }

    #[test]
    fn summary_line() {
        let mut config = Config::default();
        config
            .apply("listen: 127.0.0.1:2525\ndomain: example.com\nident: postern\ncores: 4")
            .unwrap();
        let summary = config.to_string();
        assert!(summary.contains("listen=127.0.0.1:2525"));
        assert!(summary.contains("ident='postern'"));
        assert!(summary.contains("cores=4"));
    }
}
