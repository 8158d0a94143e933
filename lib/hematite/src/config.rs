use flux::logging::Severity;
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 6379;
/// Default idle-client timeout in seconds.
pub const DEFAULT_MAXIDLETIME: u64 = 60 * 5;
pub const DEFAULT_DBNUM: usize = 16;

/// A snapshot trigger: save when at least `changes` mutations accumulated
/// and more than `seconds` elapsed since the last save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveParam {
    pub seconds: u64,
    pub changes: u64,
}

/// Runtime configuration, defaults amended by the optional config file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bindaddr: Option<String>,
    pub maxidletime: u64,
    pub dbnum: usize,
    pub save_params: Vec<SaveParam>,
    pub loglevel: Severity,
    pub logfile: Option<String>,
    pub dbfilename: String,
    pub glue_output_buf: bool,
    pub daemonize: bool,
    pub masterhost: Option<String>,
    pub masterport: u16,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: DEFAULT_PORT,
            bindaddr: None,
            maxidletime: DEFAULT_MAXIDLETIME,
            dbnum: DEFAULT_DBNUM,
            save_params: vec![
                SaveParam { seconds: 60 * 60, changes: 1 },
                SaveParam { seconds: 300, changes: 100 },
                SaveParam { seconds: 60, changes: 10000 },
            ],
            loglevel: Severity::Debug,
            logfile: None,
            dbfilename: "dump.rdb".to_string(),
            glue_output_buf: true,
            daemonize: false,
            masterhost: None,
            masterport: DEFAULT_PORT,
        }
    }
}

/// A rejected directive, carrying the config file line it came from.
#[derive(Debug, PartialEq)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

fn err(line: usize, message: &str) -> ConfigError {
    ConfigError { line, message: message.to_string() }
}

impl ServerConfig {
    /// Drop the built-in save policies. The caller does this before loading
    /// a config file so `save` directives start from a clean slate.
    pub fn reset_save_params(&mut self) {
        self.save_params.clear();
    }

    /// Apply the directives of a config file on top of the current values.
    /// `#` lines and blank lines are skipped; anything unrecognized aborts
    /// with the offending line number.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| err(0, &format!("can't open config file: {}", e)))?;

        for (index, raw) in content.lines().enumerate() {
            let linenum = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let argv: Vec<&str> = line.split_whitespace().collect();
            let directive = argv[0].to_ascii_lowercase();
            self.apply(&directive, &argv[1..], linenum)?;
        }
        Ok(())
    }

    fn apply(&mut self, directive: &str, args: &[&str], linenum: usize) -> Result<(), ConfigError> {
        match (directive, args.len()) {
            ("timeout", 1) => {
                let timeout: i64 = args[0].parse().unwrap_or(0);
                if timeout < 1 {
                    return Err(err(linenum, "Invalid timeout value"));
                }
                self.maxidletime = timeout as u64;
            }
            ("port", 1) => {
                let port: i64 = args[0].parse().unwrap_or(0);
                if port < 1 || port > 65535 {
                    return Err(err(linenum, "Invalid port"));
                }
                self.port = port as u16;
            }
            ("bind", 1) => {
                self.bindaddr = Some(args[0].to_string());
            }
            ("save", 2) => {
                let seconds: i64 = args[0].parse().unwrap_or(0);
                let changes: i64 = args[1].parse().unwrap_or(-1);
                if seconds < 1 || changes < 0 {
                    return Err(err(linenum, "Invalid save parameters"));
                }
                self.save_params.push(SaveParam {
                    seconds: seconds as u64,
                    changes: changes as u64,
                });
            }
            ("dir", 1) => {
                std::env::set_current_dir(args[0])
                    .map_err(|e| err(linenum, &format!("Can't chdir to '{}': {}", args[0], e)))?;
            }
            ("loglevel", 1) => {
                self.loglevel = match args[0] {
                    "debug" => Severity::Debug,
                    "notice" => Severity::Info,
                    "warning" => Severity::Warning,
                    _ => {
                        return Err(err(
                            linenum,
                            "Invalid log level. Must be one of debug, notice, warning",
                        ))
                    }
                };
            }
            ("logfile", 1) => {
                if args[0] == "stdout" {
                    self.logfile = None;
                } else {
                    // Catch an unwritable path now; the server cannot
                    // report it once daemonized.
                    fs::OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open(args[0])
                        .map_err(|e| err(linenum, &format!("Can't open the log file: {}", e)))?;
                    self.logfile = Some(args[0].to_string());
                }
            }
            ("databases", 1) => {
                let dbnum: i64 = args[0].parse().unwrap_or(0);
                if dbnum < 1 {
                    return Err(err(linenum, "Invalid number of databases"));
                }
                self.dbnum = dbnum as usize;
            }
            ("slaveof", 2) => {
                self.masterhost = Some(args[0].to_string());
                self.masterport = args[1].parse().unwrap_or(DEFAULT_PORT);
            }
            ("glueoutputbuf", 1) => {
                self.glue_output_buf = parse_yes_no(args[0], linenum)?;
            }
            ("daemonize", 1) => {
                self.daemonize = parse_yes_no(args[0], linenum)?;
            }
            _ => return Err(err(linenum, "Bad directive or wrong number of arguments")),
        }
        Ok(())
    }
}

fn parse_yes_no(arg: &str, linenum: usize) -> Result<bool, ConfigError> {
    match arg.to_ascii_lowercase().as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(err(linenum, "argument must be 'yes' or 'no'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(content: &str) -> Result<ServerConfig, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let mut config = ServerConfig::default();
        config.reset_save_params();
        config.load(file.path())?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 6379);
        assert_eq!(config.dbnum, 16);
        assert_eq!(config.save_params.len(), 3);
        assert!(config.glue_output_buf);
    }

    #[test]
    fn test_directives() {
        let config = load_str(
            "# a comment\n\
             \n\
             port 7000\n\
             timeout 42\n\
             bind 127.0.0.1\n\
             save 900 10\n\
             save 60 10000\n\
             loglevel warning\n\
             databases 4\n\
             glueoutputbuf no\n\
             daemonize no\n",
        )
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.maxidletime, 42);
        assert_eq!(config.bindaddr.as_deref(), Some("127.0.0.1"));
        assert_eq!(
            config.save_params,
            vec![
                SaveParam { seconds: 900, changes: 10 },
                SaveParam { seconds: 60, changes: 10000 }
            ]
        );
        assert_eq!(config.loglevel, Severity::Warning);
        assert_eq!(config.dbnum, 4);
        assert!(!config.glue_output_buf);
    }

    #[test]
    fn test_slaveof() {
        let config = load_str("slaveof 10.0.0.1 6380\n").unwrap();
        assert_eq!(config.masterhost.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.masterport, 6380);
    }

    #[test]
    fn test_bad_directive_reports_line() {
        let error = load_str("port 7000\nfrobnicate yes\n").unwrap_err();
        assert_eq!(error.line, 2);
        assert_eq!(error.message, "Bad directive or wrong number of arguments");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load_str("port 0\n").is_err());
        assert!(load_str("port 100000\n").is_err());
        assert!(load_str("timeout 0\n").is_err());
        assert!(load_str("save 0 10\n").is_err());
        assert!(load_str("loglevel loud\n").is_err());
        assert!(load_str("daemonize maybe\n").is_err());
        assert!(load_str("databases 0\n").is_err());
    }

    #[test]
    fn test_logfile_stdout_resets() {
        let config = load_str("logfile stdout\n").unwrap();
        assert_eq!(config.logfile, None);
    }
}
