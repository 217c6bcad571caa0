use log::{error, info};
use std::path::{Path, PathBuf};

use vm201_poller::client::Vm201Client;
use vm201_poller::config::Config;
use vm201_poller::services::poller::{self, Poller};
use vm201_poller::simulate::{self, SimulatedBoard};
use vm201_poller::transport::HttpTransport;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (board={}, auth={}, controller={}, poll_interval={}s, max_ticks={}, simulate={})",
        if cfg.simulate { "<simulated>" } else { cfg.host.as_str() },
        cfg.credentials.is_some(),
        cfg.controller_name,
        cfg.poll_interval.as_secs(),
        cfg.max_ticks
            .map(|v| v.get().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.simulate
    );

    // 2) Poll until told to stop
    if cfg.simulate {
        let board = SimulatedBoard::new(simulate::default_layout(), cfg.simulate_seed);
        let mut poller = Poller::new(Vm201Client::new(board, cfg.controller_name.clone()));
        poller::run_loop(&mut poller, cfg.poll_interval, cfg.max_ticks)
    } else {
        let transport = HttpTransport::new(&cfg.host, cfg.credentials.as_ref());
        let mut poller = Poller::new(Vm201Client::new(transport, cfg.controller_name.clone()));
        poller::run_loop(&mut poller, cfg.poll_interval, cfg.max_ticks)
    }
}

/// `--env-file <path>` / `--env-file=<path>`, nothing else.
fn env_file_arg(args: &[String]) -> Result<Option<PathBuf>, String> {
    match args {
        [] => Ok(None),
        [flag, path] if flag == "--env-file" => Ok(Some(PathBuf::from(path))),
        [arg] => match arg.strip_prefix("--env-file=") {
            Some("") | None if arg.starts_with("--env-file") => Err("`--env-file` requires a path argument".to_string()),
            Some(path) => Ok(Some(PathBuf::from(path))),
            None => Err(format!("unrecognised argument: {}", arg)),
        },
        _ => Err(format!("unrecognised arguments: {}", args.join(" "))),
    }
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let (path, explicit) = match env_file_arg(&args)? {
        Some(path) if path.is_file() => (path, true),
        Some(path) => return Err(format!("env file not found: {}", path.display())),
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            match cwd.join(".env") {
                p if p.is_file() => (p, false),
                _ => return Ok(None),
            }
        }
    };

    load_env_file(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already in the process environment win.
        if std::env::var_os(key).is_none() {
            // Single-threaded at this point; no other thread reads the environment yet.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

/// `KEY=value`, `KEY="value"` or `KEY='value'`; quoted values are taken verbatim.
fn parse_env_line(line: &str) -> Result<Option<(&str, &str)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (key, raw) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => match raw[1..].split_once(q) {
            Some((inner, rest)) if rest.trim().is_empty() || rest.trim_start().starts_with('#') => inner,
            Some(_) => return Err("unexpected characters after closing quote".to_string()),
            None => return Err("unterminated quoted value".to_string()),
        },
        _ => raw.split(" #").next().unwrap_or_default().trim_end(),
    };

    Ok(Some((key, value)))
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "vm201-poller {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(l: &str) -> Option<(&str, &str)> {
        parse_env_line(l).expect("valid line")
    }

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn env_lines() {
        assert_eq!(line("  # comment"), None);
        assert_eq!(line(""), None);
        assert_eq!(line("VM201_HOST=192.168.1.20 # board"), Some(("VM201_HOST", "192.168.1.20")));
        assert_eq!(line("VM201_PASSWORD=\"p#ss word\""), Some(("VM201_PASSWORD", "p#ss word")));
        assert_eq!(line("VM201_USERNAME='adm\\in' # local"), Some(("VM201_USERNAME", "adm\\in")));
        assert_eq!(line("EMPTY="), Some(("EMPTY", "")));
    }

    #[test]
    fn env_line_errors() {
        assert!(parse_env_line("NOEQUALS").is_err());
        assert!(parse_env_line("=value").is_err());
        assert!(parse_env_line("BAD KEY=1").is_err());
        assert!(parse_env_line("A=\"open").is_err());
        assert!(parse_env_line("A='x' trailing").is_err());
    }

    #[test]
    fn env_file_flag() {
        assert_eq!(env_file_arg(&args(&[])), Ok(None));
        assert_eq!(env_file_arg(&args(&["--env-file", "a.env"])), Ok(Some(PathBuf::from("a.env"))));
        assert_eq!(env_file_arg(&args(&["--env-file=b.env"])), Ok(Some(PathBuf::from("b.env"))));
        assert!(env_file_arg(&args(&["--env-file"])).is_err());
        assert!(env_file_arg(&args(&["--env-file="])).is_err());
        assert!(env_file_arg(&args(&["--verbose"])).is_err());
        assert!(env_file_arg(&args(&["--env-file=a", "--env-file=b"])).is_err());
    }
}
