//! Entry point for the rdb-archiver daemon.

use std::path::PathBuf;

use rdb_archiver::config::{self, CONFIG_PATH_ENV};
use rdb_archiver::daemon;

fn main() {
    if let Err(err) = try_main() {
        eprintln!("rdb-archiver: {err}");
        std::process::exit(1);
    }
}

struct CliArgs {
    config: Option<PathBuf>,
    check_only: bool,
}

fn try_main() -> Result<(), String> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    let path = config::resolve_config_path(args.config).map_err(|err| err.to_string())?;
    if args.check_only {
        let report = daemon::check_config(&path).map_err(|err| err.to_string())?;
        print!("{report}");
        return Ok(());
    }
    daemon::run(path).map_err(|err| err.to_string())
}

fn parse_args(args: Vec<String>) -> Result<CliArgs, String> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", help_text());
        std::process::exit(0);
    }
    let mut parsed = CliArgs {
        config: None,
        check_only: false,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(next_value(&args, &mut i, "--config")?));
            }
            "--check-config" => parsed.check_only = true,
            unknown => return Err(format!("Unknown argument '{unknown}'\n\n{}", help_text())),
        }
        i += 1;
    }
    Ok(parsed)
}

fn next_value(args: &[String], i: &mut usize, name: &str) -> Result<String, String> {
    let next = args
        .get(*i + 1)
        .ok_or_else(|| format!("Missing value for {name}"))?;
    *i += 1;
    Ok(next.clone())
}

fn help_text() -> String {
    format!(
        "Usage: rdb-archiver [options]\n\n\
Options:\n\
  -c, --config <PATH>   Config file (default: ${CONFIG_PATH_ENV}, then the app directory)\n\
  --check-config        Validate the config, print the resolved layout and exit\n\
  -h, --help            Show help\n"
    )
}
