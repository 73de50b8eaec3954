use common::config::{RunMode, DEFAULT_CONFIG_PATH};

pub const USAGE: &str = "\
usage: tracker [run] [--mode bulk|stealth] [--concurrency N] [--config PATH]
       tracker diff [--config PATH]
       tracker help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Resolve every wallet, write a snapshot, then diff.
    Run,
    /// Only diff the two latest snapshots.
    Diff,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub command: Command,
    pub config_path: String,
    pub mode: Option<RunMode>,
    pub concurrency: Option<usize>,
}

fn flag_value<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("{flag} needs a value\n{USAGE}"))
}

pub fn parse_args<I>(mut args: I) -> Result<Cli, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let mut cli = Cli {
        command: Command::Run,
        config_path: DEFAULT_CONFIG_PATH.to_string(),
        mode: None,
        concurrency: None,
    };
    let mut saw_command = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "run" | "diff" | "help" if !saw_command => {
                saw_command = true;
                cli.command = match arg.as_str() {
                    "run" => Command::Run,
                    "diff" => Command::Diff,
                    _ => Command::Help,
                };
            }
            "-h" | "--help" => cli.command = Command::Help,
            "--config" => cli.config_path = flag_value(&mut args, "--config")?,
            "--mode" => {
                let v = flag_value(&mut args, "--mode")?;
                cli.mode = Some(v.parse().map_err(|e| format!("{e}\n{USAGE}"))?);
            }
            "--concurrency" => {
                let v = flag_value(&mut args, "--concurrency")?;
                let n: usize = v
                    .parse()
                    .map_err(|_| format!("--concurrency expects a positive integer, got {v:?}"))?;
                if n == 0 {
                    return Err("--concurrency must be at least 1".to_string());
                }
                cli.concurrency = Some(n);
            }
            other => return Err(format!("unknown argument: {other}\n{USAGE}")),
        }
    }

    if cli.command == Command::Diff && (cli.mode.is_some() || cli.concurrency.is_some()) {
        return Err(format!("diff takes only --config\n{USAGE}"));
    }
    Ok(cli)
}
