use std::path::PathBuf;
use thiserror::Error;

use crate::signal::{IconName, Signal};

pub const USAGE: &str = "\
kdesk - desktop icon manager

usage: kdesk [-c <file>] [-v] [option]

  (none)      run the desktop
  -r          reload configuration and icons of a running kdesk
  -i          reload icons only
  -a <name>   alert icon <name> (runs the IconHook)
  -b          toggle the blur overlay
  -w          paint the wallpaper and exit
  -q          exit 0 if kdesk is running, 1 otherwise
  -t          check the configuration and exit
  -j <name>   print the geometry of icon <name> as JSON
  -c <file>   use <file> instead of the system .kdeskrc
  -v          verbose logging
  -h          this help
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    /// Deliver a signal to the running instance.
    Send(Signal),
    Wallpaper,
    Probe,
    TestConfig,
    IconGeometry(String),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub command: Command,
    pub config_file: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("unknown option {0}")]
    Unknown(String),
    #[error("{0} needs a value")]
    MissingValue(&'static str),
    #[error("bad icon name: {0}")]
    BadIconName(String),
}

/// `args` excludes the program name.
pub fn parse(args: &[String]) -> Result<Options, ArgError> {
    let mut command = Command::Run;
    let mut config_file = None;
    let mut verbose = false;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-r" => command = Command::Send(Signal::Reload),
            "-i" => command = Command::Send(Signal::ReloadIcons),
            "-b" => command = Command::Send(Signal::Blur),
            "-a" => {
                let name = it.next().ok_or(ArgError::MissingValue("-a"))?;
                let name = IconName::new(name).map_err(|e| ArgError::BadIconName(e.to_string()))?;
                command = Command::Send(Signal::IconAlert(name));
            }
            "-w" => command = Command::Wallpaper,
            "-q" => command = Command::Probe,
            "-t" => command = Command::TestConfig,
            "-j" => {
                let name = it.next().ok_or(ArgError::MissingValue("-j"))?;
                command = Command::IconGeometry(name.clone());
            }
            "-c" => {
                let file = it.next().ok_or(ArgError::MissingValue("-c"))?;
                config_file = Some(PathBuf::from(file));
            }
            "-v" => verbose = true,
            "-h" | "--help" => command = Command::Help,
            other => return Err(ArgError::Unknown(other.to_string())),
        }
    }

    Ok(Options {
        command,
        config_file,
        verbose,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_runs_the_desktop() {
        let o = parse(&[]).unwrap();
        assert_eq!(o.command, Command::Run);
        assert_eq!(o.config_file, None);
        assert!(!o.verbose);
    }

    #[test]
    fn signal_flags_map_to_signals() {
        assert_eq!(parse(&args(&["-r"])).unwrap().command, Command::Send(Signal::Reload));
        assert_eq!(parse(&args(&["-i"])).unwrap().command, Command::Send(Signal::ReloadIcons));
        assert_eq!(parse(&args(&["-b"])).unwrap().command, Command::Send(Signal::Blur));
        assert_eq!(
            parse(&args(&["-a", "chromium"])).unwrap().command,
            Command::Send(Signal::IconAlert(IconName::new("chromium").unwrap()))
        );
    }

    #[test]
    fn config_file_and_verbose_combine_with_a_command() {
        let o = parse(&args(&["-v", "-c", "/tmp/rc", "-t"])).unwrap();
        assert_eq!(o.command, Command::TestConfig);
        assert_eq!(o.config_file, Some(PathBuf::from("/tmp/rc")));
        assert!(o.verbose);
    }

    #[test]
    fn missing_values_and_unknown_flags_fail() {
        assert_eq!(parse(&args(&["-a"])), Err(ArgError::MissingValue("-a")));
        assert_eq!(parse(&args(&["-j"])), Err(ArgError::MissingValue("-j")));
        assert_eq!(parse(&args(&["-x"])), Err(ArgError::Unknown("-x".into())));
        assert!(matches!(
            parse(&args(&["-a", "a-very-long-icon-name"])),
            Err(ArgError::BadIconName(_))
        ));
    }

    #[test]
    fn geometry_query_keeps_the_name() {
        assert_eq!(
            parse(&args(&["-j", "make-art"])).unwrap().command,
            Command::IconGeometry("make-art".into())
        );
    }
}
