use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cronrun_core::config::CommandConfig;

/// A job's `command_name` turned into something the runner can spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: PathBuf,
    /// Placed before the job's own arguments (e.g. the script an
    /// interpreter should run).
    pub leading_args: Vec<String>,
}

/// Looks up the executable behind a job's `command_name`.
pub trait CommandResolver: Send + Sync {
    /// `None` means the command cannot be run on this host.
    fn resolve(&self, command_name: &str) -> Option<ResolvedCommand>;
}

/// Resolves configured aliases first, then paths, then `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredResolver {
    aliases: BTreeMap<String, CommandConfig>,
}

impl ConfiguredResolver {
    pub fn new(aliases: BTreeMap<String, CommandConfig>) -> Self {
        Self { aliases }
    }
}

impl CommandResolver for ConfiguredResolver {
    fn resolve(&self, command_name: &str) -> Option<ResolvedCommand> {
        match self.aliases.get(command_name) {
            Some(alias) => Some(ResolvedCommand {
                program: locate(&alias.program)?,
                leading_args: alias.args.clone(),
            }),
            None => Some(ResolvedCommand {
                program: locate(command_name)?,
                leading_args: Vec::new(),
            }),
        }
    }
}

/// Names containing a separator are taken as paths; bare names are searched
/// on `PATH`.
fn locate(program: &str) -> Option<PathBuf> {
    if program.trim().is_empty() {
        return None;
    }
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(program).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(entries: &[(&str, &str, &[&str])]) -> ConfiguredResolver {
        ConfiguredResolver::new(
            entries
                .iter()
                .map(|(name, program, args)| {
                    (
                        name.to_string(),
                        CommandConfig {
                            program: program.to_string(),
                            args: args.iter().map(|a| a.to_string()).collect(),
                        },
                    )
                })
                .collect(),
        )
    }

    #[cfg(unix)]
    #[test]
    fn alias_supplies_program_and_leading_args() {
        let r = resolver(&[("report", "/bin/sh", &["-c"])]);
        let resolved = r.resolve("report").expect("resolved");
        assert_eq!(resolved.program, PathBuf::from("/bin/sh"));
        assert_eq!(resolved.leading_args, vec!["-c"]);
    }

    #[cfg(unix)]
    #[test]
    fn bare_names_are_found_on_path() {
        let resolved = ConfiguredResolver::default().resolve("sh").expect("sh on PATH");
        assert!(resolved.program.is_absolute());
        assert!(resolved.leading_args.is_empty());
    }

    #[test]
    fn unknown_commands_do_not_resolve() {
        let r = ConfiguredResolver::default();
        assert!(r.resolve("cronrun-no-such-command-xyz").is_none());
        assert!(r.resolve("/nonexistent/dir/tool").is_none());
        assert!(r.resolve("").is_none());
    }

    #[test]
    fn alias_to_missing_program_does_not_resolve() {
        let r = resolver(&[("broken", "/nonexistent/php", &["console"])]);
        assert!(r.resolve("broken").is_none());
    }
}
