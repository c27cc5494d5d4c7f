//! Shell completion generation.

use {
    crate::{Cli, CliError},
    anyhow::Result,
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    std::{env, io, path::Path},
};

/// Write completions for `shell`, or for the user's login shell, to stdout.
pub(crate) fn cmd_completions(shell: Option<Shell>) -> Result<()> {
    let shell = shell
        .or_else(detect_shell_type)
        .ok_or_else(|| {
            CliError::Usage(
                "Could not detect the shell; specify one, e.g. `wilcboot completions bash`"
                    .to_string(),
            )
        })?;
    write_completions(shell, &mut io::stdout());
    Ok(())
}

fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, out);
}

/// Detect the user's current shell from environment.
fn detect_shell_type() -> Option<Shell> {
    env::var("SHELL")
        .ok()
        .and_then(|path| shell_from_path(&path))
}

/// Map a shell binary path such as `/bin/zsh` to its `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("/bin/tcsh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_bash_completions_name_the_binary() {
        let mut out = Vec::new();
        write_completions(Shell::Bash, &mut out);
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("_wilcboot()"));
        assert!(script.contains("bringup"));
    }

    #[test]
    fn test_fish_completions_list_subcommands() {
        let mut out = Vec::new();
        write_completions(Shell::Fish, &mut out);
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("list-ports"));
    }
}
