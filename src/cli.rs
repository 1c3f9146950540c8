use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bbw", version, about = "Bitbucket Pipelines Watcher TUI")]
pub struct Cli {
    /// Repository in workspace/repo format, or just the slug with --workspace
    #[arg(short, long, required_unless_present = "demo")]
    pub repo: Option<String>,

    /// Bitbucket workspace owning --repo
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// Items fetched per page
    #[arg(short = 'n', long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=100))]
    pub page_len: u64,

    /// Background refresh interval in seconds
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Browse a simulated repository instead of Bitbucket
    #[arg(long)]
    pub demo: bool,

    /// Seconds between simulated step state changes (with --demo)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub step_poll: u64,

    /// Cancel an outstanding fetch when a newer one targets the same panel
    #[arg(long)]
    pub cancel_superseded: bool,

    /// Disable desktop notifications
    #[arg(long)]
    pub no_notify: bool,

    /// Enable verbose logging to $XDG_STATE_HOME/bbw/debug.log
    #[arg(long)]
    pub verbose: bool,
}

/// Resolve `(workspace, repo)` from `--repo` and an optional `--workspace`.
pub fn resolve_repo(workspace: Option<&str>, repo: &str) -> Result<(String, String), String> {
    match workspace {
        Some(ws) if !repo.contains('/') => parse_repo(&format!("{ws}/{repo}")),
        Some(ws) => {
            let (in_repo, slug) = parse_repo(repo)?;
            if in_repo == ws {
                Ok((in_repo, slug))
            } else {
                Err(format!(
                    "Workspace '{ws}' conflicts with repository '{repo}'."
                ))
            }
        }
        None => parse_repo(repo),
    }
}

/// Splits `workspace/repo`, rejecting anything with more or fewer than two
/// non-empty segments.
pub fn parse_repo(repo: &str) -> Result<(String, String), String> {
    let invalid = || {
        format!("Invalid repository '{repo}'. Expected 'workspace/repo' (e.g. 'atlassian/bbw').")
    };
    if repo.contains(char::is_whitespace) {
        return Err(invalid());
    }
    match repo.split('/').collect::<Vec<_>>().as_slice() {
        [workspace, slug] if !workspace.is_empty() && !slug.is_empty() => {
            Ok(((*workspace).to_string(), (*slug).to_string()))
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_repo() {
        assert_eq!(
            parse_repo("acme/api"),
            Ok(("acme".to_string(), "api".to_string()))
        );
    }

    #[test]
    fn invalid_repo_shapes() {
        assert!(parse_repo("noslash").is_err());
        assert!(parse_repo("/api").is_err());
        assert!(parse_repo("acme/").is_err());
        assert!(parse_repo("a/b/c").is_err());
        assert!(parse_repo("acme /api").is_err());
        assert!(parse_repo("").is_err());
    }

    #[test]
    fn workspace_flag() {
        assert_eq!(
            resolve_repo(Some("acme"), "api"),
            Ok(("acme".to_string(), "api".to_string()))
        );
        assert!(resolve_repo(Some("acme"), "acme/api").is_ok());
        assert!(resolve_repo(Some("other"), "acme/api").is_err());
        assert!(resolve_repo(Some(""), "api").is_err());
    }

    #[test]
    fn repo_required_unless_demo() {
        assert!(Cli::try_parse_from(["bbw"]).is_err());
        let cli = Cli::try_parse_from(["bbw", "--demo"]).unwrap();
        assert!(cli.demo);
        assert_eq!(cli.page_len, 10);
        assert_eq!(cli.interval, 10);
        assert_eq!(cli.step_poll, 5);
    }

    #[test]
    fn page_len_bounds() {
        assert!(Cli::try_parse_from(["bbw", "--demo", "--page-len", "0"]).is_err());
        assert!(Cli::try_parse_from(["bbw", "--demo", "--page-len", "101"]).is_err());
        let cli = Cli::try_parse_from(["bbw", "-r", "acme/api", "-n", "25"]).unwrap();
        assert_eq!(cli.page_len, 25);
        assert_eq!(cli.repo.as_deref(), Some("acme/api"));
    }
}
