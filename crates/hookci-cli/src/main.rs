//! hookci CLI tool.

use clap::{Parser, Subcommand};
use hookci_core::GitFolderHandling;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "hookci")]
#[command(about = "hookci CI CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// hookci server URL
    #[arg(long, env = "HOOKCI_SERVER_URL", default_value = "http://localhost:4042")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one build; the build data is read as a JSON line from stdin
    RunBuild {
        /// What to do with the .git folder of the workspace
        #[arg(long, default_value = "delete-before-build")]
        git_folder_handling: GitFolderHandling,
        /// Run ssh with -v
        #[arg(long)]
        ssh_verbose: bool,
        /// Workspace directory to clone into
        workspace: PathBuf,
        /// Candidate build scripts, tried in order
        #[arg(required = true)]
        scripts: Vec<String>,
    },
    /// Validate a server configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "hookci.kdl")]
        path: PathBuf,
    },
    /// Print a new random repository secret
    GenSecret,
    /// Queue a build of a repository
    Trigger {
        /// Repository name, e.g. acme/widget
        repository: String,
        /// Ref to build
        #[arg(long = "ref", default_value = "refs/heads/main")]
        git_ref: String,
        /// Commit to build; defaults to whatever the ref points at
        #[arg(long)]
        commit: Option<String>,
        /// Repository secret
        #[arg(long, env = "HOOKCI_REPOSITORY_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Show a build
    Show {
        /// Build ID
        id: i64,
    },
    /// Cancel a queued or running build
    Cancel {
        /// Build ID
        id: i64,
    },
    /// Queue a finished build again
    Restart {
        /// Build ID
        id: i64,
    },
    /// Delete a finished build and its files
    Delete {
        /// Build ID
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Runner stdout is the build log, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let server = cli.server_url.trim_end_matches('/');

    match cli.command {
        Commands::RunBuild {
            git_folder_handling,
            ssh_verbose,
            workspace,
            scripts,
        } => {
            let args = commands::run_build::RunBuildArgs {
                git_folder_handling,
                ssh_verbose,
                workspace,
                scripts,
            };
            return commands::run_build::run(args).await;
        }
        Commands::Validate { path } => commands::validate(&path)?,
        Commands::GenSecret => commands::gen_secret(),
        Commands::Trigger {
            repository,
            git_ref,
            commit,
            secret,
        } => commands::builds::trigger(server, &repository, &git_ref, commit, &secret).await?,
        Commands::Show { id } => commands::builds::show(server, id).await?,
        Commands::Cancel { id } => commands::builds::cancel(server, id).await?,
        Commands::Restart { id } => commands::builds::restart(server, id).await?,
        Commands::Delete { id } => commands::builds::delete(server, id).await?,
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_runner_arguments() {
        let cli = Cli::try_parse_from([
            "hookci",
            "run-build",
            "--git-folder-handling",
            "delete-after-build",
            "--ssh-verbose",
            "/b/acme/widget/1",
            ".hookci.sh",
            ".hookci.cmd",
        ])
        .unwrap();

        let Commands::RunBuild {
            git_folder_handling,
            ssh_verbose,
            workspace,
            scripts,
        } = cli.command
        else {
            panic!("expected run-build");
        };
        assert_eq!(git_folder_handling, GitFolderHandling::DeleteAfterBuild);
        assert!(ssh_verbose);
        assert_eq!(workspace, PathBuf::from("/b/acme/widget/1"));
        assert_eq!(scripts, vec![".hookci.sh", ".hookci.cmd"]);
    }

    #[test]
    fn test_runner_requires_scripts() {
        assert!(Cli::try_parse_from(["hookci", "run-build", "/b/acme/widget/1"]).is_err());
        assert!(
            Cli::try_parse_from([
                "hookci",
                "run-build",
                "--git-folder-handling",
                "sometimes",
                "/b",
                ".hookci.sh"
            ])
            .is_err()
        );
    }
}
