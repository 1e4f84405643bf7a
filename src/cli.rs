//! Command-line interface
//!
//! `localchat` opens the chat window, `localchat serve` runs only the HTTP
//! shim and `localchat both` runs the shim next to the window.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "localchat",
    version,
    about = "Chat with a local GGUF model in a desktop window or over HTTP",
    after_help = "EXAMPLES:\n    \
                  localchat                       # Open the chat window\n    \
                  localchat serve --port 8080     # Run only the HTTP API\n    \
                  localchat both                  # Window and API together"
)]
pub struct Cli {
    /// `.env` file to load (and to update from the settings dialog)
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Open the desktop chat window (default)
    Gui,
    /// Serve the OpenAI-compatible HTTP API
    Serve(ServeArgs),
    /// Serve the HTTP API and open the chat window
    Both(ServeArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct ServeArgs {
    /// Address to bind [env: API_HOST, default 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind [env: API_PORT, default 5000]
    #[arg(long)]
    pub port: Option<u16>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Gui)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_gui() {
        let cli = Cli::try_parse_from(["localchat"]).unwrap();
        assert_eq!(cli.command(), Command::Gui);
        assert!(cli.env_file.is_none());
    }

    #[test]
    fn test_serve_args() {
        let cli = Cli::try_parse_from([
            "localchat",
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--env-file",
            "custom.env",
        ])
        .unwrap();
        assert_eq!(
            cli.command(),
            Command::Serve(ServeArgs {
                host: Some("127.0.0.1".to_string()),
                port: Some(8080),
            })
        );
        assert_eq!(cli.env_file, Some(PathBuf::from("custom.env")));
    }

    #[test]
    fn test_both_without_overrides() {
        let cli = Cli::try_parse_from(["localchat", "both"]).unwrap();
        assert_eq!(cli.command(), Command::Both(ServeArgs::default()));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["localchat", "serve", "--port", "http"]).is_err());
    }
}
