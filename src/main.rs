use anyhow::Context;
use clap::Parser;
use dioxus::desktop::{Config, LogicalSize, WindowBuilder};
use localchat::api;
use localchat::app::{window_title, App, LaunchContext, WINDOW_HEIGHT, WINDOW_WIDTH};
use localchat::cli::{Cli, Command, ServeArgs};
use localchat::logging::init_logging;
use localchat::service::ChatService;
use localchat::storage::env_file::default_env_path;
use localchat::types::config::{ChatConfig, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_path = cli.env_file.clone().unwrap_or_else(default_env_path);
    load_env_file(&env_path)?;
    init_logging();

    let config = ChatConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        "Model: {} (precision={}, device_map={})",
        config.model_id,
        config.precision,
        config.device_map
    );
    let service = Arc::new(ChatService::new(config));

    match cli.command() {
        Command::Gui => run_gui(service, env_path, None),
        Command::Serve(args) => {
            let server = server_config(&args)?;
            runtime()?.block_on(api::serve(service, server))
        }
        Command::Both(args) => {
            let server = server_config(&args)?;
            let addr = server.addr();
            let api_service = service.clone();

            std::thread::Builder::new()
                .name("api".to_string())
                .spawn(move || {
                    let result = runtime().and_then(|rt| rt.block_on(api::serve(api_service, server)));
                    if let Err(e) = result {
                        tracing::error!("API server stopped: {:#}", e);
                    }
                })
                .context("failed to start the API thread")?;

            run_gui(service, env_path, Some(addr))
        }
    }
}

/// Values from the `.env` file never override variables already set.
fn load_env_file(path: &Path) -> anyhow::Result<()> {
    if path.is_file() {
        dotenvy::from_path(path).with_context(|| format!("failed to read {}", path.display()))?;
    }
    Ok(())
}

fn server_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut server = ServerConfig::from_env().context("invalid server configuration")?;
    if let Some(host) = &args.host {
        server.host = host.clone();
    }
    if let Some(port) = args.port {
        server.port = port;
    }
    Ok(server)
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the Tokio runtime")
}

fn run_gui(
    service: Arc<ChatService>,
    env_path: PathBuf,
    api_addr: Option<String>,
) -> anyhow::Result<()> {
    let config = service.config();
    let window = WindowBuilder::new()
        .with_title(window_title(
            &config.model_id,
            config.precision,
            api_addr.as_deref(),
        ))
        .with_inner_size(LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));

    dioxus::LaunchBuilder::desktop()
        .with_cfg(Config::new().with_window(window))
        .with_context(LaunchContext {
            service,
            env_path,
            api_addr,
        })
        .launch(App);

    Ok(())
}
