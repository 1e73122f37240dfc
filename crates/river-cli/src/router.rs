//! Command routing logic for CLI

use anyhow::Result;
use river_core::RiverConfig;

use crate::args::{Cli, Commands, ConfigAction, SessionsAction};
use crate::commands;
use crate::commands::run::RunArgs;

/// Route CLI commands to their respective handlers
pub async fn route(cli: Cli, mut config: RiverConfig) -> Result<()> {
    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            commands::serve::execute(&config).await
        }
        Commands::Run {
            stream,
            input,
            credential,
            session_id,
            detach_after,
            json,
        } => {
            let args = RunArgs {
                stream,
                input,
                credential,
                session_id,
                detach_after,
                json,
            };
            commands::run::execute(&config, args).await
        }
        Commands::Resume { token, json } => commands::resume::execute(&config, &token, json).await,
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list(&config).await,
            SessionsAction::Sweep => commands::sessions::sweep(&config).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&config, cli.global.config.as_deref()),
            ConfigAction::Validate => commands::config::validate(&config),
        },
    }
}
