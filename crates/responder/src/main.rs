//! Responder CLI.
//!
//! `serve` runs the ingestion API with the escalation sweeper in the
//! background; `sweep` runs one escalation pass and exits, for cron-style
//! deployments; `check-config` validates the configuration file.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use notify::{
    EmailProvider, ProviderRegistry, SlackProvider, SmsProvider, WebhookProvider,
};
use responder::collaborators::{
    ChatCollaborator, DocumentCollaborator, HttpChatService, HttpDocumentService,
};
use responder::config::ResponderConfig;
use responder::directory::{Directory, PolicyDirectory, StaticDirectory};
use responder::escalation::{format_report_text, EscalationEngine};
use responder::server::{run_server, AppState};
use responder::{Coordinator, DedupEngine, IncidentStore, NotificationRouter};

/// Incident response orchestration engine
#[derive(Parser)]
#[command(name = "responder")]
#[command(about = "Incident response orchestration - alert dedup, lifecycle, routing, escalation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (falls back to RESPONDER_CONFIG, then
    /// responder.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion API and the escalation sweeper
    Serve {
        /// Address to bind to (overrides the config file)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Run one escalation sweep and exit (for cron deployments)
    Sweep,
    /// Validate the configuration file and print a summary
    CheckConfig,
}

/// Everything the commands need, wired once from config.
struct Engine {
    state: Arc<AppState>,
    escalation: Arc<EscalationEngine>,
    sweep_interval_secs: u64,
}

fn build_engine(config: &ResponderConfig) -> Result<Engine> {
    let directory = Arc::new(
        StaticDirectory::from_config(&config.directory)
            .context("Failed to build directory from config")?,
    );
    let store = Arc::new(IncidentStore::new());

    // Providers: unset channels are simply not registered
    let mut registry = ProviderRegistry::empty();
    let timeout = config.providers.send_timeout_secs;
    if let Some(url) = &config.providers.slack_webhook_url {
        registry.register(Arc::new(SlackProvider::new(url, timeout)));
        info!("Chat notifications enabled (Slack webhook)");
    }
    if let Some(email) = &config.providers.email {
        registry.register(Arc::new(EmailProvider::new(
            &email.endpoint,
            &email.api_key,
            &email.from_address,
            timeout,
        )));
        info!("Email notifications enabled");
    }
    if let Some(sms) = &config.providers.sms {
        registry.register(Arc::new(SmsProvider::new(
            &sms.endpoint,
            &sms.api_key,
            &sms.sender,
            timeout,
        )));
        info!("SMS notifications enabled");
    }
    if config.providers.webhook_enabled {
        registry.register(Arc::new(WebhookProvider::new(timeout)));
        info!("Webhook notifications enabled");
    }
    if registry.provider_count() == 0 {
        warn!("No notification providers configured");
    }

    let router = Arc::new(NotificationRouter::new(
        Arc::clone(&directory) as Arc<dyn Directory>,
        Arc::new(registry),
    ));

    let documents: Option<Arc<dyn DocumentCollaborator>> = config
        .collaborators
        .document_endpoint
        .as_ref()
        .map(|endpoint| {
            Arc::new(HttpDocumentService::new(
                endpoint,
                config.collaborators.timeout_secs,
            )) as Arc<dyn DocumentCollaborator>
        });
    let chat: Option<Arc<dyn ChatCollaborator>> =
        config.collaborators.chat_endpoint.as_ref().map(|endpoint| {
            Arc::new(HttpChatService::new(
                endpoint,
                config.collaborators.timeout_secs,
            )) as Arc<dyn ChatCollaborator>
        });

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&store),
        Arc::clone(&directory) as Arc<dyn Directory>,
        Arc::clone(&router),
        documents,
        chat,
        config.orchestration.clone(),
    ));

    let dedup = DedupEngine::new(
        Arc::clone(&store),
        Arc::clone(&directory) as Arc<dyn Directory>,
    );

    let escalation = Arc::new(EscalationEngine::new(
        Arc::clone(&store),
        Arc::clone(&directory) as Arc<dyn Directory>,
        Arc::clone(&directory) as Arc<dyn PolicyDirectory>,
        Arc::clone(&router),
        config.escalation.clone(),
    ));

    let state = Arc::new(AppState {
        store,
        directory: directory as Arc<dyn Directory>,
        dedup,
        coordinator,
    });

    Ok(Engine {
        state,
        escalation,
        sweep_interval_secs: config.escalation.sweep_interval_secs,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "responder=debug,notify=debug"
    } else {
        "responder=info,notify=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(ResponderConfig::default_path);
    let config = ResponderConfig::load(&config_path)?;

    match cli.command {
        Commands::Serve { addr } => {
            let engine = build_engine(&config)?;
            let addr = addr.unwrap_or_else(|| config.server.bind_addr.clone());

            // The sweeper runs on its own cadence, independent of the
            // request path
            let sweeper = Arc::clone(&engine.escalation);
            let interval_secs = engine.sweep_interval_secs;
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(interval_secs));
                loop {
                    interval.tick().await;
                    sweeper.sweep().await;
                }
            });

            run_server(engine.state, &addr).await?;
        }
        Commands::Sweep => {
            let engine = build_engine(&config)?;
            let report = engine.escalation.sweep().await;
            println!("{}", format_report_text(&report));
            if report.errors > 0 {
                println!("{}", format!("{} incident(s) errored", report.errors).red());
            } else {
                println!("{}", "Sweep completed without errors".green());
            }
        }
        Commands::CheckConfig => {
            let directory = StaticDirectory::from_config(&config.directory)
                .context("Invalid directory configuration")?;
            println!("{}", "Configuration OK".green().bold());
            println!("  Config file: {config_path}");
            println!("  Teams: {}", directory.team_count());
            println!("  Services: {}", config.directory.services.len());
            println!("  Policies: {}", config.directory.policies.len());
            println!(
                "  Providers: slack={} email={} sms={} webhook={}",
                config.providers.slack_webhook_url.is_some(),
                config.providers.email.is_some(),
                config.providers.sms.is_some(),
                config.providers.webhook_enabled,
            );
        }
    }

    Ok(())
}
