// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use tove_config::{Config, ModelConfig};
use tove_core::{Agent, AgentEvent};
use tove_model::{AnthropicProvider, MockProvider, ModelProvider};
use tove_store::{Delivery, PermissionEvent, Store};
use tove_tools::PermissionBroker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowConfig => {
                let config = tove_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config)?);
                return Ok(());
            }
            Commands::ListModels { json } => return list_models(*json),
            Commands::Sessions { limit } => {
                let config = tove_config::load(cli.config.as_deref())?;
                return list_sessions(&config, *limit).await;
            }
        }
    }

    let prompt = cli
        .prompt
        .clone()
        .context("nothing to do: pass a prompt or a subcommand")?;

    let config = Arc::new(tove_config::load(cli.config.as_deref())?);
    let store = Arc::new(Store::open(std::path::Path::new(
        &config.store.resolved_path(),
    ))?);
    let provider = build_provider(&config, cli.model.as_deref())?;

    let broker = {
        let b = PermissionBroker::new(
            Arc::clone(store.bus()),
            config.agent.safe_shell_allowlist.clone(),
        );
        Arc::new(if cli.yes { b.with_auto_response(true) } else { b })
    };
    if !cli.yes {
        spawn_permission_prompter(Arc::clone(&store), Arc::clone(&broker));
    }

    let external = tove_mcp::discover(&config.mcp, Arc::clone(&broker)).await;
    let agent = Agent::new(
        Arc::clone(&store),
        provider,
        Arc::new(config.agent.clone()),
        broker,
    )
    .with_external_tools(external);

    let session_id = match &cli.session {
        Some(id) => store.get_session(id).await?.id,
        None => {
            let title: String = prompt.chars().take(80).collect();
            store.create_session(None, title).await?.id
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let mut rx = agent.run(cancel, &session_id, &prompt, vec![]).await?;
    let mut exit_code = 0;
    while let Some(event) = rx.recv().await {
        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match event {
            AgentEvent::Progress { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::Thinking { .. } => {}
            AgentEvent::ToolStarted { name, .. } => eprintln!("⚙ {name} …"),
            AgentEvent::ToolFinished { is_error, result, .. } => {
                if is_error {
                    eprintln!("⚙ failed: {}", result.lines().next().unwrap_or(""));
                }
            }
            AgentEvent::TurnComplete { usage } => {
                eprintln!(
                    "\n[{} in / {} out tokens]",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
            AgentEvent::AutoContinue { .. } => eprintln!("↻ continuing with open todos"),
            AgentEvent::Error { fatal, message } => {
                eprintln!("error{}: {message}", if fatal { " (fatal)" } else { "" });
                if fatal {
                    exit_code = 1;
                }
            }
            AgentEvent::Done => {}
        }
    }
    eprintln!("session: {session_id}");
    std::process::exit(exit_code);
}

fn build_provider(
    config: &Config,
    model_flag: Option<&str>,
) -> anyhow::Result<Arc<dyn ModelProvider>> {
    let model_cfg: ModelConfig = match model_flag {
        Some(key) => config
            .providers
            .get(key)
            .cloned()
            .with_context(|| format!("no provider named {key:?} in config"))?,
        None => config.model.clone(),
    };
    let api_key = model_cfg.api_key.clone().or_else(|| {
        model_cfg
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    });
    match model_cfg.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            model_cfg.name.clone(),
            api_key,
            model_cfg.base_url.clone(),
            model_cfg.max_tokens,
            model_cfg.temperature,
        ))),
        "mock" => Ok(Arc::new(MockProvider::default())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// Answer permission prompts on the terminal.  Subscribes to the
/// permission topic and resolves each request from a y/n read off stdin.
fn spawn_permission_prompter(store: Arc<Store>, broker: Arc<PermissionBroker>) {
    let mut sub = store.bus().permissions.subscribe();
    tokio::spawn(async move {
        while let Some(delivery) = sub.recv().await {
            let Delivery::Event(PermissionEvent::Requested(prompt)) = delivery else {
                continue;
            };
            let question = format!(
                "allow {} ({}): {}? [y/N] ",
                prompt.tool, prompt.action, prompt.description
            );
            let answer = tokio::task::spawn_blocking(move || {
                eprint!("{question}");
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
                matches!(line.trim(), "y" | "Y" | "yes")
            })
            .await
            .unwrap_or(false);
            broker.resolve(&prompt.id, answer);
        }
    });
}

fn list_models(json: bool) -> anyhow::Result<()> {
    let models = tove_model::static_catalog();
    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    for m in models {
        println!(
            "{:12} {:24} {:>8} ctx  ${:.2}/M in  ${:.2}/M out",
            m.provider, m.id, m.context_window, m.cost_per_million_in, m.cost_per_million_out
        );
    }
    Ok(())
}

async fn list_sessions(config: &Config, limit: usize) -> anyhow::Result<()> {
    let store = Store::open(std::path::Path::new(&config.store.resolved_path()))?;
    for s in store.list_sessions().await?.into_iter().take(limit) {
        println!(
            "{}  {:5} msgs  ${:.4}  {}",
            s.id, s.message_count, s.cost, s.title
        );
    }
    Ok(())
}
