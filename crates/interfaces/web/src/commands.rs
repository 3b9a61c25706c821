//! Offline maintenance commands.  These open the document store directly,
//! so run them while the server is stopped.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use mindful_config::AppConfig;
use mindful_llm::{ChatModel, OllamaClient};
use mindful_memory::VectorMemory;
use mindful_store::Store;

pub async fn doctor(config: &AppConfig) -> Result<()> {
    println!("mindful doctor");
    println!("- bind address: {}", config.server.bind);
    println!("- ollama: {}", config.llm.ollama_base_url);
    println!("- chat model: {}", config.llm.chat_model);
    println!(
        "- embedding model: {} ({} dims)",
        config.embedding.model, config.embedding.dimension
    );
    println!("- data dir: {}", config.memory.data_dir);
    println!("- store: {}", config.store.path);
    println!(
        "- retrieval: top {} similar, last {} messages",
        config.memory.retrieval_top_k, config.memory.recent_window
    );
    println!("- crisis keywords: {}", config.safety.crisis_keywords.len());

    let client = OllamaClient::from_config(&config.llm, &config.embedding)?;
    let models = match client.list_models().await {
        Ok(models) => models,
        Err(err) => {
            println!("- model check: FAILED ({err:#})");
            return Ok(());
        }
    };
    for wanted in [&config.llm.chat_model, &config.embedding.model] {
        let status = if has_model(&models, wanted) { "installed" } else { "MISSING" };
        println!("- {wanted}: {status}");
    }

    match client
        .complete(
            &config.llm.system_prompt,
            "[healthcheck] Reply with a short single-line confirmation.",
        )
        .await
    {
        Ok(reply) => println!("- model check: ok ({})", first_line(&reply)),
        Err(err) => println!("- model check: FAILED ({err:#})"),
    }
    Ok(())
}

pub async fn memory_stats(config: &AppConfig, user: &str) -> Result<()> {
    let user_id = resolve_user_id(config, user)?;
    let memory = memory_for(config)?;
    let stats = memory.stats(&user_id).await?;

    println!("── memory stats ─────────────────────────────────────");
    println!("user:               {user_id}");
    println!("vectors:            {}", stats.vectors);
    println!("transcript records: {}", stats.transcript_records);
    if stats.vectors != stats.transcript_records {
        println!("index and transcript disagree; run `mindful memory reindex --user {user}`");
    }
    Ok(())
}

pub async fn memory_reindex(config: &AppConfig, user: &str) -> Result<()> {
    let user_id = resolve_user_id(config, user)?;
    let memory = memory_for(config)?;
    let index = memory.reindex(&user_id).await?;
    println!("rebuilt index for {user_id}: {} vectors", index.len());
    Ok(())
}

pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    AppConfig::default().save_to(path)?;
    println!("wrote default configuration to {}", path.display());
    Ok(())
}

fn memory_for(config: &AppConfig) -> Result<VectorMemory> {
    let client = Arc::new(OllamaClient::from_config(&config.llm, &config.embedding)?);
    Ok(VectorMemory::from_config(&config.memory, client))
}

/// Accepts a username or a raw user id.
fn resolve_user_id(config: &AppConfig, user: &str) -> Result<String> {
    if !Path::new(&config.store.path).exists() {
        return Ok(user.to_string());
    }
    let store = Store::open(&config.store.path)
        .context("opening the store; is the server still running?")?;
    Ok(store
        .users()
        .find_by_username(user)?
        .map(|found| found.id)
        .unwrap_or_else(|| user.to_string()))
}

/// Ollama reports tags such as `nomic-embed-text:latest`.
fn has_model(installed: &[String], wanted: &str) -> bool {
    installed.iter().any(|name| {
        name == wanted
            || name
                .strip_prefix(wanted)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
