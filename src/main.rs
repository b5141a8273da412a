mod cli;
mod clock;
mod config;
mod daemon;
mod db;
mod error;
mod images;
mod ledger;
mod llm;
mod models;
mod notify;
mod parser;
mod persist;
mod pipeline;
mod prompt;
mod scheduler;
mod server;
mod slug;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands, SettingsCommands, TitlesCommands};
use crate::config::{Config, load_config, validate_config};
use crate::models::Settings;
use crate::scheduler::{GenerationSummary, Providers, Scheduler, SlotStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.autoscribe.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    let Some(command) = cli.command else {
        return daemon::run(config).await;
    };

    if let Commands::Validate = command {
        println!("Configuration is valid.");
        return Ok(());
    }

    let scheduler = open_scheduler(&config).await?;

    match command {
        Commands::Validate => {}
        Commands::Generate { count } => match scheduler.generate_now(count).await? {
            Some(summary) => print_summary(&summary),
            None => println!("Generation settings are not configured. Run 'autoscribe settings import <file>' first."),
        },
        Commands::Progress => {
            let p = scheduler.get_progress().await?;
            if !p.configured {
                println!("Generation settings are not configured.");
                return Ok(());
            }
            println!("Generated:       {}/{} ({}%)", p.generated, p.total, p.progress_percentage);
            println!("Remaining:       {}", p.remaining);
            println!("Completed today: {}", p.completed_today);
            println!("Due now:         {}", p.due_now);
            println!("Unused titles:   {}", p.unused_titles);
            println!("Active:          {}", p.is_active);
            if let Some(last) = p.last_generated_at {
                println!("Last generated:  {}", last.to_rfc3339());
            }
        }
        Commands::TestPrompt { title, save } => {
            let preview = scheduler.test_prompt(None, &title, save).await?;
            println!("--- prompt ---\n{}\n", preview.prompt);
            println!("--- {} ---\n{}\n", preview.parsed.title, preview.parsed.body);
            println!("Meta title:       {}", preview.parsed.seo.meta_title);
            println!("Meta description: {}", preview.parsed.seo.meta_description);
            println!("Keywords:         {}", preview.parsed.seo.keywords.join(", "));
            if let Some(article) = preview.article {
                println!("Saved as draft: {} ({})", article.slug, article.id);
            }
        }
        Commands::Jobs { limit } => {
            for job in scheduler.list_jobs(limit).await? {
                println!(
                    "{}  {:<10}  attempts={}  {}{}",
                    job.id,
                    job.status.as_str(),
                    job.attempts,
                    job.title,
                    job.failure_reason.map(|r| format!("  ({r})")).unwrap_or_default()
                );
            }
        }
        Commands::Retry { job_id } => {
            if scheduler.retry_job(&job_id).await? {
                println!("Job {job_id} requeued.");
            } else {
                println!("Job {job_id} was not requeued (no attempts left or its title is taken).");
            }
        }
        Commands::CancelPending => {
            let count = scheduler.cancel_pending_jobs().await?;
            println!("Cancelled {count} pending job(s).");
        }
        Commands::Reset { titles } => {
            let report = scheduler.reset_progress(titles).await?;
            println!(
                "Progress reset. Cancelled {} pending job(s), reset {} title(s).",
                report.cancelled_jobs, report.titles_reset
            );
        }
        Commands::Titles { command } => match command {
            TitlesCommands::Add { mut titles, file } => {
                if let Some(path) = file {
                    let content =
                        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
                    titles.extend(content.lines().map(str::to_string));
                }
                let added = scheduler.add_titles(&titles).await?;
                println!("Added {} title(s).", added.len());
            }
            TitlesCommands::List => {
                for (i, t) in scheduler.list_titles().await?.iter().enumerate() {
                    let mark = if t.used { "x" } else { " " };
                    println!("{:>4}. [{mark}] {}", i + 1, t.title);
                }
            }
        },
        Commands::Settings { command } => match command {
            SettingsCommands::Show => match scheduler.settings().await? {
                Some(mut settings) => {
                    settings.ready_titles.clear();
                    print!("{}", toml::to_string_pretty(&settings).context("rendering settings")?);
                }
                None => println!("Generation settings are not configured."),
            },
            SettingsCommands::Import { path } => {
                let content =
                    std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
                let settings: Settings =
                    toml::from_str(&content).with_context(|| format!("parsing settings from {}", path.display()))?;
                let saved = scheduler.update_settings(settings).await?;
                println!(
                    "Settings saved: {} article(s) total, {} per day at {}, active={}.",
                    saved.total_articles_needed,
                    saved.articles_per_day,
                    saved.generation_time.format("%H:%M"),
                    saved.is_active
                );
            }
        },
    }

    Ok(())
}

async fn open_scheduler(config: &Config) -> Result<Scheduler> {
    let pool = db::create_pool(config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");
    Ok(Scheduler::new(pool, config, Providers::from_config(config)))
}

fn print_summary(summary: &GenerationSummary) {
    println!(
        "Requested {}: {} completed, {} failed, {} skipped.",
        summary.requested, summary.completed, summary.failed, summary.skipped
    );
    for slot in &summary.slots {
        let title = slot.title.as_deref().unwrap_or("-");
        match slot.status {
            SlotStatus::Completed => println!("  ok      {title}"),
            SlotStatus::Failed => println!(
                "  failed  {title}: {}",
                slot.failure_reason.as_deref().unwrap_or("unknown error")
            ),
            SlotStatus::Skipped => println!(
                "  skipped {title} ({})",
                slot.failure_reason.as_deref().unwrap_or("nothing to do")
            ),
        }
    }
}
