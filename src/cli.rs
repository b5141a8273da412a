use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoscribe", about = "Autoscribe: scheduled AI article generation")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Generate articles now, outside the daily schedule
    Generate {
        /// How many articles to attempt (1-10)
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Show campaign progress
    Progress,

    /// Render and generate for a sample title without using the title pool
    TestPrompt {
        /// Sample title to generate for
        title: String,

        /// Store the result as a draft article
        #[arg(long)]
        save: bool,
    },

    /// List recent generation jobs
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Requeue a failed job
    Retry {
        /// Job ID
        job_id: String,
    },

    /// Cancel every queued job
    CancelPending,

    /// Reset progress counters and cancel queued jobs
    Reset {
        /// Also mark every title unused again
        #[arg(long)]
        titles: bool,
    },

    /// Manage the ready-title pool
    Titles {
        #[command(subcommand)]
        command: TitlesCommands,
    },

    /// Manage generation settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand)]
pub enum TitlesCommands {
    /// Append titles to the pool (one per argument, or one per line with --file)
    Add {
        titles: Vec<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List titles in pool order
    List,
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Print the current settings as TOML
    Show,
    /// Replace settings from a TOML file
    Import {
        path: PathBuf,
    },
}
