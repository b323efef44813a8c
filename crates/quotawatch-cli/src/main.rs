use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Table};
use quotawatch_core::cache::FileCacheStore;
use quotawatch_core::config::{Config, default_config_path};
use quotawatch_core::fetch::{CommandFetcher, fetch, resolve_executable};
use quotawatch_core::models::{Provider, UsageWindow};
use quotawatch_core::state::{Interpretation, StateMachine, Trigger, ViewModel};
use quotawatch_core::Refresher;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quotawatch")]
#[command(about = "Cached usage and quota monitor for AI coding providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch once and print a table
    Status {
        #[arg(long)]
        provider: Option<String>,
    },
    /// Keep refreshing; type r, c or q followed by Enter
    Watch {
        #[arg(long)]
        interval: Option<u64>,
    },
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Print the cached view without fetching
    Cached,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Doctor,
}

#[derive(Subcommand)]
enum ConfigCommands {
    Set { key: String, value: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status { provider } => {
            let cfg = Config::from_default_path()?;
            let view = fetch_once(&cfg).await;
            render(&view, provider.as_deref());
        }
        Commands::Watch { interval } => {
            let mut cfg = Config::from_default_path()?;
            if let Some(secs) = interval {
                cfg.general.refresh_seconds = secs.max(1);
            }
            watch(cfg, interval).await?;
        }
        Commands::Export { format } => {
            if format != "json" {
                bail!("unsupported format: {}; only json is supported", format);
            }
            let cfg = Config::from_default_path()?;
            let view = fetch_once(&cfg).await;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Cached => {
            let cfg = Config::from_default_path()?;
            render(&cached_view(&cfg), None);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => config_set(&key, &value)?,
        },
        Commands::Doctor => doctor()?,
    }

    Ok(())
}

async fn fetch_once(cfg: &Config) -> ViewModel {
    let store = FileCacheStore::new(&cfg.general.cache_file);
    let mut machine = StateMachine::seed(store, Interpretation::from(cfg));
    machine.begin_refresh(Trigger::Manual);
    machine.complete(fetch(cfg.fetch_options()).await);
    machine.view(Utc::now())
}

fn cached_view(cfg: &Config) -> ViewModel {
    let store = FileCacheStore::new(&cfg.general.cache_file);
    StateMachine::seed(store, Interpretation::from(cfg)).view(Utc::now())
}

async fn watch(cfg: Config, interval_override: Option<u64>) -> Result<()> {
    let store = FileCacheStore::new(&cfg.general.cache_file);
    let (refresher, handle) = Refresher::new(cfg, CommandFetcher, store);
    let task = tokio::spawn(refresher.run());

    let mut views = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    clear_screen()?;
    render(&views.borrow_and_update().clone(), None);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                clear_screen()?;
                render(&view, None);
                println!("r = refresh, c = reload config, q = quit");
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match line.trim() {
                    "r" => handle.refresh(),
                    "c" => match Config::from_default_path() {
                        Ok(mut new) => {
                            if let Some(secs) = interval_override {
                                new.general.refresh_seconds = secs.max(1);
                            }
                            handle.reconfigure(new);
                        }
                        Err(e) => warn!("keeping current settings: {e:#}"),
                    },
                    "q" => break,
                    _ => {}
                },
                None => stdin_open = false,
            },
        }
    }

    handle.shutdown();
    task.await.context("refresher task failed")?;
    Ok(())
}

fn render(view: &ViewModel, only: Option<&str>) {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Provider",
            "Window",
            "Used%",
            "Left%",
            "Resets",
            "Account",
            "Plan",
            "Error",
        ]);

    let shown = view
        .providers
        .iter()
        .filter(|p| only.map_or(true, |id| p.id.eq_ignore_ascii_case(id)));

    for p in shown {
        let windows: Vec<&UsageWindow> = p.windows().collect();
        if windows.is_empty() {
            table.add_row(provider_row(p, None));
        }
        for w in windows {
            table.add_row(provider_row(p, Some(w)));
        }
    }

    let age = view
        .cache_age_seconds
        .map(|s| format!("{s}s old"))
        .unwrap_or_else(|| "no data".to_string());
    println!("{:?} ({:?}), {}", view.state, view.visual_severity, age);
    if let Some(err) = &view.last_error {
        println!("Last error: {err}");
    }
    println!(
        "Lowest left: {} {} | warning {} | critical {} | next reset {}",
        opt_pct(view.stats.min_remaining_percent),
        view.stats.urgent_provider_id.as_deref().unwrap_or(""),
        view.stats.warning_count,
        view.stats.critical_count,
        opt_dt(view.stats.next_reset_time)
    );
    println!("{}", table);
}

fn provider_row(p: &Provider, w: Option<&UsageWindow>) -> Vec<Cell> {
    let error = p
        .error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_default();
    vec![
        Cell::new(&p.display_name),
        Cell::new(w.map(|w| w.label.as_str()).unwrap_or("-")),
        Cell::new(opt_pct(w.map(|w| w.used_percent))),
        Cell::new(opt_pct(w.map(|w| w.remaining_percent))),
        Cell::new(w.map(reset_text).unwrap_or_else(|| "-".to_string())),
        Cell::new(p.account.as_deref().unwrap_or("-")),
        Cell::new(p.plan.as_deref().unwrap_or("-")),
        Cell::new(error),
    ]
}

fn reset_text(w: &UsageWindow) -> String {
    match (w.resets_at_local(), &w.reset_description) {
        (Some(dt), _) => dt.format("%Y-%m-%d %H:%M").to_string(),
        (None, Some(desc)) => desc.clone(),
        (None, None) => "-".to_string(),
    }
}

fn opt_pct(v: Option<f64>) -> String {
    v.map(|p| format!("{:.1}", p)).unwrap_or_else(|| "-".to_string())
}

fn opt_dt(v: Option<DateTime<Utc>>) -> String {
    v.map(|d| d.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn clear_screen() -> Result<()> {
    print!("\x1B[2J\x1B[1;1H");
    std::io::stdout().flush()?;
    Ok(())
}

fn config_set(key: &str, value: &str) -> Result<()> {
    let path = default_config_path();
    let mut cfg = Config::from_default_path()?;
    cfg.set_key(key, value)?;
    cfg.write_default(&path)?;
    println!("updated {}", path.display());
    Ok(())
}

fn doctor() -> Result<()> {
    let cfg_path = default_config_path();
    let cfg = Config::from_default_path()?;

    println!("Config: {}", cfg_path.display());
    println!(
        "Cache file: {} ({})",
        cfg.general.cache_file.display(),
        if cfg.general.cache_file.exists() { "ok" } else { "missing" }
    );
    match resolve_executable(&cfg.fetch_options()) {
        Ok(path) => println!("Usage source: {} (ok)", path.display()),
        Err(message) => println!("Usage source: {message}"),
    }

    let view = cached_view(&cfg);
    println!("Cached state: {:?} ({:?})", view.state, view.visual_severity);
    println!("Cached providers: {}", view.providers.len());
    if let Some(err) = view.last_error {
        println!("Last error: {err}");
    }

    Ok(())
}
