//! trackq: ask a project tracker questions in plain language.
//!
//! Environment:
//!   TRACKQ_CONFIG  - config file (default: ~/.config/trackq/config.toml)
//!   TRACKQ_*       - overrides, see `TrackqConfig::apply_env_overrides`
//!   LOG_FORMAT     - "json" or "text" (default: "text")
//!   RUST_LOG       - standard env filter (default: "trackq=info")

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackq_client::{HttpTrackerClient, OpenAiGenerator};
use trackq_core::config::TrackqConfig;
use trackq_core::{ProcessResponse, TrackerApi};
use trackq_engine::{QueryService, SessionManager};
use trackq_nlu::{compose, ExtractionContext, SlotExtractor, TemplateCorpus, TemplateMatcher};

#[derive(Parser)]
#[command(name = "trackq")]
#[command(author, version, about = "Natural-language queries over a project tracker")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (overrides TRACKQ_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Ask {
        /// The question, e.g. "open stories for Ashwin in CCM"
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive session that carries project and sprint between turns
    Repl {
        /// Session owner
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// List intent templates, or show how a question would be composed
    Templates {
        /// Compose this question offline instead of listing templates
        #[arg(long)]
        explain: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trackq=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let corpus = load_corpus(&config)?;

    match cli.command {
        Commands::Ask { query, json } => {
            let service = Arc::new(build_service(&config, corpus).await?);
            let sessions = SessionManager::new(service);
            let cancel = cancel_on_ctrl_c();
            let response = sessions.ask("local", &query.join(" "), &cancel).await;
            print_response(&response, json)?;
            Ok(if response.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Repl { user } => {
            let service = Arc::new(build_service(&config, corpus).await?);
            repl(SessionManager::new(service), &user).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Templates { explain } => {
            match explain {
                Some(query) => explain_query(corpus, &query),
                None => list_templates(&corpus),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackqConfig> {
    match path {
        Some(path) => {
            let mut config = TrackqConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        None => TrackqConfig::load().context("loading config"),
    }
}

fn load_corpus(config: &TrackqConfig) -> Result<TemplateCorpus> {
    match &config.templates_path {
        Some(path) => TemplateCorpus::from_file(path)
            .with_context(|| format!("loading templates from {}", path.display())),
        None => TemplateCorpus::builtin().context("loading built-in templates"),
    }
}

async fn build_service(config: &TrackqConfig, corpus: TemplateCorpus) -> Result<QueryService> {
    let client = HttpTrackerClient::new(config.tracker.clone())
        .context("building tracker client")?
        .with_user_limit(config.directory.user_limit);
    if let Err(e) = client.discover_fields().await {
        warn!(error = %e, "Field discovery failed, story points and sprints will be missing");
    }
    let tracker: Arc<dyn TrackerApi> = Arc::new(client);

    let mut service = QueryService::new(tracker, config, corpus);
    if let Some(llm) = &config.llm {
        let generator = OpenAiGenerator::new(llm.clone()).context("building text generator")?;
        info!(model = %llm.model, "Narration polish enabled");
        service = service.with_generator(Arc::new(generator));
    }
    Ok(service)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

fn print_response(response: &ProcessResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    println!("{}", response.response_text);
    if let Some(filter) = &response.filter_used {
        println!("  filter: {}", filter);
    }
    Ok(())
}

async fn repl(sessions: SessionManager, user: &str) -> Result<()> {
    println!("trackq {} (:history, :reset, :quit)", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("trackq> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            ":quit" | ":q" => break,
            ":reset" => {
                sessions.reset_context(user).await;
                println!("Context cleared.");
            }
            ":history" => {
                for entry in sessions.transcript(user).await {
                    println!(
                        "[{}] {} -> {}",
                        entry.asked_at.format("%H:%M:%S"),
                        entry.query,
                        entry.response.filter_used.as_deref().unwrap_or("-")
                    );
                }
            }
            query => {
                let cancel = cancel_on_ctrl_c();
                let response = sessions.ask(user, query, &cancel).await;
                print_response(&response, false)?;
            }
        }
    }
    Ok(())
}

fn list_templates(corpus: &TemplateCorpus) {
    for template in &corpus.templates {
        let marker = if corpus.default_template.as_deref() == Some(template.id.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{} [{}]{}", template.id, template.intent, marker);
        println!("  filter:   {}", template.filter_template);
        println!("  triggers: {}", template.trigger_phrases.join(" | "));
        for fallback in &template.fallbacks {
            println!("  fallback: {} -> {}", fallback.label, fallback.filter_template);
        }
    }
}

/// Compose without the tracker: no directory, so names stay unresolved.
fn explain_query(corpus: TemplateCorpus, query: &str) {
    let slots = SlotExtractor::new().extract(query, &ExtractionContext::new());
    for (kind, value) in slots.iter() {
        println!("slot {}: {} ({:.2})", kind, value.value, value.confidence);
    }
    let matcher = TemplateMatcher::new(corpus);
    let Some(matched) = matcher.match_template(query, &slots) else {
        println!("No template matches.");
        return;
    };
    println!(
        "template: {} (score {:.2}{})",
        matched.template.id,
        matched.score,
        matched.trigger.map(|t| format!(", trigger \"{}\"", t)).unwrap_or_default()
    );
    match compose(matched.template, &slots) {
        Ok(composed) => {
            println!("filter:   {}", composed.filter_expression);
            for fallback in &composed.fallbacks {
                println!("fallback: {} -> {}", fallback.label, fallback.filter);
            }
        }
        Err(e) => println!("Cannot compose: {}", e),
    }
}
