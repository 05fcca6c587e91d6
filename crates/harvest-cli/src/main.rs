use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use harvest_adapters::{FixtureScrapeService, ScrapeService, SourceRegistry};
use harvest_core::{OpportunityType, ScrapeOptions};
use harvest_pipeline::{
    CancelFlag, ExtractRequestItem, Harvest, HarvestConfig, Progress, ProgressSink,
    SectionExtractor, WorkingSet,
};
use harvest_storage::PgStore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "harvest-cli")]
#[command(about = "Opportunity harvesting command-line interface")]
struct Cli {
    /// Serve scrape results from a fixture pack instead of the scrape service.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape listing pages and print one outcome per URL.
    Scrape {
        /// Saved source name from sources.yaml.
        #[arg(long, conflicts_with = "url")]
        source: Option<String>,
        #[arg(long)]
        url: Vec<String>,
        #[arg(long = "field")]
        fields: Vec<String>,
        #[arg(long = "type", default_value = "job")]
        opportunity_type: OpportunityType,
        /// Extract every candidate found.
        #[arg(long, conflicts_with = "save")]
        extract: bool,
        /// Save every candidate found as a raw scraped row.
        #[arg(long)]
        save: bool,
    },
    /// Extract full postings from their detail pages.
    Extract {
        #[arg(long, required = true)]
        url: Vec<String>,
        #[arg(long = "type", default_value = "job")]
        opportunity_type: OpportunityType,
        #[arg(long)]
        title: Option<String>,
    },
    /// Clean a stored record's sections and mark it polished.
    Polish { id: Uuid },
    /// List saved sources.
    Sources,
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    Migrate,
}

/// Prints batch progress to stderr.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&mut self, progress: Progress) {
        eprintln!("[{}/{}]", progress.current, progress.total);
    }
}

async fn build_harvest(config: &HarvestConfig, fixture: Option<&PathBuf>) -> Result<Harvest> {
    let Some(path) = fixture else {
        return Harvest::from_config(config).await;
    };
    let http = config.build_http_client()?;
    let scraper: Arc<dyn ScrapeService> = Arc::new(FixtureScrapeService::load(path)?);
    info!(fixture = %path.display(), "scraping from fixture pack");
    Ok(Harvest::assemble(
        config.open_store().await?,
        scraper,
        SectionExtractor::new(config.text_model(&http)),
        config.polish_on_extract,
    ))
}

/// A flag that trips on the first Ctrl-C; work already finished is kept.
fn ctrl_c_flag() -> CancelFlag {
    let cancel = CancelFlag::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });
    cancel
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HarvestConfig::from_env();

    match cli.command {
        Commands::Scrape {
            source,
            url,
            fields,
            opportunity_type,
            extract,
            save,
        } => {
            let harvest = build_harvest(&config, cli.fixture.as_ref()).await?;
            let (urls, fields, options, opportunity_type) = match source {
                Some(name) => {
                    let registry = SourceRegistry::load(config.sources_path())?;
                    let Some(source) = registry.find(&name) else {
                        bail!("no saved source named `{name}`");
                    };
                    if !source.is_active {
                        bail!("saved source `{}` is inactive", source.name);
                    }
                    let fields = if fields.is_empty() { source.effective_fields() } else { fields };
                    (
                        vec![source.url.clone()],
                        fields,
                        source.scrape_options(&config.openai_model),
                        source.opportunity_type,
                    )
                }
                None => {
                    let options = ScrapeOptions {
                        model: config.openai_model.clone(),
                        ..Default::default()
                    };
                    (url, fields, options, opportunity_type)
                }
            };

            let cancel = ctrl_c_flag();
            let outcomes = harvest
                .orchestrator
                .scrape_all(&urls, &fields, &options, &cancel)
                .await?;
            print_json(&outcomes)?;

            let mut set = WorkingSet::new(outcomes);
            if set.is_empty() || !(extract || save) {
                return Ok(());
            }
            set.select_all();
            if save {
                print_json(&harvest.batch.bulk_save(&mut set, opportunity_type).await?)?;
            } else {
                let report = harvest
                    .batch
                    .bulk_extract(&mut set, opportunity_type, &mut StderrProgress, &cancel)
                    .await?;
                print_json(&report)?;
            }
        }
        Commands::Extract {
            url,
            opportunity_type,
            title,
        } => {
            let harvest = build_harvest(&config, cli.fixture.as_ref()).await?;
            let items = url
                .into_iter()
                .map(|url| ExtractRequestItem {
                    title: title.clone().unwrap_or_default(),
                    url,
                    opportunity_type,
                })
                .collect();
            let cancel = ctrl_c_flag();
            let report = harvest
                .batch
                .extract_items(items, &mut StderrProgress, &cancel)
                .await?;
            print_json(&report)?;
        }
        Commands::Polish { id } => {
            let harvest = build_harvest(&config, cli.fixture.as_ref()).await?;
            let outcome = harvest.resolver.polish(id).await?;
            if !outcome.newly_polished {
                info!(%id, "record was already polished");
            }
            print_json(&outcome.content)?;
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(config.sources_path())?;
            for source in &registry.sources {
                println!(
                    "{}\t{}\t{}\t{}",
                    source.name,
                    source.opportunity_type,
                    if source.is_active { "active" } else { "inactive" },
                    source.url
                );
            }
        }
        Commands::Serve { port } => {
            let harvest = build_harvest(&config, cli.fixture.as_ref()).await?;
            harvest_web::serve(harvest, port.unwrap_or(config.web_port)).await?;
        }
        Commands::Migrate => {
            let Some(database_url) = &config.database_url else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgStore::connect(database_url).await?;
            let dir = config.migrations_dir();
            store
                .migrate(&dir)
                .await
                .with_context(|| format!("applying migrations from {}", dir.display()))?;
            println!("migrations applied from {}", dir.display());
        }
    }

    Ok(())
}
