use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use karta::actions::simulated::LatencyRange;
use karta::compiler::graph::validate;
use karta::compiler::loader::load_template_from_file;
use karta::config::{StoreBackend, StudioConfig, load_config};
use karta::dsl::WorkflowTemplate;
use karta::runtime::executor::WorkflowExecutor;
use karta::runtime::observer::{LoggingObserver, Observers};
use karta::runtime::report::RunMonitor;
use karta::store::TemplateRegistry;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Run and manage agent workflow templates", long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Template store backend (memory, file, redis)
    #[arg(long, global = true)]
    store: Option<StoreBackend>,

    /// Directory for the file store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Redis connection URL for the redis store
    #[arg(long, global = true)]
    redis: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file (JSON or YAML)
    Run {
        #[arg(long, short)]
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Check a workflow file's graph without running it
    Validate {
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Manage stored templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Manage stored components
    Component {
        #[command(subcommand)]
        command: ComponentCommands,
    },
}

#[derive(clap::Args, Clone, Copy)]
struct RunArgs {
    /// Maximum nodes in flight at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Give agents and tools artificial latency
    #[arg(long)]
    simulate: bool,

    /// Per-attempt node timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum TemplateCommands {
    List,
    Show { id: String },
    Search { query: String },
    Export { id: String },
    Import { file: PathBuf },
    Delete { id: String },
    /// Load a stored template and execute it
    Run {
        id: String,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Subcommand)]
enum ComponentCommands {
    List,
    Export { id: String },
    Import { file: PathBuf },
}

impl Cli {
    fn studio_config(&self) -> Result<StudioConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => StudioConfig::default(),
        };
        if let Some(backend) = self.store {
            config.store.backend = backend;
        }
        if let Some(dir) = &self.data_dir {
            config.store.data_dir = dir.clone();
        }
        if let Some(url) = &self.redis {
            config.store.redis_url = url.clone();
        }
        Ok(config)
    }
}

async fn run_template(template: &WorkflowTemplate, config: &StudioConfig, args: RunArgs) -> Result<()> {
    let mut settings = config.executor.clone();
    if let Some(n) = args.concurrency {
        settings.max_concurrency = n;
    }
    if let Some(ms) = args.timeout_ms {
        settings.node_timeout_ms = Some(ms);
    }
    if args.simulate && settings.simulated_latency_ms.is_none() {
        settings.simulated_latency_ms = Some(LatencyRange::between_ms(100, 600));
    }

    let monitor = Arc::new(RunMonitor::new(settings.flow_window()));
    let observers = Observers::new().with(Arc::new(LoggingObserver)).with(monitor.clone());

    info!(template = %template.name, nodes = template.nodes.len(), "Running workflow");
    let result = WorkflowExecutor::from_template(template, settings.handlers())
        .with_config(settings.executor_config())
        .with_observer(Arc::new(observers))
        .execute()
        .await;

    println!("{}", monitor.render_summary());
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!("Workflow finished with {} error(s)", result.errors.len());
    }
    Ok(())
}

async fn open_registry(config: &StudioConfig) -> Result<TemplateRegistry> {
    config.store.open_registry().await.context("Failed to open template store")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = cli.studio_config()?;

    match cli.command {
        Commands::Run { file, run } => {
            let template = load_template_from_file(&file)?;
            run_template(&template, &config, run).await?;
        }

        Commands::Validate { file } => {
            let template = load_template_from_file(&file)?;
            validate(&template.nodes, &template.edges)
                .with_context(|| format!("Invalid workflow: {}", file.display()))?;
            println!(
                "OK: '{}' ({} nodes, {} edges)",
                template.name,
                template.nodes.len(),
                template.edges.len()
            );
        }

        Commands::Template { command } => {
            let registry = open_registry(&config).await?;
            match command {
                TemplateCommands::List => {
                    for t in registry.list().await? {
                        print_template_line(&t);
                    }
                }
                TemplateCommands::Show { id } => match registry.get(&id).await? {
                    Some(t) => println!("{}", serde_json::to_string_pretty(&t)?),
                    None => bail!("Template not found: {}", id),
                },
                TemplateCommands::Search { query } => {
                    for t in registry.search(&query).await? {
                        print_template_line(&t);
                    }
                }
                TemplateCommands::Export { id } => match registry.export_as_text(&id).await? {
                    Some(text) => println!("{}", text),
                    None => bail!("Template not found: {}", id),
                },
                TemplateCommands::Import { file } => {
                    let text = fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    match registry.import_from_text(&text).await? {
                        Some(t) => println!("Imported '{}' as {}", t.name, t.id),
                        None => bail!("Not a valid template export: {}", file.display()),
                    }
                }
                TemplateCommands::Delete { id } => {
                    if !registry.delete(&id).await? {
                        bail!("Template not found: {}", id);
                    }
                    println!("Deleted {}", id);
                }
                TemplateCommands::Run { id, run } => {
                    let Some(template) = registry.load(&id).await? else {
                        bail!("Template not found: {}", id);
                    };
                    run_template(&template, &config, run).await?;
                }
            }
        }

        Commands::Component { command } => {
            let registry = open_registry(&config).await?;
            match command {
                ComponentCommands::List => {
                    for c in registry.list_components().await? {
                        println!("{}  {:<24} {:?}  {}", c.id, c.name, c.kind, c.category);
                    }
                }
                ComponentCommands::Export { id } => match registry.export_component(&id).await? {
                    Some(text) => println!("{}", text),
                    None => bail!("Component not found: {}", id),
                },
                ComponentCommands::Import { file } => {
                    let text = fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    match registry.import_component(&text).await? {
                        Some(c) => println!("Imported '{}' as {}", c.name, c.id),
                        None => bail!("Not a valid component export: {}", file.display()),
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_template_line(t: &WorkflowTemplate) {
    println!(
        "{}  {:<24} {:?}  used {}x",
        t.id, t.name, t.category, t.metadata.usage_count
    );
}
