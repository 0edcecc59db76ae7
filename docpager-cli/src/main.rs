use clap::{Parser, Subcommand, ValueEnum};
use docpager::config::{
    parse_page_size, MemoryPreferenceStore, PreferenceStore, SqlitePreferenceStore,
};
use docpager::executor::{
    failure_message, record_count_message, success_message, DisplayQueue, OutputSink,
};
use docpager::{
    Document, DocumentSource, FindCriteria, PagerConfig, PanelContext, Preferences, QueryResult,
    ResultPanel, ResultView, SortKey, SqliteSource, TaskPool, ViewKind,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

/// docpager: browse document query results page by page
#[derive(Parser)]
#[command(name = "docpager", version, about)]
struct Cli {
    /// Path to the document database
    #[arg(long, default_value = "docpager.db")]
    db: PathBuf,

    /// Pager configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Import documents from a JSON lines file
    Import {
        /// Namespace (e.g. shop.users)
        namespace: String,
        /// File with one JSON object per line
        file: PathBuf,
    },

    /// Run a find and show one page of its result
    Find {
        /// Namespace (e.g. shop.users)
        namespace: String,
        /// Filter document (e.g. --filter '{"active": true}')
        #[arg(long)]
        filter: Option<String>,
        /// Projection document (e.g. --projection '{"name": 1}')
        #[arg(long)]
        projection: Option<String>,
        /// Sort keys, in order (e.g. --sort age:desc --sort name)
        #[arg(long = "sort", value_parser = parse_sort_key)]
        sort: Vec<SortKey>,
        /// Page to show, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Documents per page (defaults to the stored preference)
        #[arg(long)]
        page_size: Option<String>,
        /// Render the page with this view instead of printing documents
        #[arg(long)]
        view: Option<String>,
    },

    /// Count the documents matching a filter
    Count {
        /// Namespace (e.g. shop.users)
        namespace: String,
        /// Filter document
        #[arg(long)]
        filter: Option<String>,
    },

    /// Show or change stored preferences
    Prefs {
        /// Preference to change (e.g. --set page_size=50)
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_sort_key(s: &str) -> Result<SortKey, String> {
    match s.rsplit_once(':') {
        None => Ok(SortKey::asc(s)),
        Some((field, "asc")) => Ok(SortKey::asc(field)),
        Some((field, "desc")) => Ok(SortKey::desc(field)),
        Some((_, order)) => Err(format!("Invalid sort order '{order}', expected asc or desc")),
    }
}

fn parse_document(label: &str, text: &str) -> Result<Document, String> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(format!("{label} must be a JSON object")),
        Err(e) => Err(format!("Invalid {label}: {e}")),
    }
}

/// Writes execution reports to stderr so stdout stays machine-readable.
struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn report_success(&self, elapsed: Duration, record_count: usize) {
        eprintln!("{}", success_message(elapsed));
        eprintln!("{}", record_count_message(record_count));
    }

    fn report_failure(&self, elapsed: Duration, message: &str) {
        eprintln!("{}", failure_message(elapsed));
        eprintln!("{message}");
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => PagerConfig::load(path)?,
        None => PagerConfig::default(),
    };

    match cli.command {
        Command::Import { namespace, file } => {
            let source = SqliteSource::open(&cli.db)?;
            let docs = read_json_lines(&file)?;
            let ids = source.save_all(&namespace, docs)?;
            log::info!("Imported {} documents into {namespace}", ids.len());
            print_output(
                &serde_json::json!({ "ok": true, "namespace": namespace, "imported": ids.len() }),
                &cli.format,
            )?;
        }

        Command::Find {
            namespace,
            filter,
            projection,
            sort,
            page,
            page_size,
            view,
        } => {
            let mut criteria = FindCriteria::default().with_sort(sort);
            if let Some(filter) = filter {
                criteria = criteria.with_filter(parse_document("filter", &filter)?);
            }
            if let Some(projection) = projection {
                criteria = criteria.with_projection(parse_document("projection", &projection)?);
            }

            let source = Arc::new(SqliteSource::open(&cli.db)?.with_batch_size(config.block_size));
            let store: Arc<dyn PreferenceStore> = Arc::new(SqlitePreferenceStore::open(&cli.db)?);
            let mut prefs = Preferences::from_config(&config).load_over(store.as_ref())?;
            if let Some(size) = page_size {
                prefs.page_size = parse_page_size(&size)?;
            }

            let kind = match view {
                Some(view) => Some(view.parse::<ViewKind>()?),
                None => None,
            };
            let output = show_page(&config, prefs, store, source, &namespace, criteria, page, kind)?;
            match output {
                PageOutput::Rendered(text) => println!("{text}"),
                PageOutput::Documents(value) => print_output(&value, &cli.format)?,
            }
        }

        Command::Count { namespace, filter } => {
            let mut criteria = FindCriteria::default();
            if let Some(filter) = filter {
                criteria = criteria.with_filter(parse_document("filter", &filter)?);
            }
            let source = SqliteSource::open(&cli.db)?;
            let count = source.count(&namespace, &criteria)?;
            print_output(
                &serde_json::json!({ "namespace": namespace, "count": count }),
                &cli.format,
            )?;
        }

        Command::Prefs { set } => {
            let store = SqlitePreferenceStore::open(&cli.db)?;
            let mut prefs = Preferences::from_config(&config).load_over(&store)?;
            if !set.is_empty() {
                for (key, value) in &set {
                    prefs.set_value(key, value)?;
                }
                prefs.save(&store)?;
            }
            print_output(&serde_json::to_value(&prefs)?, &cli.format)?;
        }
    }

    Ok(())
}

enum PageOutput {
    Rendered(String),
    Documents(serde_json::Value),
}

#[allow(clippy::too_many_arguments)]
fn show_page(
    config: &PagerConfig,
    prefs: Preferences,
    store: Arc<dyn PreferenceStore>,
    source: Arc<SqliteSource>,
    namespace: &str,
    criteria: FindCriteria,
    page: usize,
    kind: Option<ViewKind>,
) -> Result<PageOutput, Box<dyn std::error::Error>> {
    let pool = Arc::new(TaskPool::new("docpager", config.worker_threads)?);
    let display = Arc::new(DisplayQueue::new());
    // A one-off view choice is not remembered
    let store = match kind {
        Some(_) => Arc::new(MemoryPreferenceStore::new()) as Arc<dyn PreferenceStore>,
        None => store,
    };
    let panel = ResultPanel::new(
        config,
        prefs,
        PanelContext {
            pool,
            display: display.clone(),
            sink: Arc::new(ConsoleSink),
            store,
        },
        true,
    );
    if let Some(kind) = kind {
        if let Some(rebind) = panel.change_result_view(kind)? {
            rebind.wait()?;
        }
    }

    let result = QueryResult::find(source, namespace, criteria);
    let report = panel.set_result(result)?.wait()?;
    if !report.is_success() {
        return Err("query failed".into());
    }

    for _ in 1..page {
        if !panel.pagination_status().can_move_forward {
            break;
        }
        panel.move_next()?.wait()?;
    }
    display.run_pending();

    let view = panel.active_view();
    if kind.is_some() {
        return Ok(PageOutput::Rendered(view.render()));
    }
    Ok(PageOutput::Documents(serde_json::json!({
        "page": panel.displayed_status(),
        "documents": view.rows(),
    })))
}

fn read_json_lines(path: &Path) -> Result<Vec<Document>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {e}", path.display()))?;
    let mut docs = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let doc = parse_document("document", line).map_err(|e| format!("line {}: {e}", n + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
