use crate::backend::{Fixture, MemoryBackend, RestBackend, StoryBackend};
use crate::canvas::StoryCanvas;
use crate::config::{BackendConfig, Config, load_config};
use crate::ir::ViewKey;
use crate::layout_dump::{LayoutDump, write_layout_dump};
use crate::mirror::{MirrorOptions, SyncMode, migrate_project, sync_environments};
use crate::proxy::{ImageProxy, ProxyRoutes};
use crate::render::{render_canvas_svg, render_mobile_svg, write_output_png, write_output_svg};
use crate::storage::{LocalStore, ViewMode, detect_view_mode};
use crate::viewport::Screen;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sgd", version, about = "Story guide: render, inspect and sync story views")]
pub struct Args {
    /// Config file (JSON or JSON5, camelCase keys)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the device store (watched flags, memo, cached views)
    #[arg(long = "store", global = true)]
    pub store: Option<PathBuf>,

    #[arg(short = 's', long = "season", default_value_t = 1, global = true)]
    pub season: u32,

    #[arg(long = "view", default_value = crate::ir::DEFAULT_VIEW_TYPE, global = true)]
    pub view: String,

    /// Serve views from a JSON fixture instead of the hosted backend
    #[arg(long = "fixture", global = true)]
    pub fixture: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a view as SVG or PNG
    Render {
        /// Output file. Defaults to stdout for SVG if omitted.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(short = 'e', long = "outputFormat", value_enum, default_value = "svg")]
        output_format: OutputFormat,
        #[arg(short = 'm', long = "mode", value_enum, default_value = "desktop")]
        mode: RenderMode,
        /// Highlight nodes matching this query
        #[arg(short = 'q', long = "query")]
        query: Option<String>,
        /// Hide a node; its edges are bridged to what follows it
        #[arg(long = "hide")]
        hide: Vec<String>,
        #[arg(long = "hide-watched")]
        hide_watched: bool,
    },
    /// Write the resolved layout as JSON
    Dump {
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// List nodes matching a query
    Search { query: String },
    /// Toggle the watched flag of a node
    Watch { node: String },
    /// Print the memo, or replace it
    Memo { text: Option<String> },
    /// Show or set the preferred view mode
    ViewMode {
        #[arg(long = "user-agent", default_value = "")]
        user_agent: String,
        #[arg(long = "width", default_value_t = 1280.0)]
        width: f32,
        #[arg(long = "set", value_enum)]
        set: Option<ModeArg>,
    },
    /// Check an admin password
    Verify {
        #[arg(short = 'p', long = "password")]
        password: String,
    },
    /// Upload an image for the current season
    Upload {
        #[arg(short = 'p', long = "password")]
        password: String,
        file: PathBuf,
    },
    /// Copy new images and changed rows between dev and deploy
    SyncEnv {
        #[arg(value_enum)]
        mode: SyncArg,
        #[arg(long = "dev-url")]
        dev_url: String,
        #[arg(long = "dev-key")]
        dev_key: String,
        #[arg(long = "deploy-url")]
        deploy_url: String,
        #[arg(long = "deploy-key")]
        deploy_key: String,
        #[arg(short = 'p', long = "password")]
        password: String,
    },
    /// One-shot full copy from one project into another
    Migrate {
        #[arg(long = "from-url")]
        from_url: String,
        #[arg(long = "from-key")]
        from_key: String,
        #[arg(long = "to-url")]
        to_url: String,
        #[arg(long = "to-key")]
        to_key: String,
    },
    /// Resolve an image proxy path, optionally fetching it
    Proxy {
        path: String,
        #[arg(long = "default-project")]
        default_project: String,
        #[arg(long = "dev-project")]
        dev_project: Option<String>,
        #[arg(long = "dev-host")]
        dev_host: Vec<String>,
        #[arg(long = "referer")]
        referer: Option<String>,
        /// Fetch through the proxy and write the body here
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Svg,
    Png,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Desktop,
    Mobile,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModeArg {
    Mobile,
    Pc,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SyncArg {
    Push,
    Pull,
}

impl From<SyncArg> for SyncMode {
    fn from(arg: SyncArg) -> Self {
        match arg {
            SyncArg::Push => SyncMode::Push,
            SyncArg::Pull => SyncMode::Pull,
        }
    }
}

impl From<ModeArg> for ViewMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Mobile => ViewMode::Mobile,
            ModeArg::Pc => ViewMode::Pc,
        }
    }
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(execute(args))
}

pub async fn execute(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let key = ViewKey::new(args.season, args.view.clone());

    match args.command {
        Command::SyncEnv {
            mode,
            dev_url,
            dev_key,
            deploy_url,
            deploy_key,
            password,
        } => {
            let dev = project_backend(&config.backend, &dev_url, &dev_key)?;
            let deploy = project_backend(&config.backend, &deploy_url, &deploy_key)?;
            let options = MirrorOptions::from_config(&config.backend);
            let report = sync_environments(&dev, &deploy, &password, mode.into(), &options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Migrate {
            from_url,
            from_key,
            to_url,
            to_key,
        } => {
            let old = project_backend(&config.backend, &from_url, &from_key)?;
            let new = project_backend(&config.backend, &to_url, &to_key)?;
            let options = MirrorOptions::from_config(&config.backend);
            let report = migrate_project(&old, &new, &options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Proxy {
            path,
            default_project,
            dev_project,
            dev_host,
            referer,
            output,
        } => {
            let routes = ProxyRoutes {
                default_project,
                dev_project,
                dev_referrer_hosts: dev_host,
            };
            let Some(output) = output else {
                let route = routes.resolve(&path, referer.as_deref());
                println!("{}", serde_json::to_string_pretty(&route)?);
                return Ok(());
            };
            let proxy = ImageProxy::new(routes, reqwest::Client::new());
            let response = proxy.serve(&path, referer.as_deref()).await?;
            if !response.is_success() {
                anyhow::bail!("upstream answered {}", response.status);
            }
            std::fs::write(&output, &response.body)?;
            log::info!("wrote {} bytes to {}", response.body.len(), output.display());
        }
        Command::Memo { text } => {
            let mut store = open_store(args.store.as_deref())?;
            match text {
                Some(text) => store.set_memo(&text)?,
                None => println!("{}", store.memo()),
            }
        }
        Command::ViewMode {
            user_agent,
            width,
            set,
        } => {
            let mut store = open_store(args.store.as_deref())?;
            if let Some(mode) = set {
                store.set_view_mode(mode.into())?;
            }
            let mode = detect_view_mode(store.view_mode(), &user_agent, width);
            println!("{}", mode.as_str());
        }
        command => {
            let store = open_store(args.store.as_deref())?;
            let backend = open_backend(&config, args.fixture.as_deref())?;
            let screen = Screen {
                width: config.render.width,
                height: config.render.height,
            };
            let mut canvas = StoryCanvas::new(config, key, backend, store, screen);
            let source = canvas.load_view().await;
            log::info!("{}: {} nodes from {source:?}", canvas.key(), canvas.view().nodes.len());
            view_command(&mut canvas, command).await?;
        }
    }

    Ok(())
}

async fn view_command(canvas: &mut StoryCanvas, command: Command) -> Result<()> {
    match command {
        Command::Render {
            output,
            output_format,
            mode,
            query,
            hide,
            hide_watched,
        } => {
            if let Some(query) = query.as_deref() {
                canvas.set_query(query);
            }
            for id in &hide {
                canvas.set_hidden(id, true);
            }
            canvas.set_hide_watched(hide_watched);
            let layout = canvas.layout();
            let config = canvas.config();
            let svg = match mode {
                RenderMode::Desktop => render_canvas_svg(canvas.view(), &layout, &config.theme, &config.layout),
                RenderMode::Mobile => render_mobile_svg(canvas.view(), &layout, &config.theme, &config.layout),
            };
            match output_format {
                OutputFormat::Svg => write_output_svg(&svg, output.as_deref())?,
                OutputFormat::Png => {
                    let output = ensure_output(&output, "png")?;
                    write_output_png(&svg, &output, &config.render)?;
                }
            }
        }
        Command::Dump { output } => {
            let layout = canvas.layout();
            match output {
                Some(path) => write_layout_dump(&path, canvas.key(), canvas.view(), &layout)?,
                None => {
                    let dump = LayoutDump::from_layout(canvas.key(), canvas.view(), &layout);
                    println!("{}", serde_json::to_string_pretty(&dump)?);
                }
            }
        }
        Command::Search { query } => {
            canvas.set_query(&query);
            let matches = canvas.search().matches().to_vec();
            if matches.is_empty() {
                println!("no matches for {query:?}");
            }
            for (idx, id) in matches.iter().enumerate() {
                let label = canvas.view().node(id).map(|node| node.label()).unwrap_or("");
                println!("{}/{}\t{id}\t{label}", idx + 1, matches.len());
            }
        }
        Command::Watch { node } => {
            let outcome = canvas.click_node(&node)?;
            println!("{node}: {outcome:?}");
        }
        Command::Verify { password } => {
            canvas.login(&password).await?;
            println!("password accepted");
        }
        Command::Upload { password, file } => {
            canvas.login(&password).await?;
            let bytes = std::fs::read(&file)?;
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid file name {}", file.display()))?;
            let url = canvas.upload_image(name, bytes).await?;
            println!("{url}");
        }
        Command::Memo { .. }
        | Command::ViewMode { .. }
        | Command::SyncEnv { .. }
        | Command::Migrate { .. }
        | Command::Proxy { .. } => {}
    }
    Ok(())
}

fn open_store(dir: Option<&Path>) -> Result<LocalStore> {
    match dir {
        Some(dir) => Ok(LocalStore::open(dir)?),
        None => {
            log::debug!("no --store given, device state is not kept");
            Ok(LocalStore::in_memory())
        }
    }
}

fn open_backend(config: &Config, fixture: Option<&Path>) -> Result<Arc<dyn StoryBackend>> {
    if let Some(path) = fixture {
        let fixture = Fixture::from_json(&std::fs::read_to_string(path)?)?;
        return Ok(Arc::new(MemoryBackend::from_fixture(&fixture)?));
    }
    Ok(Arc::new(RestBackend::from_config(&config.backend)?))
}

fn project_backend(base: &BackendConfig, url: &str, key: &str) -> Result<RestBackend> {
    let config = BackendConfig {
        url: Some(url.to_string()),
        anon_key: Some(key.to_string()),
        ..base.clone()
    };
    Ok(RestBackend::from_config(&config)?)
}

fn ensure_output(output: &Option<PathBuf>, ext: &str) -> Result<PathBuf> {
    if let Some(path) = output {
        return Ok(path.clone());
    }
    Err(anyhow::anyhow!("Output path required for {} output", ext))
}
