//! `reach` – command line front end for the reach stack.
//!
//! | Subcommand | What it does |
//! |---|---|
//! | `follower` | serve a simulated robot in the demo room over WebSockets |
//! | `run <task> [args]` | connect to the robot and run one named task |
//! | `sim <task> [args]` | same, against an in-process simulated robot |
//! | `state [joint]` | print the robot's latest state, or one joint |
//! | `repl` | interactive shell with slash commands |
//! | `map-info <file>` | summarise a saved map snapshot |
//! | `init` | write the default config to `~/.reach/config.toml` |
//!
//! `run` and `sim` accept `--load <map>`, `--save <map>` and `--json`.
//! Ctrl-C sends `stop` to the robot before the process exits.

mod config;
mod repl;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use reach_hal::{SimBody, SimCamera, SimWorld};
use reach_middleware::{Follower, RobotClient, WsConnector, WsServer};
use reach_perception::{SharedVoxelMap, VoxelMap};
use reach_planner::MotionPlanner;
use reach_runtime::{GroundTruthSegmenter, TaskEngine, TaskReport, init_tracing};
use reach_types::{ARM_JOINT_NAMES, ReachError, joint_index};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;

// ─────────────────────────────────────────────────────────────────────────────
// Argument parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Cmd {
    Follower,
    Run { task: String, args: Vec<String>, sim: bool },
    State(Option<String>),
    Repl,
    MapInfo(PathBuf),
    Init,
    Help,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Flags {
    load: Option<PathBuf>,
    save: Option<PathBuf>,
    json: bool,
}

fn parse_args(argv: &[String]) -> Result<(Cmd, Flags), String> {
    let mut flags = Flags::default();
    let mut positional = Vec::new();
    let mut it = argv.iter();
    while let Some(a) = it.next() {
        match a.as_str() {
            "--load" => flags.load = Some(it.next().ok_or("--load needs a path")?.into()),
            "--save" => flags.save = Some(it.next().ok_or("--save needs a path")?.into()),
            "--json" => flags.json = true,
            f if f.starts_with("--") => return Err(format!("unknown flag '{f}'")),
            _ => positional.push(a.clone()),
        }
    }

    let mut pos = positional.into_iter();
    let cmd = match pos.next().as_deref() {
        None | Some("repl") => Cmd::Repl,
        Some("follower") => Cmd::Follower,
        Some("state") => Cmd::State(pos.next()),
        Some("init") => Cmd::Init,
        Some("help") | Some("-h") => Cmd::Help,
        Some(sub @ ("run" | "sim")) => {
            let task = pos.next().ok_or_else(|| format!("{sub} needs a task name"))?;
            Cmd::Run { task, args: pos.by_ref().collect(), sim: sub == "sim" }
        }
        Some("map-info") => Cmd::MapInfo(pos.next().ok_or("map-info needs a file")?.into()),
        Some(other) => return Err(format!("unknown subcommand '{other}'")),
    };
    if let Some(extra) = pos.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }
    Ok((cmd, flags))
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    // REACH_LOG_FORMAT=json switches to newline-delimited JSON logs;
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _otel = init_tracing("reach-cli");

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let (cmd, flags) = match parse_args(&argv) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}: {e}", "Usage error".red());
            print_usage();
            return ExitCode::from(2);
        }
    };

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cmd {
        Cmd::Help => {
            print_usage();
            Ok(true)
        }
        Cmd::Init => cmd_init(&cfg),
        Cmd::MapInfo(path) => cmd_map_info(&path),
        Cmd::Follower => cmd_follower(&cfg).await,
        Cmd::State(joint) => cmd_state(&cfg, joint.as_deref()).await,
        Cmd::Run { task, args, sim } => cmd_run(&cfg, &task, &args, sim, &flags).await,
        Cmd::Repl => cmd_repl(cfg, &flags).await,
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}: {e}", "Error".red());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_init(cfg: &Config) -> Result<bool, ReachError> {
    config::save(cfg)?;
    println!(
        "  {} Config written to {}",
        "✓".green().bold(),
        config::config_path().display().to_string().bold()
    );
    Ok(true)
}

fn cmd_map_info(path: &Path) -> Result<bool, ReachError> {
    let map = VoxelMap::load(path)?;
    let stats = map.stats();
    println!("{}", path.display().to_string().bold());
    println!("  resolution : {} m", map.resolution());
    println!(
        "  cells      : {} ({} occupied, {} free, {} unknown)",
        stats.cells, stats.occupied, stats.free, stats.unknown
    );
    println!("  instances  : {}", stats.instances);
    for inst in map.instances() {
        let c = inst.extent.centre();
        println!(
            "    #{:<4} {:<12} at ({:.2}, {:.2}, {:.2}), seen {}x",
            inst.id,
            inst.category.bold(),
            c.x,
            c.y,
            c.z,
            inst.observations
        );
    }
    Ok(true)
}

async fn cmd_follower(cfg: &Config) -> Result<bool, ReachError> {
    let world = Arc::new(SimWorld::demo_room());
    let (handle, shutdown, task) = sim_follower(cfg, world).spawn();
    let shutdown = Arc::new(shutdown);

    let state_addr = SocketAddr::from(([0, 0, 0, 0], cfg.link.state_port));
    let command_addr = SocketAddr::from(([0, 0, 0, 0], cfg.link.command_port));
    let server = WsServer::bind(state_addr, command_addr).await?;
    let (state, command) = server.local_addrs()?;
    println!("  Simulated robot listening: state on {state}, commands on {command}");
    println!("  {}", "Press Ctrl-C to stop.".dimmed());

    let tx = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    server.serve(handle, shutdown.subscribe()).await;
    let _ = shutdown.send(true);
    let _ = task.await;
    info!("follower stopped");
    Ok(true)
}

async fn cmd_state(cfg: &Config, joint: Option<&str>) -> Result<bool, ReachError> {
    let index = match joint {
        Some(name) => Some(joint_index(name).ok_or_else(|| {
            ReachError::Config(format!("unknown joint '{name}' (one of {})", ARM_JOINT_NAMES.join(", ")))
        })?),
        None => None,
    };
    let client = connect(cfg).await?;
    let state = client.wait_for_state(cfg.client_config().link_timeout).await?;
    client.shutdown();
    match index {
        Some(i) => match state.joint_positions.get(i) {
            Some(v) => println!("{} {v:.4}", ARM_JOINT_NAMES[i]),
            None => return Err(ReachError::HardwareFault {
                component: "arm".into(),
                details: format!("state reports {} joints", state.joint_positions.len()),
            }),
        },
        None => repl::print_state(&state),
    }
    Ok(true)
}

async fn cmd_run(
    cfg: &Config,
    task: &str,
    args: &[String],
    sim: bool,
    flags: &Flags,
) -> Result<bool, ReachError> {
    let (engine, _sim) = if sim { sim_engine(cfg, flags).await? } else { (ws_engine(cfg, flags).await?, None) };
    install_stop_on_ctrlc(engine.client().clone());

    println!("  Running {} {}", task.bold(), args.join(" "));
    let report = engine.launch(task, args).await?;
    print_report(&report, flags.json)?;
    save_map(&engine, flags)?;
    engine.client().shutdown();
    Ok(report.succeeded())
}

async fn cmd_repl(cfg: Config, flags: &Flags) -> Result<bool, ReachError> {
    print_banner();
    let engine = ws_engine(&cfg, flags).await?;
    install_stop_on_ctrlc(engine.client().clone());
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let rt = tokio::runtime::Handle::current();
    let engine = Arc::new(engine);
    let shell = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || repl::run(&rt, &shell))
        .await
        .map_err(|e| ReachError::Io(format!("repl thread failed: {e}")))?;

    save_map(&engine, flags)?;
    engine.client().shutdown();
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps an in-process simulated robot alive.
struct SimSession {
    shutdown: watch::Sender<bool>,
}

impl Drop for SimSession {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn sim_follower(cfg: &Config, world: Arc<SimWorld>) -> Follower {
    Follower::new(Box::new(SimBody::new().with_world(Arc::clone(&world))), cfg.follower_config())
        .with_camera(Box::new(SimCamera::new("head_rgbd", world)))
}

async fn connect(cfg: &Config) -> Result<RobotClient, ReachError> {
    let connector = WsConnector::new(cfg.link.host.clone(), cfg.link.state_port, cfg.link.command_port);
    RobotClient::connect(Arc::new(connector), cfg.client_config()).await
}

fn open_map(cfg: &Config, flags: &Flags) -> Result<SharedVoxelMap, ReachError> {
    let map = match &flags.load {
        Some(path) => {
            let map = VoxelMap::load(path)?;
            info!(path = %path.display(), cells = map.len(), "map loaded");
            map
        }
        None => VoxelMap::new(cfg.map.clone()),
    };
    Ok(SharedVoxelMap::new(map))
}

async fn ws_engine(cfg: &Config, flags: &Flags) -> Result<TaskEngine, ReachError> {
    let client = connect(cfg).await?;
    Ok(TaskEngine::new(
        client,
        open_map(cfg, flags)?,
        MotionPlanner::new(cfg.planner.clone()),
        cfg.task.clone(),
    ))
}

async fn sim_engine(cfg: &Config, flags: &Flags) -> Result<(TaskEngine, Option<SimSession>), ReachError> {
    let world = Arc::new(SimWorld::demo_room());
    let (handle, shutdown, _task) = sim_follower(cfg, Arc::clone(&world)).spawn();
    let session = SimSession { shutdown };
    let client = RobotClient::connect(Arc::new(handle.connector()), cfg.client_config()).await?;
    let engine = TaskEngine::new(
        client,
        open_map(cfg, flags)?,
        MotionPlanner::new(cfg.planner.clone()),
        cfg.task.clone(),
    )
    .with_segmenter(move || Box::new(GroundTruthSegmenter::new(Arc::clone(&world))));
    Ok((engine, Some(session)))
}

fn install_stop_on_ctrlc(client: RobotClient) {
    let rt = tokio::runtime::Handle::current();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        let client = client.clone();
        rt.spawn(async move {
            match client.stop().await {
                Ok(()) => println!("{}", "  ✓ Robot stopped.".green()),
                Err(e) => println!("{}: {e}", "  Stop failed".red()),
            }
            client.shutdown();
            std::process::exit(130);
        });
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the robot");
    }
}

fn save_map(engine: &TaskEngine, flags: &Flags) -> Result<(), ReachError> {
    if let Some(path) = &flags.save {
        let snapshot = engine.map().snapshot();
        snapshot.save(path)?;
        println!(
            "  {} Map saved to {} ({} cells)",
            "✓".green().bold(),
            path.display().to_string().bold(),
            snapshot.len()
        );
    }
    Ok(())
}

fn print_report(report: &TaskReport, json: bool) -> Result<(), ReachError> {
    if json {
        let raw = serde_json::to_string_pretty(report).map_err(|e| ReachError::Serialization(e.to_string()))?;
        println!("{raw}");
    } else if report.succeeded() {
        print!("{}", report.to_string().green());
    } else {
        print!("{}", report.to_string().red());
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ________  ____ _____/ /_ "#.bold().cyan());
    println!("{}", r#"  / ___/ _ \/ __ `/ ___/ __ \"#.bold().cyan());
    println!("{}", r#" / /  /  __/ /_/ / /__/ / / /"#.bold().cyan());
    println!("{}", r#"/_/   \___/\__,_/\___/_/ /_/ "#.bold().cyan());
    println!();
    println!("  {} {}", "reach".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Mobile manipulation from a remote workstation");
    println!();
}

fn print_usage() {
    println!("{}", "Usage".bold().underline());
    println!("  reach [repl]                      interactive shell");
    println!("  reach follower                    serve a simulated robot");
    println!("  reach run <task> [args] [flags]   run a task on the robot");
    println!("  reach sim <task> [args] [flags]   run a task in simulation");
    println!("  reach state [joint]               print the latest robot state");
    println!("  reach map-info <file>             summarise a saved map");
    println!("  reach init                        write the default config");
    println!();
    println!("  Flags: --load <map>  --save <map>  --json");
    println!("  Tasks: explore [steps], go_to <category>, pickup <category>");
}
