// crates/netcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use netcore::{CaseData, Condition, EventKind, Gate, NetModel, Task, WorkItemStatus};
use netruntime::{EngineConfig, InMemoryCaseStore, NetRegistry, StatefulEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netflow")]
#[command(about = "Petri-net workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one case of a net, completing every work item automatically
    Run {
        /// Path to net JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial case data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Output data reported for every completed work item
        #[arg(short, long)]
        output: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a net file
    Validate {
        /// Path to net JSON file
        file: PathBuf,
    },

    /// Create a new example net
    Init {
        /// Output file path
        #[arg(short, long, default_value = "net.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            output,
            verbose,
        } => {
            init_logging(verbose);
            run_case(file, input, output).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_net(file)?;
        }

        Commands::Init { output } => {
            create_example_net(output)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_net(file: &PathBuf) -> Result<NetModel> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let net: NetModel = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(net)
}

fn parse_object(raw: Option<String>, what: &str) -> Result<serde_json::Value> {
    match raw {
        None => Ok(serde_json::Value::Object(Default::default())),
        Some(raw) => {
            let json: serde_json::Value = serde_json::from_str(&raw)?;
            if !json.is_object() {
                bail!("{} must be a JSON object", what);
            }
            Ok(json)
        }
    }
}

async fn run_case(file: PathBuf, input: Option<String>, output: Option<String>) -> Result<()> {
    println!("🚀 Loading net from: {}", file.display());

    let net = load_net(&file)?;
    let net_id = net.id.clone();
    let version = net.version.clone();

    println!("📋 Net: {} ({})", net.name.as_deref().unwrap_or(&net.id), net.version);
    println!("   Tasks: {}", net.tasks().count());
    println!("   Conditions: {}", net.conditions().count());
    println!();

    let data = CaseData::from(parse_object(input, "Input")?);
    let reported = parse_object(output, "Output")?;

    let engine = StatefulEngine::start(
        EngineConfig::from_env(),
        netexpr::default_evaluator(),
        NetRegistry::new(),
        Arc::new(InMemoryCaseStore::new()),
    )
    .await?;
    engine.register_net(net).await?;

    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let terminal = event.is_terminal_for_case();
            let item = event
                .work_item_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_default();
            match event.kind {
                EventKind::CaseStarted { net_id, .. } => println!("▶️  Case started ({})", net_id),
                EventKind::WorkItemEnabled { task_id, instance } => match instance {
                    Some(i) => println!("  📥 Enabled {} #{} [{}]", task_id, i, item),
                    None => println!("  📥 Enabled {} [{}]", task_id, item),
                },
                EventKind::WorkItemExecuting { task_id } => println!("  ⚡ Executing {}", task_id),
                EventKind::WorkItemCompleted { task_id, outcome } => {
                    println!("  ✅ Completed {} ({:?})", task_id, outcome)
                }
                EventKind::WorkItemCancelled { task_id } => println!("  🚫 Cancelled {}", task_id),
                EventKind::WorkItemFailed { task_id, reason } => {
                    println!("  ❌ {} failed: {}", task_id, reason)
                }
                EventKind::TaskExited {
                    task_id,
                    produced,
                    cancelled,
                } => {
                    println!("  ➡️  {} exited -> {:?}", task_id, produced);
                    if !cancelled.is_empty() {
                        println!("     cancelled region: {:?}", cancelled);
                    }
                }
                EventKind::CaseStalled { marked } => println!("⚠️  Case stalled at {:?}", marked),
                EventKind::CaseFaulted { reason } => println!("💥 Case faulted: {}", reason),
                EventKind::CaseCompleted => println!("✨ Case completed"),
                EventKind::CaseCancelled => println!("🛑 Case cancelled"),
                _ => {}
            }
            if terminal {
                break;
            }
        }
    });

    let mut outcome = engine.launch_case(&net_id, &version, data).await?;
    let case_id = outcome.case_id;
    tracing::debug!("Driving case {} to completion", case_id);

    while !outcome.stalled {
        let Some(item) = outcome
            .work_items
            .iter()
            .find(|item| item.status == WorkItemStatus::Enabled)
            .cloned()
        else {
            break;
        };
        tracing::debug!("Completing work item {}", item.id);
        engine.start_work_item(&item.id).await?;
        outcome = engine
            .complete_work_item(&item.id, reported.clone())
            .await?;
    }

    // let the listener drain
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let snapshot = engine.snapshot(case_id).await?;
    println!();
    println!("📊 Case Summary:");
    println!("   Case ID: {}", case_id);
    println!("   Status: {:?}", snapshot.state.status);
    println!("   Revision: {}", snapshot.revision());
    println!("   Marking: {}", serde_json::to_string(&snapshot.state.marking)?);
    println!("   Data: {}", serde_json::to_string_pretty(&snapshot.state.data)?);

    Ok(())
}

fn validate_net(file: PathBuf) -> Result<()> {
    println!("🔍 Validating net: {}", file.display());

    let net = load_net(&file)?;
    let graph = netruntime::validate(&net)?;
    netruntime::validate_expressions(&net, &netexpr::ExprEvaluator::new())?;

    println!("✅ Net is well-formed:");
    println!("   Id: {} ({})", net.id, net.version);
    println!("   Elements: {}", graph.element_count());
    println!("   Flows: {}", net.flows.len());
    for task in net.tasks() {
        let mut traits = vec![format!("{:?}-join", task.join), format!("{:?}-split", task.split)];
        if task.is_multi_instance() {
            traits.push("multi-instance".to_string());
        }
        if !task.cancellation_set.is_empty() {
            traits.push(format!("cancels {:?}", task.cancellation_set));
        }
        println!("   • {} [{}]", task.id, traits.join(", "));
    }

    Ok(())
}

fn create_example_net(output: PathBuf) -> Result<()> {
    let mut net = NetModel::new("order-review", "start", "end").with_name("Order review");

    net.add_task(Task::new("receive").with_name("Receive order").with_split(Gate::Xor));
    net.add_condition(Condition::new("needs_review"));
    net.add_condition(Condition::new("fast_track"));
    net.add_task(Task::new("review").with_name("Manual review"));
    net.add_task(Task::new("approve").with_name("Auto approve").automatic());
    net.add_condition(Condition::new("reviewed"));
    net.add_condition(Condition::new("approved"));
    net.add_task(Task::new("archive").with_name("Archive").with_join(Gate::Or));

    net.connect("start", "receive");
    net.connect_when("receive", "needs_review", "amount > 1000");
    net.connect_default("receive", "fast_track");
    net.connect("needs_review", "review");
    net.connect("fast_track", "approve");
    net.connect("review", "reviewed");
    net.connect("approve", "approved");
    net.connect("reviewed", "archive");
    net.connect("approved", "archive");
    net.connect("archive", "end");

    netruntime::validate(&net)?;

    let json = serde_json::to_string_pretty(&net)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example net: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  netflow run --file {} --input '{{\"amount\": 1500}}'",
        output.display()
    );

    Ok(())
}
