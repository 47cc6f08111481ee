use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use storyforge::backlog::BacklogStore;
use storyforge::config::OrchestratorConfig;
use storyforge::events::{EventLog, FollowRecord};
use storyforge::issues::IssueTracker;
use storyforge::llm::HttpGateway;
use storyforge::orchestrator::SprintOrchestrator;
use storyforge::plan::PlanStore;
use storyforge::quality;
use storyforge::testrun::CommandTestRunner;

#[derive(Parser)]
#[command(name = "storyforge")]
#[command(version, about = "Autonomous sprint orchestrator")]
struct Cli {
    /// Workspace directory holding backlog.csv, .storyforge/, and projects/
    #[arg(long, default_value = ".", global = true)]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a sprint plan end to end
    Run {
        sprint_id: String,

        /// Project name under projects/ receiving the generated code
        #[arg(short, long)]
        project: String,
    },
    /// Show a sprint's plan status and per-story backlog state
    Status { sprint_id: String },
    /// Print the last N events of a sprint's journal
    Tail {
        sprint_id: String,

        #[arg(short, long, default_value = "20")]
        n: usize,
    },
    /// Stream a sprint's journal live (heartbeats during silence)
    Follow { sprint_id: String },
    /// Run the advisory quality review for a project
    Review {
        /// Project name under projects/
        project: String,
    },
    /// List recorded issues, optionally for one story
    Issues {
        /// Project name under projects/
        project: String,

        #[arg(short, long)]
        story: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let workspace = cli.workspace;

    match cli.command {
        Commands::Run { sprint_id, project } => {
            let config = OrchestratorConfig::load(&workspace)?;
            let gateway = Arc::new(HttpGateway::from_config(&config)?);
            let runner = Arc::new(CommandTestRunner::new(
                config.test_command.clone(),
                config.test_timeout,
            ));
            let orchestrator =
                SprintOrchestrator::new(&workspace, &project, config, gateway, runner);

            println!(
                "{} sprint {} for project {}",
                style("Running").green().bold(),
                sprint_id,
                project
            );
            let summary = orchestrator.run(&sprint_id).await?;
            println!(
                "{}: {} completed, {} failed | {} tasks | {} tests passed, {} failed",
                style("Sprint finished").green().bold(),
                summary.stories_completed,
                summary.stories_failed,
                summary.tasks_completed,
                summary.tests_passed,
                summary.tests_failed,
            );
        }
        Commands::Status { sprint_id } => {
            let plans = PlanStore::new(workspace.join(".storyforge").join("sprints"));
            let plan = plans.load(&sprint_id)?;
            println!(
                "Sprint {} is {}",
                style(&plan.sprint_id).bold(),
                style(plan.status.as_str()).cyan()
            );
            let backlog = BacklogStore::new(workspace.join("backlog.csv"));
            for story_id in &plan.stories {
                let status = backlog
                    .get_field(story_id, "Execution_Status")?
                    .unwrap_or_else(|| "unknown".to_string());
                println!("  {} {}", style(story_id).bold(), status);
            }
        }
        Commands::Tail { sprint_id, n } => {
            let log = EventLog::new(workspace.join(".storyforge").join("logs"));
            for event in log.tail(&sprint_id, n)? {
                println!(
                    "{} {} {}",
                    style(event.timestamp.to_rfc3339()).dim(),
                    style(event.event_type.as_str()).cyan(),
                    event.data
                );
            }
        }
        Commands::Follow { sprint_id } => {
            let config = OrchestratorConfig::load(&workspace)?;
            let log = EventLog::new(workspace.join(".storyforge").join("logs"));
            let mut handle = log.follow(&sprint_id, Duration::from_millis(config.heartbeat_ms));
            while let Some(record) = handle.recv().await {
                match record {
                    FollowRecord::Event(event) => println!(
                        "{} {} {}",
                        style(event.timestamp.to_rfc3339()).dim(),
                        style(event.event_type.as_str()).cyan(),
                        event.data
                    ),
                    FollowRecord::Heartbeat { timestamp } => {
                        println!("{}", style(format!("heartbeat {}", timestamp.to_rfc3339())).dim())
                    }
                }
            }
        }
        Commands::Review { project } => {
            let metrics =
                quality::review_project(&workspace.join("projects").join(&project), &project);
            println!("Quality review for {}", style(&project).bold());
            println!("  architecture:  {:>5.1}", metrics.architecture_score);
            println!("  performance:   {:>5.1}", metrics.performance_score);
            println!("  dependency:    {:>5.1}", metrics.dependency_score);
            println!("  documentation: {:>5.1}", metrics.documentation_score);
            println!(
                "  overall:       {:>5.1}",
                style(metrics.overall_score).bold()
            );
            for issue in &metrics.issues {
                println!("  {} {}", style("issue:").red(), issue);
            }
            for rec in &metrics.recommendations {
                println!("  {} {}", style("hint:").yellow(), rec);
            }
        }
        Commands::Issues { project, story } => {
            let tracker = IssueTracker::new(
                workspace
                    .join(".storyforge")
                    .join("issues")
                    .join(format!("{}.jsonl", project)),
            );
            let issues = match story {
                Some(story_id) => tracker.for_story(&story_id)?,
                None => tracker.load()?,
            };
            if issues.is_empty() {
                println!("No issues recorded");
            }
            for issue in issues {
                println!(
                    "{} {} [{}] {}",
                    style(&issue.issue_id[..8]).dim(),
                    style(&issue.story_id).bold(),
                    style(issue.issue_type.as_str()).red(),
                    issue.description
                );
            }
        }
    }

    Ok(())
}
