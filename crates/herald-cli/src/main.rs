use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use herald_core::app::TaskHandler;
use herald_core::domain::{
    ActionItem, ClassifiedEvent, CronSchedule, HeraldError, NewRule, NewTask, NewTemplate,
    Priority, RuleConditions, Task, Trigger,
};
use herald_core::typed::{Handler, TaskPayload, TemplateResponse};
use herald_core::{SchedulerBuilder, SchedulerConfig, StoreConfig};

#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Background task scheduler and automation engine")]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C.
    Run,
    /// Run a short in-memory walkthrough and print the final stats.
    Demo {
        /// Seconds to let the scheduler work before printing stats.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Print the next fire times of a cron expression.
    Cron {
        expression: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Print task statistics from the configured store.
    Inspect {
        /// sled directory to read instead of the configured store.
        #[arg(long)]
        store: Option<PathBuf>,
        /// Also list every task.
        #[arg(long)]
        tasks: bool,
    },
}

// ========================================
// Handlers
// ========================================

/// template-response をログに出すだけの送信アダプタ
struct LogResponder;

#[async_trait]
impl Handler<TemplateResponse> for LogResponder {
    async fn handle(
        &self,
        response: TemplateResponse,
        task: &Task,
    ) -> herald_core::Result<serde_json::Value> {
        info!(
            task_id = %task.id,
            recipient = response.recipient.as_deref().unwrap_or("-"),
            subject = %response.subject,
            "sending automated response"
        );
        Ok(serde_json::json!({ "delivered": true }))
    }
}

/// payload をそのまま返す
struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn invoke(&self, task: &Task) -> herald_core::Result<serde_json::Value> {
        Ok(serde_json::Value::Object(task.payload.clone()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl TaskPayload for Hello {
    const TYPE: &'static str = "hello";
}

/// 最初の N 回だけ失敗する
struct FlakyHello {
    remaining_failures: AtomicU32,
}

impl FlakyHello {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for FlakyHello {
    async fn handle(&self, hello: Hello, task: &Task) -> herald_core::Result<serde_json::Value> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HeraldError::execution(format!(
                "intentional failure (left={left})"
            )));
        }
        info!(task_id = %task.id, "Hello, {}!", hello.name);
        Ok(serde_json::json!({ "greeted": hello.name }))
    }
}

fn builder(config: SchedulerConfig) -> Result<SchedulerBuilder> {
    Ok(SchedulerBuilder::new(config)
        .register_typed::<TemplateResponse, _>(LogResponder)?
        .register_typed::<Hello, _>(FlakyHello::new(2))?
        .register("echo", Arc::new(EchoHandler))?
        .expect_tasks(&[TemplateResponse::TYPE, Hello::TYPE]))
}

// ========================================
// Commands
// ========================================

async fn run(config: SchedulerConfig) -> Result<()> {
    let scheduler = builder(config)?.build()?;
    let handle = scheduler.start().await?;
    info!("scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    handle.shutdown().await?;
    Ok(())
}

async fn demo(seconds: u64) -> Result<()> {
    let config = SchedulerConfig {
        retry_base_delay_secs: 1,
        retry_max_delay_secs: 2,
        recurring_interval_secs: 1,
        automation_interval_secs: 1,
        store: StoreConfig::Memory,
        ..SchedulerConfig::default()
    };
    let scheduler = builder(config)?.build()?;
    let handle = scheduler.start().await?;
    let manager = scheduler.manager();

    // (A) 2 回失敗してからリトライで成功するタスク
    let hello = Hello {
        name: "herald".into(),
    };
    let id = manager
        .create_task(hello.into_new_task("greet")?.priority(Priority::High))
        .await?;
    info!(task_id = %id, "created flaky task");

    // (B) 即時の echo と、毎分の recurring テンプレート
    manager
        .create_task(NewTask::new("echo", "echo").payload_json(serde_json::json!({ "n": 1 })))
        .await?;
    manager
        .create_task(NewTask::new("minutely-echo", "echo").cron("* * * * *"))
        .await?;

    // (C) ルール + イベント
    let template = scheduler
        .templates()
        .add(
            NewTemplate::new(
                "billing-ack",
                "Re: {subject}",
                "Hi {sender_name}, we received your note. First action: {action_item}.",
            )
            .for_classification("billing"),
        )
        .await?;
    scheduler
        .rules()
        .add_rule(
            NewRule::new(
                "billing",
                Trigger::ClassificationEquals,
                RuleConditions::equals("billing"),
                template,
            )
            .max_daily_sends(1),
        )
        .await?;
    let event = ClassifiedEvent {
        sender: "Alice Smith <alice@example.com>".into(),
        subject: "Invoice 1042".into(),
        body: "The invoice total looks wrong.".into(),
        classification: "billing".into(),
        urgency: "medium".into(),
        sentiment: "negative".into(),
        action_items: vec![ActionItem::new("check invoice 1042")],
    };
    handle.submit_event(event.clone()).await?;
    // quota は 1 なので 2 通目は送られない
    handle.submit_event(event).await?;

    sleep(Duration::from_secs(seconds)).await;

    let stats = manager.get_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    if let Some(task) = manager.get_task(id).await? {
        println!(
            "flaky task: status={} retries={} result={}",
            task.status,
            task.retry_count,
            task.result.unwrap_or(serde_json::Value::Null)
        );
    }

    handle.shutdown().await?;
    Ok(())
}

fn cron(expression: &str, count: usize) -> Result<()> {
    let schedule = CronSchedule::parse(expression)?;
    let upcoming = schedule.upcoming(Utc::now(), count);
    if upcoming.is_empty() {
        warn!(expression, "schedule never fires");
    }
    for at in upcoming {
        println!("{}", at.to_rfc3339());
    }
    Ok(())
}

async fn inspect(mut config: SchedulerConfig, store: Option<PathBuf>, list: bool) -> Result<()> {
    if let Some(path) = store {
        config.store = StoreConfig::Sled { path };
    }
    let scheduler = SchedulerBuilder::new(config).build()?;
    let manager = scheduler.manager();
    let stats = manager.get_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if list {
        let mut tasks = manager.list_tasks().await?;
        tasks.sort_by_key(|t| t.created_at);
        for task in tasks {
            println!(
                "{}  {:<9}  {:<8}  {:<20}  {}",
                task.id, task.status, task.priority, task.task_type, task.name
            );
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "herald=debug,herald_core=debug"
    } else {
        "herald=info,herald_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SchedulerConfig::load(cli.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", cli.config))?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Demo { seconds } => demo(seconds).await,
        Command::Cron { expression, count } => cron(&expression, count),
        Command::Inspect { store, tasks } => inspect(config, store, tasks).await,
    }
}
