//! Offline queue inspection commands

use colored::Colorize;
use tabled::Tabled;

use stockdash_net::Result;
use stockdash_net::offline::OfflineTask;

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};
use crate::output::json::format_json;
use crate::output::table::format_table;

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "TYPE")]
    task_type: String,
    #[tabled(rename = "ENQUEUED")]
    enqueued_at: String,
    #[tabled(rename = "PAYLOAD")]
    payload: String,
}

impl TaskRow {
    fn new(index: usize, task: &OfflineTask) -> Self {
        Self {
            index,
            task_type: task.task_type.clone(),
            enqueued_at: task
                .enqueued_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            payload: task.payload.to_string(),
        }
    }
}

/// Show pending task count and storage location
pub fn status(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let queue = ctx.offline_queue();
    let path = ctx.storage_path.display().to_string();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "pending": queue.len(),
                "oldest_enqueued_at": queue.front().map(|t| t.enqueued_at),
                "path": path,
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            println!("Offline Queue");
            println!("────────────────────────────────────────");
            println!("Location:       {}", path);
            println!("Pending tasks:  {}", queue.len());
            if let Some(oldest) = queue.front() {
                println!(
                    "Oldest task:    {}",
                    oldest
                        .enqueued_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M")
                );
            }
        }
    }

    Ok(())
}

/// List pending tasks in replay order
pub fn list(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let queue = ctx.offline_queue();
    let tasks: Vec<&OfflineTask> = queue.tasks().collect();

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&tasks)?),
        OutputFormat::Table => {
            let rows: Vec<TaskRow> = tasks
                .iter()
                .enumerate()
                .map(|(i, t)| TaskRow::new(i + 1, t))
                .collect();
            println!("{}", format_table(&rows));
        }
        OutputFormat::Pretty => {
            if tasks.is_empty() {
                println!("{} No pending offline tasks", "✓".green());
            }
            for (i, task) in tasks.iter().enumerate() {
                let row = TaskRow::new(i + 1, task);
                println!(
                    "{}. {} {} {}",
                    row.index,
                    row.task_type.bold(),
                    row.enqueued_at.dimmed(),
                    row.payload
                );
            }
        }
    }

    Ok(())
}

/// Drop every pending task
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let mut queue = ctx.offline_queue();
    let removed = queue.len();
    queue.clear();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "tasks_removed": removed,
                "success": true,
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            if removed > 0 {
                println!("{} Cleared {} offline task(s)", "✓".green(), removed);
            } else {
                println!("Offline queue was already empty");
            }
        }
    }

    Ok(())
}
