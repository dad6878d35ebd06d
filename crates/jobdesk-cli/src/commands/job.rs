//! Job commands. Saving and deleting go through the workspace so the
//! calendar follows.

use std::path::PathBuf;

use chrono::Utc;
use clap::Subcommand;
use jobdesk_core::{Filter, Job, ReconcileReport};

use super::{report_status, CmdResult, Context};

#[derive(Subcommand)]
pub enum JobAction {
    /// List jobs
    List {
        /// Only jobs for this client
        #[arg(long)]
        client: Option<String>,
    },
    /// Show one job
    Show { id: String },
    /// Create or update a job from a JSON file
    Save { file: PathBuf },
    /// Delete a job and its calendar events
    Delete { id: String },
    /// Re-project a stored job onto the calendar
    Reconcile { id: String },
}

fn print_report(ctx: &Context, report: Option<&ReconcileReport>) -> CmdResult {
    let Some(report) = report else {
        if !ctx.json {
            println!("calendar: not connected");
        }
        return Ok(());
    };
    if ctx.json {
        return ctx.print_json(report);
    }
    println!(
        "calendar: {} created, {} updated, {} unchanged, {} deleted",
        report.created, report.updated, report.unchanged, report.deleted
    );
    for failed in &report.failed_deletions {
        eprintln!("warning: could not delete event {}: {}", failed.event_id, failed.error);
    }
    Ok(())
}

pub async fn run(action: JobAction, ctx: &Context) -> CmdResult {
    let ws = ctx.workspace()?;

    match action {
        JobAction::List { client } => {
            let filter = match client {
                Some(client_id) => Filter::new().eq("clientId", client_id),
                None => Filter::new(),
            };
            let fetched = ws.store().select_as::<Job>(&filter).await?;
            report_status(&fetched.status);
            if ctx.json {
                ctx.print_json(&fetched.records)?;
            } else {
                for job in &fetched.records {
                    let when = job
                        .start_date
                        .map(|date| date.to_string())
                        .unwrap_or_else(|| "unscheduled".into());
                    println!("{}  {}  {:?}  {}", job.id, when, job.status, job.title);
                }
            }
        }
        JobAction::Show { id } => {
            let job = ws
                .store()
                .get::<Job>(&id)
                .await?
                .ok_or_else(|| format!("job not found: {id}"))?;
            ctx.print_json(&job)?;
        }
        JobAction::Save { file } => {
            let content = std::fs::read_to_string(&file)?;
            let mut job: Job = serde_json::from_str(&content)?;
            let now = Utc::now();
            job.created_at.get_or_insert(now);
            job.updated_at = Some(now);

            let saved = ws.save_job(&job).await?;
            report_status(&saved.status);
            if !ctx.json {
                println!("Job saved: {}", job.id);
            }
            print_report(ctx, saved.calendar.as_ref())?;
        }
        JobAction::Delete { id } => {
            let deleted = ws.delete_job(&id).await?;
            report_status(&deleted.status);
            if !ctx.json {
                println!("Job deleted: {id}");
            }
            print_report(ctx, deleted.calendar.as_ref())?;
        }
        JobAction::Reconcile { id } => {
            let report = ws.reconcile_job(&id).await?;
            print_report(ctx, report.as_ref())?;
        }
    }
    Ok(())
}
