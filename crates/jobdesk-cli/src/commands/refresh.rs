use jobdesk_core::RefreshOutcome;

use super::{report_status, CmdResult, Context};

pub async fn run(ctx: &Context) -> CmdResult {
    let ws = ctx.workspace()?;
    match ws.store().refresh_all().await? {
        RefreshOutcome::Completed { pulled, status } => {
            report_status(&status);
            if ctx.json {
                ctx.print_json(&pulled)?;
            } else {
                for (kind, count) in &pulled {
                    println!("{kind}: {count}");
                }
            }
        }
        RefreshOutcome::AlreadyRunning => println!("refresh already running"),
    }
    Ok(())
}
