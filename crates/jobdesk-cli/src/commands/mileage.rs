use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use jobdesk_core::models::new_id;
use jobdesk_core::{Filter, MileageRecord, Tenant};

use super::{report_status, CmdResult, Context};

#[derive(Subcommand)]
pub enum MileageAction {
    /// List logged trips
    List {
        /// Only trips for this job
        #[arg(long)]
        job: Option<String>,
    },
    /// Log a trip
    Add {
        /// Trip date (YYYY-MM-DD)
        date: NaiveDate,
        miles: f64,
        /// Rate per mile; defaults to the business profile's rate
        #[arg(long)]
        rate: Option<f64>,
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        purpose: Option<String>,
    },
}

pub async fn run(action: MileageAction, ctx: &Context) -> CmdResult {
    let ws = ctx.workspace()?;
    let store = ws.store();

    match action {
        MileageAction::List { job } => {
            let filter = match job {
                Some(job_id) => Filter::new().eq("jobId", job_id),
                None => Filter::new(),
            };
            let fetched = store.select_as::<MileageRecord>(&filter).await?;
            report_status(&fetched.status);
            if ctx.json {
                ctx.print_json(&fetched.records)?;
            } else {
                let mut total = 0.0;
                for trip in &fetched.records {
                    let deduction = trip.deduction.unwrap_or_default();
                    total += deduction;
                    println!("{}  {:>8.1} mi  {:>9.2}  {}", trip.date, trip.miles, deduction, trip.id);
                }
                println!("total deduction: {total:.2}");
            }
        }
        MileageAction::Add {
            date,
            miles,
            rate,
            job,
            from,
            to,
            purpose,
        } => {
            let rate_per_mile = match rate {
                Some(rate) => rate,
                None => {
                    let tenant = store.tenant().resolve().await;
                    let profile = match tenant {
                        Some(identity) => store.get::<Tenant>(&identity).await?,
                        None => None,
                    };
                    profile
                        .and_then(|profile| profile.default_mileage_rate)
                        .ok_or("--rate required: no default mileage rate in the business profile")?
                }
            };

            let trip = MileageRecord {
                id: new_id(),
                user_id: None,
                job_id: job,
                date,
                origin: from,
                destination: to,
                miles,
                rate_per_mile,
                purpose,
                deduction: None,
                created_at: Some(Utc::now()),
            };
            let written = store.upsert_as(std::slice::from_ref(&trip)).await?;
            report_status(&written.status);
            println!("Trip logged: {}", trip.id);
        }
    }
    Ok(())
}
