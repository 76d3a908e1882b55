use chrono::{Local, NaiveDate, Utc};
use weekletter_core::Period;
use weekletter_pipeline::Resolved;
use weekletter_scheduler::CheckOutcome;
use weekletter_store::NewReminder;

use crate::app::App;
use crate::{JobsCommand, RemindCommand, RetryCommand};

/// Print the stored letter for the week containing `date`. Never fetches.
pub async fn show(app: &App, subject: &str, date: NaiveDate) -> anyhow::Result<()> {
    app.require_subject(subject)?;
    match app.acquisition.resolve(subject, date, false).await? {
        Resolved::Document(doc) => {
            let posted: Vec<&str> = doc
                .posted
                .iter()
                .filter(|(_, sent)| **sent)
                .map(|(name, _)| name.as_str())
                .collect();
            println!("{subject}, {} (updated {})", doc.period, doc.updated_at);
            println!("posted to: {}", if posted.is_empty() { "-".to_string() } else { posted.join(", ") });
            println!("extracted: {}", if doc.auto_extracted { "yes" } else { "no" });
            println!();
            println!("{}", doc.content);
        }
        Resolved::Empty(period) => println!("No week letter stored for {subject}, {period}."),
    }
    Ok(())
}

/// Run the document check for one subject right now.
pub async fn fetch(app: &App, subject: &str, date: NaiveDate) -> anyhow::Result<()> {
    app.require_subject(subject)?;
    let period = Period::from_date(date);
    let outcome = app.pipeline().check_subject(subject, period, Utc::now()).await?;
    let line = match outcome {
        CheckOutcome::Skipped => "skipped: retry pending or exhausted (see `weekletter retry list`)".to_string(),
        CheckOutcome::NotPublished => "nothing published yet".to_string(),
        CheckOutcome::Unchanged => "unchanged; every sink already has it".to_string(),
        CheckOutcome::Announced { sinks } => format!("announced to {}", sinks.join(", ")),
        CheckOutcome::RetryPending { attempts } => format!("fetch failed (attempt {attempts}); will retry"),
        CheckOutcome::Exhausted => "fetch failed; retries exhausted".to_string(),
    };
    println!("{subject}, {period}: {line}");
    Ok(())
}

pub fn remind(app: &App, cmd: RemindCommand) -> anyhow::Result<()> {
    match cmd {
        RemindCommand::Add {
            text,
            date,
            time,
            subject,
        } => {
            if let Some(s) = subject.as_deref() {
                app.require_subject(s)?;
            }
            if date.and_time(time) < Local::now().naive_local() {
                eprintln!("note: {date} {time} is in the past; it will be delivered on the next tick");
            }
            let reminder = app
                .reminders
                .add_manual(&NewReminder::manual(&text, date, time, subject.as_deref()))?;
            println!("reminder {} set for {} {}", reminder.id, reminder.date, reminder.time);
        }
        RemindCommand::List { subject, all, json } => {
            let reminders = app.reminders.list(subject.as_deref(), all)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reminders)?);
            } else if reminders.is_empty() {
                println!("no reminders");
            } else {
                for r in reminders {
                    println!(
                        "{:>4}  {} {}  {:<8} {:<14} {}{}",
                        r.id,
                        r.date,
                        r.time.format("%H:%M"),
                        r.subject.as_deref().unwrap_or("*"),
                        r.source.to_string(),
                        r.text,
                        if r.sent { "  (sent)" } else { "" }
                    );
                }
            }
        }
        RemindCommand::Delete { id } => {
            app.reminders.delete(id)?;
            println!("reminder {id} deleted");
        }
    }
    Ok(())
}

pub fn retry(app: &App, cmd: RetryCommand) -> anyhow::Result<()> {
    match cmd {
        RetryCommand::List => {
            let records = app.retries.list()?;
            if records.is_empty() {
                println!("no retry records");
            }
            for r in records {
                let state = if r.exhausted {
                    "exhausted".to_string()
                } else {
                    format!("next {}", r.next_attempt.with_timezone(&Local).format("%Y-%m-%d %H:%M"))
                };
                println!(
                    "{:<10} {}  attempts {}/{}  {}",
                    r.subject, r.period, r.attempts, r.max_attempts, state
                );
            }
        }
        RetryCommand::Clear {
            subject,
            week,
            year,
        } => {
            let period = Period::new(week, year)?;
            if app.retries.clear(&subject, period)? {
                println!("retry record for {subject}, {period} cleared");
            } else {
                println!("no retry record for {subject}, {period}");
            }
        }
    }
    Ok(())
}

pub fn jobs(app: &App, cmd: JobsCommand) -> anyhow::Result<()> {
    match cmd {
        JobsCommand::List => {
            let jobs = app.jobs.list()?;
            if jobs.is_empty() {
                println!("no jobs registered yet; they are created by `weekletter run`");
            }
            for j in jobs {
                println!(
                    "{:<16} {:<16} {:<8} runs {:<5} next {}{}",
                    j.name,
                    j.cron,
                    j.status.to_string(),
                    j.run_count,
                    j.next_run.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    if j.enabled { "" } else { "  (disabled)" }
                );
            }
        }
        JobsCommand::Enable { name } => app.jobs.set_enabled(&name, true)?,
        JobsCommand::Disable { name } => app.jobs.set_enabled(&name, false)?,
    }
    Ok(())
}

pub fn purge(app: &App, subject: &str, week: u32, year: i32) -> anyhow::Result<()> {
    let period = Period::new(week, year)?;
    if app.acquisition.purge(subject, period)? {
        println!("purged {subject}, {period}");
    } else {
        println!("nothing stored for {subject}, {period}");
    }
    Ok(())
}
