// Macros
#[macro_use]
extern crate prettytable;

// Std
use std::env;

// Crates
use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use dotenv::dotenv;
use http::StatusCode;
use indexmap::IndexMap;
use prettytable::Table;
use reqwest::{Client, Url};
use serde_json::json;

// Local
use allotment::allocation::{calculate_total, AllocationSheet, Entry};
use allotment::db::TimesheetRecord;
use allotment::week::week_key_offset;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let base_url: String = env::var("BASE_URL").context("BASE_URL env var must be set!")?;

    let client = Client::new();

    let matches = Command::new("allotment")
        .version(crate_version!())
        .about("Split your work week across projects.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("weeks").about("List every submitted week."))
        .subcommand(
            Command::new("show")
                .about("Show the allocation submitted for one week.")
                .arg(week_arg())
                .arg(weeks_back_arg()),
        )
        .subcommand(
            Command::new("submit")
                .about("Submit the allocation for one week, replacing any earlier one.")
                .arg(week_arg())
                .arg(weeks_back_arg())
                .arg(
                    Arg::new("entry")
                        .short('e')
                        .long("entry")
                        .value_name("PROJECT[=PCT]")
                        .action(ArgAction::Append)
                        .required(true)
                        .help("A project and, optionally, its percentage. Projects without one share what is left."),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete the allocation submitted for one week.")
                .arg(week_arg())
                .arg(weeks_back_arg()),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("weeks", _)) => list_weeks(&base_url, &client).await,
        Some(("show", sub)) => show_week(&base_url, &client, &resolve_week(sub)).await,
        Some(("submit", sub)) => {
            let entry_args: Vec<&String> = sub
                .get_many::<String>("entry")
                .map(|values| values.collect())
                .unwrap_or_default();
            submit_week(&base_url, &client, &resolve_week(sub), &entry_args).await
        }
        Some(("delete", sub)) => delete_week(&base_url, &client, &resolve_week(sub)).await,
        _ => unreachable!("a subcommand is required"),
    }
}

fn week_arg() -> Arg {
    Arg::new("week")
        .short('w')
        .long("week")
        .value_name("KEY")
        .conflicts_with("weeks_back")
        .help("Week key such as \"1/5/2025 - 1/11/2025\".")
}

fn weeks_back_arg() -> Arg {
    Arg::new("weeks_back")
        .short('b')
        .long("weeks-back")
        .value_name("N")
        .value_parser(value_parser!(i64))
        .help("Use the week N weeks before the current one.")
}

fn resolve_week(matches: &ArgMatches) -> String {
    if let Some(key) = matches.get_one::<String>("week") {
        return key.clone();
    }
    let weeks_back = matches.get_one::<i64>("weeks_back").copied().unwrap_or(0);
    week_key_offset(Local::now().date_naive(), weeks_back)
}

fn api_url(base_url: &str, week_key: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base_url).context("BASE_URL is not a valid URL")?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("BASE_URL cannot carry a path"))?;
        segments.pop_if_empty().extend(&["api", "timeentries"]);
        if let Some(key) = week_key {
            segments.push(key);
        }
    }

    Ok(url)
}

/// Turns `-e PPP=40 -e General` into a sheet: every project is added first,
/// then each given percentage is applied as a manual edit in order.
fn build_sheet(entry_args: &[&String]) -> Result<AllocationSheet> {
    let mut sheet = AllocationSheet::new();
    let mut pinned = Vec::new();

    for arg in entry_args {
        let (project, percentage) = match arg.split_once('=') {
            Some((project, raw)) => {
                let value = raw
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("Percentage for {} must be a whole number", project))?;
                (project.trim(), Some(value))
            }
            None => (arg.trim(), None),
        };
        if project.is_empty() {
            bail!("Every entry needs a project name");
        }

        let id = sheet.add_entry(project);
        if let Some(value) = percentage {
            pinned.push((id, value));
        }
    }

    for (id, value) in pinned {
        sheet.set_percentage(&id, value)?;
    }

    Ok(sheet)
}

fn entries_table(entries: &[Entry]) -> Table {
    let mut table = Table::new();
    table.add_row(row![Fb => "Project", "Percentage"]);
    for entry in entries {
        let project = if entry.project_id.is_empty() {
            "(none)"
        } else {
            entry.project_id.as_str()
        };
        table.add_row(row![project, r -> entry.percentage]);
    }
    table.add_row(row![b -> "Total", rb -> calculate_total(entries)]);

    table
}

async fn list_weeks(base_url: &str, client: &Client) -> Result<()> {
    let res = client.get(api_url(base_url, None)?).send().await?;
    if !res.status().is_success() {
        bail!("Http error: {}", res.status());
    }
    let weeks = res.json::<IndexMap<String, Vec<Entry>>>().await?;

    if weeks.is_empty() {
        println!("No weeks submitted yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row![Fb => "Week", "Projects", "Total"]);
    for (week_key, entries) in &weeks {
        let projects: Vec<&str> = entries
            .iter()
            .map(|entry| entry.project_id.as_str())
            .filter(|project| !project.is_empty())
            .collect();
        table.add_row(row![week_key, projects.join(", "), r -> calculate_total(entries)]);
    }
    table.printstd();

    Ok(())
}

async fn show_week(base_url: &str, client: &Client, week_key: &str) -> Result<()> {
    let res = client.get(api_url(base_url, Some(week_key))?).send().await?;

    match res.status() {
        StatusCode::OK => {
            let record = res.json::<TimesheetRecord>().await?;
            println!(
                "{} (submitted {})",
                record.week_key,
                record.submit_date.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            );
            entries_table(&record.entries).printstd();
            Ok(())
        }
        StatusCode::NOT_FOUND => {
            println!("Nothing submitted for {}.", week_key);
            Ok(())
        }
        status => Err(anyhow!("Http error: {}", status)),
    }
}

async fn submit_week(base_url: &str, client: &Client, week_key: &str, entry_args: &[&String]) -> Result<()> {
    let sheet = build_sheet(entry_args)?;

    let message = sheet.validate();
    if !message.is_empty() {
        bail!(message);
    }

    println!("{}", week_key);
    entries_table(sheet.entries()).printstd();

    let body = json!({ "weekKey": week_key, "entries": sheet.entries() });
    let res = client.post(api_url(base_url, None)?).json(&body).send().await?;

    match res.status() {
        StatusCode::OK => {
            println!("Week submitted.");
            Ok(())
        }
        status => {
            let detail = res.text().await.unwrap_or_default();
            Err(anyhow!("Http error: {} {}", status, detail))
        }
    }
}

async fn delete_week(base_url: &str, client: &Client, week_key: &str) -> Result<()> {
    let res = client.delete(api_url(base_url, Some(week_key))?).send().await?;

    match res.status() {
        StatusCode::OK => println!("Week deleted."),
        StatusCode::NOT_FOUND => println!("Nothing submitted for {}.", week_key),
        status => bail!("Http error: {}", status),
    }

    Ok(())
}
