//! `arbiter answer`: terminal client of a running decision service.

use std::time::Duration;

use arbiter_core::domain::kind::{BodyRow, KindTag};
use arbiter_core::frontend::remote::{
    DecisionService, DecisionView, Notification, RemoteClient, Subscription,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

use crate::CliError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

type Input = Lines<BufReader<Stdin>>;

pub fn answer_interactively(addr: &str) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(session(addr))
}

async fn session(addr: &str) -> Result<(), CliError> {
    let client = RemoteClient::connect(addr).await?;
    let mut subscription = Subscription::open(addr).await?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    println!("connected to {addr}, waiting for decisions");

    loop {
        let pending = tokio::select! {
            notification = subscription.next() => {
                match notification? {
                    Some(Notification::Finished) => println!("run finished"),
                    Some(Notification::Error) => println!("run ended with an error"),
                    None => println!("decision service went away"),
                }
                return Ok(());
            }
            pending = next_batch(&client) => pending?,
        };
        if !answer_batch(&client, pending, &mut input).await? {
            println!("batch cancelled");
            return Ok(());
        }
    }
}

async fn next_batch(client: &RemoteClient) -> Result<Vec<DecisionView>, CliError> {
    loop {
        if let Some(mut pending) = client.get_decisions().await? {
            pending.sort_by_key(|view| view.index);
            return Ok(pending);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Ask every decision of the batch; `false` once the user cancelled.
async fn answer_batch(
    client: &RemoteClient,
    pending: Vec<DecisionView>,
    input: &mut Input,
) -> Result<bool, CliError> {
    let total = pending.len();
    for (i, view) in pending.iter().enumerate() {
        print_view(view, i + 1, total);
        loop {
            let Some(line) = input.next_line().await? else {
                client.cancel().await?;
                return Ok(false);
            };
            let line = line.trim();
            let offered = |keyword: &str| view.options.iter().any(|o| o == keyword);

            if line.eq_ignore_ascii_case("cancel") && offered("cancel") {
                client.cancel().await?;
                return Ok(false);
            }
            let value = if line.eq_ignore_ascii_case("skip") && offered("skip") {
                Value::Null
            } else {
                wire_value(view.kind, line)
            };

            match client.answer(&view.id.to_string(), value).await? {
                Some(true) => break,
                Some(false) => println!("rejected, try again"),
                None => println!("could not interpret '{line}', try again"),
            }
        }
    }
    let done = client.answers_done().await?;
    debug!(done, "batch submitted");
    Ok(true)
}

fn print_view(view: &DecisionView, position: usize, total: usize) {
    println!();
    println!("[Decision {position}/{total}] {}", view.question);
    for line in &view.context {
        println!("  {line}");
    }
    if let Ok(Some(rows)) = serde_json::from_str::<Option<Vec<BodyRow>>>(&view.body) {
        for row in rows {
            println!("  {:>3}  {:<24} {}", row.key, row.label, row.value);
        }
    }
    if !view.options.is_empty() {
        println!("options: {}", view.options.join(", "));
    }
}

/// Turn a typed line into what the service expects for `kind`.
fn wire_value(kind: KindTag, line: &str) -> Value {
    match kind {
        KindTag::Bool => match line.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" => Value::Bool(true),
            "n" | "no" | "false" => Value::Bool(false),
            _ => Value::String(line.to_string()),
        },
        KindTag::Numeric | KindTag::List => {
            serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
        }
        KindTag::Unknown => Value::String(line.to_string()),
    }
}
