use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::pose::PROMPT_READY;
use facegate_core::{CaptureStatus, HistoryRecord, VerifyOutcome};
use std::io::Write;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[zbus::proxy(
    interface = "org.facegate.Capture1",
    default_service = "org.facegate.Capture1",
    default_path = "/org/facegate/Capture1"
)]
trait Capture {
    async fn start_enrollment(&self, subject: &str) -> zbus::Result<String>;
    async fn start_verification(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn skip_step(&self) -> zbus::Result<String>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn submit(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
    async fn history(&self) -> zbus::Result<String>;
    async fn reset_database(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate guided face capture CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Guided five-pose enrollment; submits the batch when complete
    Enroll {
        /// Name to register the face under
        name: String,
        /// Stop after capture without submitting
        #[arg(long)]
        no_submit: bool,
    },
    /// Accept the current enrollment pose as-is
    Skip,
    /// Submit (or resubmit) the completed enrollment batch
    Submit,
    /// Check in: wait for a face, capture one still, recognize it
    Verify {
        /// Seconds to wait for a face before capturing anyway
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Capture now in an active verification session
    Capture,
    /// Show the active capture session
    Status,
    /// End the active capture session
    Stop,
    /// List past successful check-ins
    History,
    /// Delete all enrolled faces and check-in history
    Reset {
        /// Required to actually reset
        #[arg(long)]
        yes: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Commands::Devices => {
            list_devices();
            Ok(())
        }
        command => run(command).await,
    }
}

async fn run(command: Commands) -> Result<()> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = CaptureProxy::new(&conn)
        .await
        .context("facegated is not reachable on the session bus")?;

    match command {
        Commands::Enroll { name, no_submit } => enroll(&proxy, &name, no_submit).await?,
        Commands::Skip => {
            let status = parse_status(&proxy.skip_step().await?)?;
            println!("Step {} accepted", status.step + 1);
        }
        Commands::Submit => println!("{}", proxy.submit().await?),
        Commands::Verify { timeout } => verify(&proxy, Duration::from_secs(timeout)).await?,
        Commands::Capture => print_outcome(&serde_json::from_str(&proxy.capture().await?)?),
        Commands::Status => match session_from_status(&proxy.status().await?)? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("facegated: idle"),
        },
        Commands::Stop => {
            if proxy.stop().await? {
                println!("Session stopped");
            } else {
                println!("No active session");
            }
        }
        Commands::History => {
            let records: Vec<HistoryRecord> = serde_json::from_str(&proxy.history().await?)?;
            if records.is_empty() {
                println!("No check-ins recorded");
            }
            for r in records {
                println!("{:>5}  {:<24} {}", r.id, r.subject, r.time);
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to reset without --yes");
            }
            println!("{}", proxy.reset_database().await?);
        }
        Commands::Devices => list_devices(),
    }

    Ok(())
}

async fn enroll(proxy: &CaptureProxy<'_>, name: &str, no_submit: bool) -> Result<()> {
    let status = parse_status(&proxy.start_enrollment(name).await?)?;
    println!("Enrolling {name}: {} poses", status.step_count);

    let mut last_line = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                proxy.stop().await?;
                println!();
                bail!("enrollment cancelled");
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let Some(status) = session_from_status(&proxy.status().await?)? else {
            println!();
            bail!("capture session ended unexpectedly");
        };

        let line = progress_line(&status);
        if line != last_line {
            print!("\r\x1b[2K{line}");
            std::io::stdout().flush()?;
            last_line = line;
        }
        if status.complete {
            println!();
            break;
        }
    }

    if no_submit {
        println!("Capture complete; run `facegate submit` to register");
        return Ok(());
    }
    match proxy.submit().await {
        Ok(message) => {
            println!("{message}");
            proxy.stop().await?;
            Ok(())
        }
        Err(e) => {
            // Session is kept so the batch can be resubmitted.
            bail!("submission failed: {e} (retry with `facegate submit`)")
        }
    }
}

async fn verify(proxy: &CaptureProxy<'_>, timeout: Duration) -> Result<()> {
    proxy.start_verification().await?;
    println!("Look at the camera...");

    let deadline = Instant::now() + timeout;
    loop {
        let ready = session_from_status(&proxy.status().await?)?
            .is_some_and(|s| s.prompt == PROMPT_READY);
        if ready || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let result = proxy.capture().await;
    proxy.stop().await?;
    print_outcome(&serde_json::from_str(&result?)?);
    Ok(())
}

fn list_devices() {
    let devices = facegate_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

fn parse_status(json: &str) -> Result<CaptureStatus> {
    serde_json::from_str(json).context("malformed status from facegated")
}

/// Extract the session from the daemon's `Status()` payload.
fn session_from_status(json: &str) -> Result<Option<CaptureStatus>> {
    let mut value: serde_json::Value =
        serde_json::from_str(json).context("malformed status from facegated")?;
    match value.get_mut("session").map(serde_json::Value::take) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(session) => Ok(Some(serde_json::from_value(session)?)),
    }
}

fn progress_line(status: &CaptureStatus) -> String {
    const WIDTH: usize = 20;
    let filled = (status.progress_percent as usize * WIDTH) / 100;
    format!(
        "[{}/{}] {:<42} [{}{}] {:>3}%",
        (status.step + 1).min(status.step_count),
        status.step_count,
        status.prompt,
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        status.progress_percent
    )
}

fn print_outcome(outcome: &VerifyOutcome) {
    match outcome {
        VerifyOutcome::Match { subject, timestamp } => {
            println!("Welcome, {subject} (checked in {timestamp})")
        }
        VerifyOutcome::NoMatch { reason: Some(r) } => println!("Not recognized: {r}"),
        VerifyOutcome::NoMatch { reason: None } => println!("Not recognized"),
    }
}
