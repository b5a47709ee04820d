use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hemogas::analysis::interpret;
use hemogas::calibration::{CalibrationStatus, PH_ONLY_TYPE};
use hemogas::config::HemogasConfig;
use hemogas::events::{AnalysisEvent, CalibrationEvent};
use hemogas::hl7::Hl7Exporter;
use hemogas::sampling::{RandomSampler, Sampler, ScriptedSampler};
use hemogas::session::{Role, SessionManager, OPERATOR_PERMISSIONS};
use hemogas::storage::InMemoryStorage;
use hemogas::{AnalysisGate, AnalysisRequest, AnalysisResult, CalibrationEngine};

#[derive(Parser)]
#[command(name = "hemogas")]
#[command(about = "Blood gas analyzer simulator")]
#[command(
    long_about = "Hemogas simulates a point-of-care blood gas analyzer: operator \
                  sessions with idle timeout, a stepwise calibration workflow, and \
                  timed sample analysis with HL7 result export. Run 'hemogas demo' \
                  for a full login-calibrate-analyze cycle."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a complete login, calibration and analysis cycle
    Demo {
        /// Username to log in with
        #[arg(long, default_value = "operator", help = "Demo account: admin, supervisor or operator")]
        user: String,
        /// Password for the account
        #[arg(long, default_value = "operator123", help = "Password for the demo account")]
        password: String,
        /// Sample identifier to analyze
        #[arg(long, help = "Sample identifier; generated when omitted")]
        sample_id: Option<String>,
        /// Patient identifier attached to the result
        #[arg(long, help = "Patient identifier attached to the result")]
        patient_id: Option<String>,
        /// Run only the pH calibration step
        #[arg(long, help = "Calibrate the pH electrode only")]
        ph_only: bool,
        /// Shrink timer durations so the cycle finishes in seconds
        #[arg(long, help = "Use millisecond-scale timers instead of realistic ones")]
        fast: bool,
        /// Force every simulated draw to succeed
        #[arg(long, help = "Make calibration steps deterministic instead of 90% draws")]
        deterministic: bool,
    },
    /// Display the role/permission matrix
    Permissions,
    /// Write a hemogas.toml with the default configuration
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    HemogasConfig::load_env_file()?;
    let config = HemogasConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level)),
        )
        .init();

    match cli.command {
        Commands::Demo {
            user,
            password,
            sample_id,
            patient_id,
            ph_only,
            fast,
            deterministic,
        } => {
            demo_command(
                config,
                DemoOptions {
                    user,
                    password,
                    sample_id,
                    patient_id,
                    ph_only,
                    fast,
                    deterministic,
                },
            )
            .await
        }
        Commands::Permissions => permissions_command(),
        Commands::InitConfig => init_config_command(&config),
    }
}

struct DemoOptions {
    user: String,
    password: String,
    sample_id: Option<String>,
    patient_id: Option<String>,
    ph_only: bool,
    fast: bool,
    deterministic: bool,
}

async fn demo_command(mut config: HemogasConfig, options: DemoOptions) -> Result<()> {
    if options.fast {
        config.calibration.step_duration_ms = 50;
        config.analysis.min_duration_ms = 50;
        config.analysis.max_duration_ms = 100;
    }

    let storage = Arc::new(InMemoryStorage::with_default_users());
    let sampler: Arc<dyn Sampler> = if options.deterministic {
        Arc::new(ScriptedSampler::passing())
    } else {
        Arc::new(RandomSampler)
    };
    let exporter = Arc::new(Hl7Exporter::new());

    let session = SessionManager::new(storage.clone(), config.session.clone());
    let calibration = CalibrationEngine::new(
        storage.clone(),
        sampler.clone(),
        config.calibration.clone(),
    );
    let gate = AnalysisGate::new(
        session.clone(),
        calibration.clone(),
        storage.clone(),
        exporter.clone(),
        sampler.clone(),
        config.analysis.clone(),
    );

    session.login(&options.user, &options.password).await?;
    let role = session
        .current_role()
        .await
        .map(|role| role.to_string())
        .unwrap_or_default();
    println!("Logged in as {} ({role})", options.user);
    println!(
        "Session expires in {} seconds",
        session.session_time_remaining().await
    );

    run_calibration(&calibration, options.ph_only).await?;

    let mut analysis_rx = gate.subscribe();
    gate.start_analysis(AnalysisRequest {
        sample_id: options.sample_id,
        patient_id: options.patient_id,
        temperature: None,
    })
    .await?;
    println!("\nAnalyzing sample...");

    loop {
        match analysis_rx.recv().await? {
            AnalysisEvent::Completed { result } => {
                print_result(&result);
                break;
            }
            AnalysisEvent::Error { reason } => bail!("analysis failed: {reason}"),
            AnalysisEvent::Started { .. } => {}
        }
    }

    println!("\nHL7 messages sent: {}", exporter.messages_sent());
    session.logout().await;
    println!("Logged out");
    Ok(())
}

/// Drive a calibration run to completion, retrying failed steps until the
/// engine gives up on its own.
async fn run_calibration(calibration: &CalibrationEngine, ph_only: bool) -> Result<()> {
    let calibration_type = if ph_only { PH_ONLY_TYPE } else { "full" };
    println!("\nStarting {calibration_type} calibration...");

    let mut rx = calibration.subscribe();
    calibration.start_calibration(calibration_type).await;
    loop {
        match rx.recv().await? {
            CalibrationEvent::StepChanged { step: Some(step) } => {
                println!("  [{:>3}%] {step}", calibration.progress().await);
            }
            CalibrationEvent::StepCompleted { step, success } => {
                println!("  {step}: {}", if success { "OK" } else { "FAILED" });
            }
            CalibrationEvent::Failed { reason } => {
                if calibration.status().await == CalibrationStatus::AwaitingRetryOrCancel {
                    println!("  {reason} Retrying...");
                    calibration.retry_step().await;
                } else {
                    println!("  {reason}");
                }
            }
            CalibrationEvent::Completed { success: true } => {
                println!(
                    "Calibration complete; valid for {} more days",
                    calibration.validity_days_remaining().await
                );
                return Ok(());
            }
            CalibrationEvent::Completed { success: false } => {
                bail!("calibration failed");
            }
            _ => {}
        }
    }
}

fn print_result(result: &AnalysisResult) {
    println!("\nResults for sample {} ({})", result.sample_id, result.operator);
    println!("  pH      {:>7.2}", result.ph);
    println!("  pCO2    {:>7.1} mmHg", result.pco2);
    println!("  pO2     {:>7.1} mmHg", result.po2);
    println!("  HCO3    {:>7.1} mmol/L", result.hco3);
    println!("  SO2     {:>7.1} %", result.so2);
    println!("  BE      {:>7.1} mmol/L", result.base_excess);
    println!("  Na      {:>7.1} mmol/L", result.sodium);
    println!("  K       {:>7.1} mmol/L", result.potassium);
    println!("  Cl      {:>7.1} mmol/L", result.chloride);
    println!("  Ca      {:>7.1} mmol/L", result.calcium);
    println!("  Glucose {:>7.1} mg/dL", result.glucose);
    println!("  Lactate {:>7.1} mmol/L", result.lactate);
    println!("\nInterpretation: {}", interpret(result));
}

fn permissions_command() -> Result<()> {
    let extra_permissions = ["advanced_calibration", "user_management", "system_config"];
    let roles = [Role::Administrator, Role::Supervisor, Role::Operator];

    println!("{:<22} {}", "permission", "roles");
    for permission in OPERATOR_PERMISSIONS.iter().chain(&extra_permissions) {
        let allowed: Vec<String> = roles
            .iter()
            .filter(|role| role.allows(permission))
            .map(|role| role.to_string())
            .collect();
        println!("{permission:<22} {}", allowed.join(", "));
    }
    Ok(())
}

fn init_config_command(config: &HemogasConfig) -> Result<()> {
    config.save_to_file("hemogas.toml")?;
    println!("Wrote hemogas.toml");
    Ok(())
}
