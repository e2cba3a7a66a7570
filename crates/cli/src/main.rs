use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use eps_core::config::{flag_from_env_value, max_reference_depth_from_env_value};
use eps_core::{FhirResponse, MessageKind, ReleaseKind, TranslatorConfig};
use fhir::{Bundle, Claim, FhirResource, MedicationRequest, Parameters, Resource, Task};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "eps-translate")]
#[command(about = "Translate EPS FHIR messages to and from HL7 V3")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a ParentPrescription from a prescription-order bundle
    Prescription {
        /// FHIR Bundle (JSON)
        file: PathBuf,
    },
    /// Build a CancellationRequest from a prescription-order-update bundle
    Cancellation {
        /// FHIR Bundle (JSON)
        file: PathBuf,
    },
    /// Build a DispenseNotification from a dispense-notification bundle
    Dispense {
        /// FHIR Bundle (JSON)
        file: PathBuf,
    },
    /// Build a DispenseClaim from a Claim
    DispenseClaim {
        /// FHIR Claim (JSON)
        file: PathBuf,
    },
    /// Build a nominated or patient release request
    Release {
        /// FHIR Parameters (JSON)
        file: PathBuf,
    },
    /// Build an ETPWithdraw from a withdraw Task
    Withdraw {
        /// FHIR Task (JSON)
        file: PathBuf,
    },
    /// Convert a tracker response into a Task bundle
    Tracker {
        /// Tracker response (JSON)
        file: PathBuf,
    },
    /// Convert an HL7 V3 cancellation response into FHIR
    CancellationResponse {
        /// Cancellation response (XML)
        file: PathBuf,
    },
    /// Translate a release response into prescription bundles
    ReleaseResponse {
        /// Release response (XML)
        file: PathBuf,
    },
    /// Render the dosage instructions of a MedicationRequest as text
    RenderDosage {
        /// FHIR MedicationRequest (JSON)
        file: PathBuf,
    },
}

/// Resolves the translator configuration from `EPS_*` environment variables.
fn config_from_env() -> anyhow::Result<TranslatorConfig> {
    let depth = max_reference_depth_from_env_value(std::env::var("EPS_MAX_REFERENCE_DEPTH").ok())?;
    let render_missing_dosage_text = flag_from_env_value(
        "EPS_RENDER_MISSING_DOSAGE_TEXT",
        std::env::var("EPS_RENDER_MISSING_DOSAGE_TEXT").ok(),
        false,
    )?;
    let xml_declaration = flag_from_env_value(
        "EPS_XML_DECLARATION",
        std::env::var("EPS_XML_DECLARATION").ok(),
        true,
    )?;
    Ok(TranslatorConfig::new(depth, render_missing_dosage_text, xml_declaration)?)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_resource<T>(path: &Path) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + FhirResource,
{
    let text = read_input(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not JSON", path.display()))?;
    match value.get("resourceType").and_then(serde_json::Value::as_str) {
        Some(found) if found == T::RESOURCE_TYPE => {}
        found => anyhow::bail!(
            "{} holds a {}, expected a {}",
            path.display(),
            found.unwrap_or("resource without resourceType"),
            T::RESOURCE_TYPE
        ),
    }
    fhir::parse(&text).with_context(|| format!("{} is not a valid {}", path.display(), T::RESOURCE_TYPE))
}

/// Checks the bundle's event against the subcommand; bundles without a header pass.
fn expect_kind(bundle: &Bundle, expected: &[MessageKind]) -> anyhow::Result<()> {
    match MessageKind::of(bundle) {
        Ok(kind) if expected.contains(&kind) => Ok(()),
        Ok(kind) => anyhow::bail!("bundle carries a {} message", kind.event_code()),
        Err(eps_core::TranslationError::MissingRequiredField { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn response_json(response: FhirResponse) -> anyhow::Result<String> {
    if response.is_error() {
        tracing::warn!("response translated to an OperationOutcome");
    }
    Ok(serde_json::to_string_pretty(&Resource::from(response))?)
}

fn run(command: Commands, config: &TranslatorConfig) -> anyhow::Result<String> {
    let output = match command {
        Commands::Prescription { file } => {
            let bundle: Bundle = read_resource(&file)?;
            expect_kind(&bundle, &[MessageKind::PrescriptionOrder])?;
            eps_core::to_xml(&eps_core::build_parent_prescription(&bundle, config)?, config)?
        }
        Commands::Cancellation { file } => {
            let bundle: Bundle = read_resource(&file)?;
            expect_kind(&bundle, &[MessageKind::PrescriptionOrderUpdate])?;
            eps_core::to_xml(&eps_core::build_cancellation_request(&bundle, config)?, config)?
        }
        Commands::Dispense { file } => {
            let bundle: Bundle = read_resource(&file)?;
            expect_kind(&bundle, &[MessageKind::DispenseNotification])?;
            eps_core::to_xml(&eps_core::build_dispense_notification(&bundle, config)?, config)?
        }
        Commands::DispenseClaim { file } => {
            let claim: Claim = read_resource(&file)?;
            eps_core::to_xml(&eps_core::build_dispense_claim(&claim, config)?, config)?
        }
        Commands::Release { file } => {
            let parameters: Parameters = read_resource(&file)?;
            let interaction = ReleaseKind::of(&parameters).interaction();
            tracing::info!(interaction = interaction.id(), "building release request");
            eps_core::to_xml(&eps_core::build_release_request(&parameters, config)?, config)?
        }
        Commands::Withdraw { file } => {
            let task: Task = read_resource(&file)?;
            eps_core::to_xml(&eps_core::build_withdraw(&task, config)?, config)?
        }
        Commands::Tracker { file } => {
            let text = read_input(&file)?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not JSON", file.display()))?;
            response_json(eps_core::build_task_from_tracker_response(&value)?)?
        }
        Commands::CancellationResponse { file } => {
            let xml = read_input(&file)?;
            response_json(eps_core::build_cancellation_response(&xml)?)?
        }
        Commands::ReleaseResponse { file } => {
            let xml = read_input(&file)?;
            response_json(eps_core::build_release_response(&xml)?)?
        }
        Commands::RenderDosage { file } => {
            let request: MedicationRequest = read_resource(&file)?;
            eps_core::dosage::render(&request.dosage_instruction)?
        }
    };
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("eps=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = config_from_env()?;
    println!("{}", run(cli.command, &config)?);
    Ok(())
}
