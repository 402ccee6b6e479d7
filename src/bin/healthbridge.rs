//! Health Bridge CLI - run neutral health queries against a recorded native store
//!
//! Commands:
//! - query: Raw samples for a data type
//! - aggregate: Totals or calendar buckets for a data type
//! - store: Write a sample through the bridge
//! - types: List the data type registry
//! - activity: Translate an activity label
//! - doctor: Diagnose fixture and configuration

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use health_bridge::activity::NEUTRAL_OTHER;
use health_bridge::native::{DateEncoding, ReplayBridge};
use health_bridge::types::StraddlePolicy;
use health_bridge::{
    BucketSize, DataType, HealthClient, HealthConfig, HealthError, Platform, Query, StoreRequest,
    BRIDGE_VERSION,
};

/// Health Bridge - uniform queries over native health stores
#[derive(Parser)]
#[command(name = "healthbridge")]
#[command(version = BRIDGE_VERSION)]
#[command(about = "Query, aggregate and store health data through a native store fixture", long_about = None)]
struct Cli {
    /// Native store fixture (JSON). Without one the store is empty.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Native platform (healthkit or google_fit); overrides HEALTH_BRIDGE_PLATFORM
    #[arg(long, global = true)]
    platform: Option<Platform>,

    /// Local calendar offset from UTC in minutes
    #[arg(long, global = true, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,

    /// Boundary-crossing samples: drop, start_bucket or split
    #[arg(long, global = true)]
    straddle_policy: Option<StraddlePolicy>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Raw samples for a data type
    Query {
        /// Neutral data type, e.g. steps or calories.active
        data_type: String,

        /// Range start (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,

        /// Range end (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,

        /// Unit override
        #[arg(long)]
        unit: Option<String>,
    },

    /// Totals or calendar buckets for a data type
    Aggregate {
        data_type: String,

        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,

        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,

        /// Bucket size (hour, day, week, month, year); omit for a single total
        #[arg(long)]
        bucket: Option<BucketSize>,

        #[arg(long)]
        unit: Option<String>,
    },

    /// Write a sample through the bridge
    Store {
        /// Store request file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Write the updated fixture here after storing
        #[arg(long)]
        save_fixture: Option<PathBuf>,
    },

    /// List the data type registry
    Types,

    /// Translate an activity label
    Activity {
        label: String,

        /// Decode a native label instead of encoding a neutral one
        #[arg(long)]
        reverse: bool,
    },

    /// Diagnose fixture and configuration
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got {s}"))
}

fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

struct Session {
    config: HealthConfig,
    bridge: Arc<ReplayBridge>,
    client: HealthClient,
}

fn session(cli: &Cli) -> Result<Session, HealthCliError> {
    let mut config = HealthConfig::from_env()?;
    if let Some(platform) = cli.platform {
        config.platform = platform;
    }
    if let Some(offset) = cli.utc_offset_minutes {
        config.utc_offset_minutes = offset;
    }
    if let Some(policy) = cli.straddle_policy {
        config.straddle_policy = policy;
    }

    let encoding = DateEncoding::for_platform(config.platform);
    let bridge = match &cli.fixture {
        Some(path) => ReplayBridge::from_json(&fs::read_to_string(path)?, encoding)?,
        None => ReplayBridge::empty(encoding),
    };
    let bridge = Arc::new(bridge);
    let client = HealthClient::new(bridge.clone(), config.clone())?;
    Ok(Session {
        config,
        bridge,
        client,
    })
}

fn run(cli: Cli) -> Result<(), HealthCliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Query {
            data_type,
            start,
            end,
            unit,
        } => {
            let session = session(&cli)?;
            let mut query = Query::new(data_type.as_str(), *start, *end);
            query.unit = unit.clone();
            let samples = runtime.block_on(session.client.query(&query))?;
            print_json(&samples, cli.pretty)
        }
        Commands::Aggregate {
            data_type,
            start,
            end,
            bucket,
            unit,
        } => {
            let session = session(&cli)?;
            let mut query = Query::new(data_type.as_str(), *start, *end);
            query.bucket = *bucket;
            query.unit = unit.clone();
            let aggregated = runtime.block_on(session.client.query_aggregated(&query))?;
            print_json(&aggregated, cli.pretty)
        }
        Commands::Store {
            input,
            save_fixture,
        } => {
            let session = session(&cli)?;
            let request: StoreRequest = serde_json::from_str(&read_input(input)?)?;
            runtime.block_on(session.client.store(&request))?;
            if let Some(path) = save_fixture {
                let fixture = serde_json::to_string_pretty(&session.bridge.fixture())?;
                fs::write(path, fixture)?;
            }
            print_json(&session.bridge.calls(), cli.pretty)
        }
        Commands::Types => cmd_types(&session(&cli)?, cli.pretty),
        Commands::Activity { label, reverse } => {
            let session = session(&cli)?;
            let activities = session.client.activities();
            let translated = if *reverse {
                activities.from_native(label)
            } else {
                activities.to_native(label)
            };
            if !*reverse && label != NEUTRAL_OTHER && translated == activities.native_other() {
                let platform = session.client.platform().as_str();
                eprintln!("{label} has no native counterpart on {platform}");
            }
            println!("{translated}");
            Ok(())
        }
        Commands::Doctor { json } => cmd_doctor(&cli, &runtime, *json),
    }
}

fn read_input(input: &Path) -> Result<String, HealthCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), HealthCliError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

#[derive(Serialize)]
struct TypeRow {
    data_type: DataType,
    native_id: Option<&'static str>,
    unit: Option<&'static str>,
    companion: Option<DataType>,
    writeable: bool,
}

fn cmd_types(session: &Session, pretty: bool) -> Result<(), HealthCliError> {
    let registry = session.client.registry();
    let rows: Vec<TypeRow> = DataType::ALL
        .iter()
        .map(|&data_type| TypeRow {
            data_type,
            native_id: registry.native_id_of(data_type).ok(),
            unit: registry.unit_of(data_type),
            companion: registry.companion_of(data_type),
            writeable: !data_type.is_read_only(),
        })
        .collect();
    print_json(&serde_json::json!({
        "platform": session.client.platform(),
        "types": rows,
    }), pretty)
}

fn cmd_doctor(
    cli: &Cli,
    runtime: &tokio::runtime::Runtime,
    json: bool,
) -> Result<(), HealthCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "bridge_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Health Bridge version {}", BRIDGE_VERSION),
    });

    match session(cli) {
        Ok(session) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "platform {}, utc offset {} min, basal lookback {} days, straddle {:?}",
                    session.config.platform.as_str(),
                    session.config.utc_offset_minutes,
                    session.config.basal_lookback_days,
                    session.config.straddle_policy
                ),
            });

            let fixture = session.bridge.fixture();
            let records: usize = fixture.samples.values().map(Vec::len).sum();
            checks.push(DoctorCheck {
                name: "fixture".to_string(),
                status: if cli.fixture.is_some() {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Warning
                },
                message: match &cli.fixture {
                    Some(path) => format!(
                        "{}: {} sample records, {} workouts",
                        path.display(),
                        records,
                        fixture.workouts.len()
                    ),
                    None => "No fixture given, native store is empty".to_string(),
                },
            });

            let registry = session.client.registry();
            let unknown: Vec<&String> = fixture
                .samples
                .keys()
                .filter(|id| {
                    registry.data_type_of(id).is_err()
                        && registry.sleep_analysis_id() != Some(id.as_str())
                })
                .collect();
            if !unknown.is_empty() {
                checks.push(DoctorCheck {
                    name: "sample_types".to_string(),
                    status: CheckStatus::Warning,
                    message: format!("Fixture has unmapped sample types: {:?}", unknown),
                });
            }

            checks.push(match runtime.block_on(session.client.is_available()) {
                Ok(true) => DoctorCheck {
                    name: "native_store".to_string(),
                    status: CheckStatus::Ok,
                    message: "Native store reports available".to_string(),
                },
                Ok(false) => DoctorCheck {
                    name: "native_store".to_string(),
                    status: CheckStatus::Warning,
                    message: "Native store reports unavailable".to_string(),
                },
                Err(e) => DoctorCheck {
                    name: "native_store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Availability check failed: {}", e),
                },
            });
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: CliError::from(e).message,
        }),
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass store requests with --input FILE)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (store --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        version: BRIDGE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Health Bridge Doctor Report");
        println!("===========================");
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(HealthCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

#[derive(Debug)]
enum HealthCliError {
    Io(io::Error),
    Bridge(HealthError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<io::Error> for HealthCliError {
    fn from(e: io::Error) -> Self {
        HealthCliError::Io(e)
    }
}

impl From<HealthError> for HealthCliError {
    fn from(e: HealthError) -> Self {
        HealthCliError::Bridge(e)
    }
}

impl From<serde_json::Error> for HealthCliError {
    fn from(e: serde_json::Error) -> Self {
        HealthCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HealthCliError> for CliError {
    fn from(e: HealthCliError) -> Self {
        match e {
            HealthCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HealthCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HealthCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            HealthCliError::Bridge(e) => {
                let (code, hint) = match &e {
                    HealthError::UnknownDataType(_) => {
                        ("UNKNOWN_DATA_TYPE", Some("Run 'healthbridge types' for the list"))
                    }
                    HealthError::UnknownActivity(_) => (
                        "UNKNOWN_ACTIVITY",
                        Some("Use a neutral activity name such as biking.road"),
                    ),
                    HealthError::NotWriteable(_) => ("NOT_WRITEABLE", None),
                    HealthError::UnsupportedOperation(_) => {
                        ("UNSUPPORTED_OPERATION", Some("Use 'query' for this data type"))
                    }
                    HealthError::InsufficientBasalData { .. } => (
                        "INSUFFICIENT_BASAL_DATA",
                        Some("Add calories.basal records to the fixture"),
                    ),
                    HealthError::BucketCompositionMismatch { .. } => {
                        ("BUCKET_COMPOSITION_MISMATCH", None)
                    }
                    HealthError::NativeError(_) => ("NATIVE_ERROR", None),
                    HealthError::InvalidRange { .. } => {
                        ("INVALID_RANGE", Some("--start must not be after --end"))
                    }
                    HealthError::InvalidArgument(_) => ("INVALID_ARGUMENT", None),
                    HealthError::InvalidResponse(_) => {
                        ("INVALID_RESPONSE", Some("Check the fixture records"))
                    }
                    HealthError::JsonError(_) => ("JSON_ERROR", Some("Check JSON syntax")),
                    HealthError::Config(_) => (
                        "CONFIG_ERROR",
                        Some("Check HEALTH_BRIDGE_* environment variables and flags"),
                    ),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
        }
    }
}

#[derive(Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
