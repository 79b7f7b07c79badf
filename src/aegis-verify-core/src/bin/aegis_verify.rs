//! aegis-verify CLI: fingerprint files and directories, check signed media
//! manifests, and run bulk component verification passes.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use aegis_hash::{
    compute_hash, verify_hash, DirectoryStream, FileSelection, HashAlgorithm, HashError,
    HashParameters,
};
use aegis_verify_core::manifest::{content_digest, find_sibling_manifest, read_verified};
use aegis_verify_core::{
    ComponentSelection, ComponentType, HashCalculator, HashRequest, NoHardware, StaticCatalog,
    TrustContext, VerificationEvent, VerificationRegistry, VerifyConfig, VerifyError,
};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Integrity verification for installed platform components and media.
#[derive(Parser)]
#[command(name = "aegis-verify")]
#[command(version = VERSION)]
#[command(about = "Component fingerprinting and media authentication")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a file or directory
    Hash {
        /// File or directory to hash
        path: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Recompute a fingerprint and compare it with an expected digest
    Verify {
        /// File or directory to hash
        path: PathBuf,

        /// Expected digest (hex)
        #[arg(long)]
        expected: String,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Check a path against its signed sibling manifest
    Authenticate {
        /// Mounted media path
        path: PathBuf,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a bulk verification pass over a component catalog
    Components {
        /// Component catalog (JSON array)
        #[arg(long)]
        catalog: PathBuf,

        /// Hash algorithm
        #[arg(long, default_value = "sha1")]
        algorithm: HashAlgorithm,

        /// Salt, or key/seed for keyed algorithms (hex)
        #[arg(long)]
        seed_or_salt: Option<String>,

        /// First byte hashed
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Restrict to component types (operating_system, module, package, ...)
        #[arg(long = "type", value_parser = parse_component_type)]
        types: Vec<ComponentType>,

        /// Restrict to one component id
        #[arg(long, conflicts_with = "types")]
        component: Option<String>,

        /// Maximum components hashed in parallel
        #[arg(long)]
        parallelism: Option<usize>,
    },
}

#[derive(Args)]
struct ParamArgs {
    /// Hash algorithm
    #[arg(long, default_value = "sha256")]
    algorithm: HashAlgorithm,

    /// Salt prepended to the content (hex)
    #[arg(long)]
    salt: Option<String>,

    /// HMAC key or CRC seed (hex)
    #[arg(long)]
    key: Option<String>,

    /// First byte hashed
    #[arg(long, default_value = "0")]
    start: u64,

    /// Byte after the last one hashed; at or before --start wraps around
    #[arg(long)]
    end: Option<u64>,
}

impl ParamArgs {
    fn parameters(&self) -> Result<HashParameters, VerifyError> {
        let mut params =
            HashParameters::new(self.algorithm).with_range(self.start, self.end);
        if let Some(salt) = &self.salt {
            params = params.with_salt(decode_hex("salt", salt)?);
        }
        if let Some(key) = &self.key {
            params = params.with_key(decode_hex("key", key)?);
        }
        Ok(params)
    }
}

fn decode_hex(what: &str, text: &str) -> Result<Vec<u8>, VerifyError> {
    hex::decode(text.trim()).map_err(|e| VerifyError::ConfigError {
        message: format!("--{what} is not hex: {e}"),
    })
}

fn parse_component_type(text: &str) -> Result<ComponentType, String> {
    serde_json::from_value(serde_json::Value::String(text.to_lowercase()))
        .map_err(|_| format!("unknown component type '{text}'"))
}

fn hash_path(path: &Path, params: &HashParameters) -> Result<Vec<u8>, HashError> {
    if path.is_dir() {
        let mut stream = DirectoryStream::from_directory(path, &["*"], &FileSelection::recursive())?;
        compute_hash(&mut stream, params)
    } else {
        let mut file = File::open(path)?;
        compute_hash(&mut file, params)
    }
}

fn run_hash(path: &Path, params: &ParamArgs, json: bool) -> Result<bool, VerifyError> {
    let digest = hex::encode(hash_path(path, &params.parameters()?)?);
    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": path,
                "algorithm": params.algorithm,
                "digest": digest,
            })
        );
    } else {
        println!("{}  {}", digest, path.display());
    }
    Ok(true)
}

fn run_verify(path: &Path, expected: &str, params: &ParamArgs, json: bool) -> Result<bool, VerifyError> {
    let expected_bytes = decode_hex("expected", expected)?;
    let params = params.parameters()?;

    let matched = if path.is_dir() {
        let mut stream = DirectoryStream::from_directory(path, &["*"], &FileSelection::recursive())?;
        verify_hash(&expected_bytes, &mut stream, &params)?
    } else {
        let mut file = File::open(path)?;
        verify_hash(&expected_bytes, &mut file, &params)?
    };

    if json {
        println!("{}", serde_json::json!({ "path": path, "matched": matched }));
    } else if matched {
        println!("OK        {}", path.display());
    } else {
        println!("MISMATCH  {}", path.display());
    }
    Ok(matched)
}

fn run_authenticate(path: &Path, config: Option<&Path>, json: bool) -> Result<bool, VerifyError> {
    let config = match config {
        Some(file) => VerifyConfig::load(file)?,
        None => VerifyConfig::default(),
    };
    let trust = TrustContext::load(&config);

    let manifest = find_sibling_manifest(path).ok_or_else(|| VerifyError::ManifestMissing {
        path: path.to_path_buf(),
    })?;
    let verified = read_verified(&manifest, &trust)?;
    let actual = content_digest(path)?;
    let matched = aegis_hash::constant_time_eq(actual.as_bytes(), verified.expected_hash.as_bytes());

    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": path,
                "manifest": manifest,
                "key_type": verified.key_type,
                "expected": verified.expected_hash,
                "actual": actual,
                "authenticated": matched,
            })
        );
    } else {
        println!("Manifest:  {}", manifest.display());
        println!("Key:       {}", verified.key_type);
        println!("Expected:  {}", verified.expected_hash);
        println!("Actual:    {}", actual);
        println!("Result:    {}", if matched { "AUTHENTICATED" } else { "MISMATCH" });
    }
    Ok(matched)
}

struct ComponentsArgs {
    catalog: PathBuf,
    request: HashRequest,
    seed_or_salt: Option<String>,
    parallelism: Option<usize>,
}

async fn run_components(mut args: ComponentsArgs, json: bool) -> Result<bool, VerifyError> {
    if let Some(text) = &args.seed_or_salt {
        args.request.seed_or_salt = Some(decode_hex("seed-or-salt", text)?);
    }
    let catalog = StaticCatalog::load(&args.catalog)?;
    let config = VerifyConfig {
        max_parallelism: args.parallelism,
        ..VerifyConfig::default()
    };

    let calculator = HashCalculator::new(
        Arc::new(NoHardware),
        Arc::new(NoHardware),
        config.hardware_timeout(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let registry = VerificationRegistry::new(
        Arc::new(catalog),
        Arc::new(calculator),
        Arc::new(tx),
        config.parallelism(),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let ok = registry.get_component_hashes(args.request, cancel).await;
    drop(registry);

    while let Some(event) = rx.recv().await {
        print_event(&event, json);
    }
    Ok(ok)
}

fn print_event(event: &VerificationEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Cannot encode event: {e}"),
        }
        return;
    }

    match event {
        VerificationEvent::HashComplete { verification } => {
            let digest = verification
                .result
                .as_ref()
                .map(|r| hex::encode(&r.digest))
                .unwrap_or_default();
            println!("{:<24} {}", verification.component_id, digest);
        },
        VerificationEvent::HashError {
            verification,
            message,
        } => println!("{:<24} ERROR {}", verification.component_id, message),
        VerificationEvent::BatchComplete { had_failure } => {
            println!("\nPass {}", if *had_failure { "FAILED" } else { "complete" });
        },
        other => println!("{other:?}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.format == "json";

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Hash { path, params } => run_hash(&path, &params, json),
        Commands::Verify {
            path,
            expected,
            params,
        } => run_verify(&path, &expected, &params, json),
        Commands::Authenticate { path, config } => run_authenticate(&path, config.as_deref(), json),
        Commands::Components {
            catalog,
            algorithm,
            seed_or_salt,
            offset,
            types,
            component,
            parallelism,
        } => {
            let selection = match (component, types.is_empty()) {
                (Some(id), _) => ComponentSelection::Single(id),
                (None, false) => ComponentSelection::Types(types),
                (None, true) => ComponentSelection::All,
            };
            let request = HashRequest::new(algorithm)
                .with_selection(selection)
                .with_start_offset(offset);
            let args = ComponentsArgs {
                catalog,
                request,
                seed_or_salt,
                parallelism,
            };
            run_components(args, json).await
        },
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) if e.is_authentication_failure() => {
            eprintln!("Authentication failed: {e}");
            ExitCode::FAILURE
        },
        Err(VerifyError::Hash(e)) if e.is_parameter_error() => {
            eprintln!("Invalid parameters: {e}");
            ExitCode::from(2)
        },
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        },
    }
}
