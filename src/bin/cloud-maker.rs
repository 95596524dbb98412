//! cloud-maker command-line interface

use clap::{Parser, Subcommand};
use cloud_maker::exit_codes::{EXIT_INVALID_ARGS, EXIT_PANIC, EXIT_SUCCESS, exit_code_for};
use cloud_maker::logger::{JsonLogger, LOG_LEVEL_ENV, is_json_logging};
use cloud_maker::provisioner::defaults::DEFAULT_CONFIG_FILE;
use cloud_maker::{
    BuildOptions, InstallerInfo, PermissionMode, TimestampPolicy, build_provisioner,
    inspect_provisioner,
};
use log::{debug, error};
use std::{panic, path::PathBuf, process};

const VERSION: &str = cloud_maker::version::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "cloud-maker",
    version = VERSION,
    about = "Build self-extracting provisioner installers"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error, or json[:level])
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the installer for one system
    #[command(alias = "provision")]
    MakeProvisioner {
        /// Config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Output path (defaults to the system's output_file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// How payload permission bits are chosen
        #[arg(long, value_enum)]
        permissions: Option<PermissionMode>,

        /// Record this mtime for every entry (overrides SOURCE_DATE_EPOCH)
        #[arg(long)]
        source_date_epoch: Option<u64>,

        /// Do not read the installer back after writing it
        #[arg(long)]
        skip_verification: bool,

        /// System (config section) to build
        system: String,
    },

    /// Show the layout and payload of an installer
    Inspect {
        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,

        /// Installer file
        file: PathBuf,
    },
}

fn main() {
    // Set up panic handler to return specific exit code
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        process::exit(EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(_) => {
            eprintln!("Fatal: Unhandled panic in cloud-maker");
            process::exit(EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                EXIT_INVALID_ARGS
            } else {
                EXIT_SUCCESS
            };
        }
    };

    let json_logs = match cli.log_level {
        Some(ref level) => level.starts_with("json"),
        None => is_json_logging(),
    };
    let (level, source) = match cli.log_level {
        Some(ref level) => JsonLogger::init_with_level(level, "CLI --log-level"),
        None => JsonLogger::init(),
    };
    debug!(
        "🚀 cloud-maker {} (log level {} from {}; override with {})",
        cloud_maker::version::full_version(),
        level,
        source,
        LOG_LEVEL_ENV
    );

    let outcome = match cli.command {
        Command::MakeProvisioner {
            config,
            output,
            permissions,
            source_date_epoch,
            skip_verification,
            system,
        } => {
            let options = BuildOptions {
                output,
                permission_mode: permissions,
                timestamps: source_date_epoch.map(TimestampPolicy::Fixed),
                skip_verification,
            };
            build_provisioner(&config, &system, options).map(|report| {
                println!("{}", report.destination.display());
            })
        }
        Command::Inspect { json, file } => inspect_provisioner(&file).and_then(|info| {
            if json {
                let text = serde_json::to_string_pretty(&info)
                    .map_err(|e| cloud_maker::CloudMakerError::IoError(e.into()))?;
                println!("{text}");
            } else {
                print_listing(&info);
            }
            Ok(())
        }),
    };

    match outcome {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            if json_logs {
                error!("❌ {}", e);
            }
            eprintln!("cloud-maker: {}", e);
            exit_code_for(&e)
        }
    }
}

fn print_listing(info: &InstallerInfo) {
    println!("installer:   {}", info.path.display());
    println!("cut line:    {}", info.cut_line);
    println!("stub:        {} bytes", info.stub_bytes);
    println!("payload:     {} bytes", info.archive_bytes);
    println!("sha256:      {}", info.archive_sha256);
    if let Some(ref dir) = info.cloud_dir {
        println!("cloud dir:   {dir}");
    }
    if let Some(ref runner) = info.runner {
        println!("runner:      {runner}");
    }
    println!();
    for entry in &info.entries {
        let target = entry
            .link_target
            .as_deref()
            .map(|t| format!(" -> {t}"))
            .unwrap_or_default();
        println!(
            "{:04o} {:>10} {:<9} {}{}",
            entry.mode, entry.size, entry.kind, entry.path, target
        );
    }
}
