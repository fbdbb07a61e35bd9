use clap::{Parser, Subcommand};
use retouch::filter::{FilterField, FilterVector};
use retouch::imaging::{self, OutputFormat, Quality, RustBackend};
use retouch::session::export;
use retouch::upload::{CompressionTier, UploadNegotiator, UploadPolicy, UploadState};
use retouch::{config, output};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Filter adjustments shared by commands that build a filter vector.
#[derive(clap::Args, Clone)]
struct FilterArgs {
    /// Persisted filter record (JSON with all nine fields)
    #[arg(long)]
    filters: Option<PathBuf>,

    /// Set one field, e.g. `--set brightness=150`. Values are clamped into range.
    #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
    set: Vec<(FilterField, f32)>,
}

#[derive(Parser)]
#[command(name = "retouch")]
#[command(about = "Non-destructive image filters under a storage budget")]
#[command(long_about = "\
Non-destructive image filters under a storage budget

Images are kept as uploaded; edits are a vector of nine filter values
composited in a fixed order on export:

  blur → brightness → contrast → grayscale → hue-rotate
       → saturate → sepia → invert → opacity

Uploads larger than the budget (5MB by default) must be compressed at one of
three tiers before they are accepted.

Run 'retouch gen-config' to generate a documented retouch.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing retouch.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report size, dimensions and budget verdict for an image
    Check { input: PathBuf },
    /// Negotiate an image down to the upload budget
    Compress {
        input: PathBuf,
        /// Compression tier(s) to try in order
        #[arg(long, value_delimiter = ',', default_value = "high")]
        tier: Vec<CompressionTier>,
        /// Where to write the accepted image
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Composite filters onto an image and export it
    Render {
        input: PathBuf,
        #[command(flatten)]
        filters: FilterArgs,
        /// png, jpeg or jpg
        #[arg(long, default_value = "png")]
        format: OutputFormat,
        /// Title used for the suggested filename (defaults to the input file stem)
        #[arg(long)]
        title: Option<String>,
        /// Output file or directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Print the composite filter expression
    Expression {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// List filter fields with their ranges and identity values
    Fields,
    /// Print a stock retouch.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { input } => {
            let config = config::load_config(&cli.config)?;
            let policy = UploadPolicy::from_config(&config);
            let bytes = std::fs::read(&input)?;
            let dimensions = imaging::identify(&bytes).ok();
            output::print_lines(&output::format_check(
                &display_name(&input),
                bytes.len() as u64,
                dimensions,
                &policy,
            ));
        }
        Command::Compress {
            input,
            tier,
            output: out_path,
        } => {
            let config = config::load_config(&cli.config)?;
            let backend = RustBackend::new();
            let (tx, rx) = std::sync::mpsc::channel();
            let mut negotiator =
                UploadNegotiator::new(UploadPolicy::from_config(&config)).with_events(tx);

            negotiator.select(display_name(&input), std::fs::read(&input)?)?;
            for t in tier {
                if !matches!(negotiator.state(), UploadState::AwaitingCompression(_)) {
                    break;
                }
                if let Err(e) = negotiator.compress(t, &backend) {
                    tracing::warn!(tier = %t, error = %e, "compression attempt failed");
                }
            }
            for event in rx.try_iter() {
                output::print_lines(&output::format_upload_event(&event));
            }
            output::print_lines(&output::format_upload_state(
                negotiator.state(),
                negotiator.policy(),
            ));

            if let (UploadState::Accepted(candidate), Some(path)) = (negotiator.state(), out_path)
            {
                std::fs::write(&path, &candidate.bytes)?;
                println!("Wrote {}", path.display());
            }
        }
        Command::Render {
            input,
            filters,
            format,
            title,
            output: out_path,
        } => {
            let config = config::load_config(&cli.config)?;
            let vector = build_vector(&filters)?;
            let backend =
                RustBackend::with_jpeg_quality(Quality::new(config.export.jpeg_quality));
            let source = std::fs::read(&input)?;
            let title = title.unwrap_or_else(|| file_stem(&input));

            let rendered = export(
                &backend,
                &source,
                &vector,
                &title,
                format,
                chrono::Utc::now(),
            )?;
            let target = if out_path.is_dir() {
                out_path.join(&rendered.filename)
            } else {
                out_path
            };
            std::fs::write(&target, &rendered.bytes)?;
            output::print_lines(&output::format_export(
                &rendered,
                imaging::identify(&rendered.bytes).ok(),
            ));
            println!("Wrote {}", target.display());
        }
        Command::Expression { filters } => {
            println!("{}", build_vector(&filters)?.to_composite_expression());
        }
        Command::Fields => {
            output::print_lines(&output::format_fields());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Parse `field=value`.
fn parse_assignment(s: &str) -> Result<(FilterField, f32), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{s}'"))?;
    let field: FilterField = field.trim().parse().map_err(|e| format!("{e}"))?;
    let value: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid number for {field}: '{value}'"))?;
    Ok((field, value))
}

/// Start from the persisted record (or identity), then apply `--set` values.
fn build_vector(args: &FilterArgs) -> Result<FilterVector, Box<dyn std::error::Error>> {
    let base = match &args.filters {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Some(serde_json::from_str::<FilterVector>(&json)?)
        }
        None => None,
    };
    Ok(args
        .set
        .iter()
        .fold(FilterVector::from_persisted(base), |v, &(field, value)| {
            v.with(field, value)
        }))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
