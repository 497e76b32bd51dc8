use anyhow::{Context, Result};
use clap::Parser;
use gcode_bricklayer_lib as gb;
use log::{error, info, LevelFilter};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

const LOG_FILE_NAME: &str = "z_shift_log.txt";

// Slicer post-processing setups pass these single-dash camelCase flags.
const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("-layerHeight", "--layer-height"),
    ("-extrusionMultiplier", "--extrusion-multiplier"),
];

/// Shift alternating inner perimeters down by half a layer so layers
/// interlock. The input file is rewritten in place.
#[derive(Parser, Debug)]
#[command(name = "gcode_bricklayer", version, about)]
struct Cli {
    /// G-code file to rewrite in place
    input_file: PathBuf,

    /// Layer height in mm; contours shift by half of this
    #[arg(long, default_value_t = 0.2)]
    layer_height: f64,

    /// Accepted for compatibility, currently not applied
    #[arg(long, default_value_t = 1.0)]
    extrusion_multiplier: f64,

    /// Centerline distance between neighbouring perimeters in mm
    #[arg(long, default_value_t = 0.4)]
    perimeter_spacing: f64,

    /// Nozzle diameter in mm, used for the initial perimeter width
    #[arg(long, default_value_t = 0.4)]
    nozzle_diameter: f64,

    /// Diagnostic log, truncated on every run [default: z_shift_log.txt next to the executable]
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log per-contour detail
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> gb::Settings {
        gb::Settings {
            layer_height: self.layer_height,
            extrusion_multiplier: self.extrusion_multiplier,
            perimeter_spacing: self.perimeter_spacing,
            nozzle_diameter: self.nozzle_diameter,
        }
    }

    fn log_path(&self) -> PathBuf {
        if let Some(path) = &self.log_file {
            return path.clone();
        }
        env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(LOG_FILE_NAME)))
            .unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME))
    }
}

fn normalize_legacy_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            for (legacy, long) in LEGACY_FLAGS {
                if text == *legacy {
                    return OsString::from(*long);
                }
                let value = text.strip_prefix(*legacy).and_then(|rest| rest.strip_prefix('='));
                if let Some(value) = value {
                    return OsString::from(format!("{long}={value}"));
                }
            }
            arg
        })
        .collect()
}

fn init_logging(cli: &Cli) -> Result<PathBuf> {
    let log_path = cli.log_path();
    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("creating log file {}", log_path.display()))?;
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .format_target(false)
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();
    Ok(log_path)
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(normalize_legacy_flags(env::args_os()));
    let log_path = init_logging(&cli)?;

    info!("Starting G-code processing");
    let result = gb::process_file(&cli.input_file, &cli.settings());
    if let Err(err) = &result {
        error!("{err}");
    }
    result.with_context(|| format!("{} was left unchanged", cli.input_file.display()))?;

    info!("Log file saved at {}", log_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(normalize_legacy_flags(args.iter().map(OsString::from)))
    }

    #[test]
    fn defaults() {
        let cli = parse(&["gcode_bricklayer", "part.gcode"]);
        assert_eq!(cli.input_file, PathBuf::from("part.gcode"));
        assert_eq!(cli.settings(), gb::Settings::default());
        assert!(!cli.verbose);
    }

    #[test]
    fn legacy_flags() {
        let cli = parse(&[
            "gcode_bricklayer",
            "-layerHeight",
            "0.3",
            "-extrusionMultiplier=1.1",
            "part.gcode",
        ]);
        assert_eq!(cli.layer_height, 0.3);
        assert_eq!(cli.extrusion_multiplier, 1.1);
    }

    #[test]
    fn long_flags() {
        let cli = parse(&[
            "gcode_bricklayer",
            "--layer-height",
            "0.16",
            "--log-file",
            "/tmp/x.log",
            "-v",
            "part.gcode",
        ]);
        assert_eq!(cli.layer_height, 0.16);
        assert_eq!(cli.log_path(), PathBuf::from("/tmp/x.log"));
        assert!(cli.verbose);
    }

    #[test]
    fn positional_that_looks_like_a_flag_prefix_is_kept() {
        let args = normalize_legacy_flags(["-layerHeightish"].map(OsString::from));
        assert_eq!(args, vec![OsString::from("-layerHeightish")]);
    }
}
