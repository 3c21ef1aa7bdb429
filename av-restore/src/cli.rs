use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "av-restore")]
#[command(about = "Resumable audio/video restoration: upscaling, noise reduction, drift correction")]
#[command(version)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory for per-input work directories
    #[arg(long, global = true)]
    pub work_root: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Explicit tracing filter directive (overrides -v/-q)
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// Also write daily-rolling log files to this directory
    #[arg(long, global = true, env = "AV_RESTORE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upscale video segment by segment, resuming previous progress
    Upscale {
        input: PathBuf,

        /// Output file (default: <input>_upscaled.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        segments: SegmentArgs,

        /// Upscaler tile size, 0 for automatic
        #[arg(long)]
        tile: Option<u32>,

        /// Upscaler model name
        #[arg(long)]
        model: Option<String>,

        /// Upscale factor (2, 3 or 4)
        #[arg(long)]
        scale: Option<u32>,

        /// x264 constant rate factor for segment encodes
        #[arg(long)]
        crf: Option<u32>,

        /// x264 preset for segment encodes
        #[arg(long)]
        preset: Option<String>,
    },

    /// Reduce noise on every audio channel in parallel
    Denoise {
        input: PathBuf,

        /// Output file (default: <input>_denoised.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Noise reduction amount in (0, 1]
        #[arg(long)]
        strength: Option<f64>,

        /// Peak normalization target in dBFS
        #[arg(long, allow_hyphen_values = true)]
        normalize: Option<f64>,

        /// Start of the noise sample window, seconds
        #[arg(long)]
        sample_start: Option<f64>,

        /// Length of the noise sample window, seconds
        #[arg(long)]
        sample_length: Option<f64>,
    },

    /// Correct audio/video drift by time-scaling the audio
    Sync {
        input: PathBuf,

        /// Output file (default: <input>_synced.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show segment boundaries and which segments are already complete
    Plan {
        input: PathBuf,

        #[command(flatten)]
        segments: SegmentArgs,
    },

    /// Print the probe report of a media file as JSON
    Probe { input: PathBuf },

    /// Delete the work directory of an input, including finished segments
    Clean { input: PathBuf },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SegmentArgs {
    /// Segment length in seconds
    #[arg(long)]
    pub segment_length: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_upscale_with_globals() {
        let args = Args::parse_from([
            "av-restore",
            "-vv",
            "upscale",
            "in.avi",
            "--segment-length",
            "30",
            "--tile",
            "256",
        ]);
        assert_eq!(args.verbose, 2);
        match args.command {
            Commands::Upscale {
                input,
                segments,
                tile,
                ..
            } => {
                assert_eq!(input, PathBuf::from("in.avi"));
                assert_eq!(segments.segment_length, Some(30));
                assert_eq!(tile, Some(256));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn negative_normalize_target() {
        let args = Args::parse_from(["av-restore", "denoise", "in.mkv", "--normalize", "-3"]);
        assert!(matches!(
            args.command,
            Commands::Denoise { normalize: Some(n), .. } if n == -3.0
        ));
    }
}
