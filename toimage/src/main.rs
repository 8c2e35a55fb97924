//! A CLI tool for converting the instances of a DICOM archive
//! into general purpose image files (e.g. PNG) and videos.
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use dicom_archive_pixeldata::encode::encode_still;
use dicom_archive_pixeldata::layout::DEFAULT_BORDER;
use dicom_archive_pixeldata::{
    compose_quad, convert_archive, BatchOptions, BatchReport, EncodeOptions, Frame, StillFormat,
    VideoFormat,
};
use dicom_archive_store::ArchiveLayout;
use image::codecs::png::CompressionType;
use snafu::{OptionExt, Report, ResultExt, Whatever};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Convert archived DICOM instances into images and videos
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Print more information about the conversion
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert every stored instance
    Convert {
        /// Archive root directory
        #[arg(short = 'o', long = "archive", default_value = ".")]
        archive_root: PathBuf,

        /// Output format of single frame instances
        #[arg(short = 'f', long = "format", value_enum, default_value_t = Still::Png)]
        format: Still,

        /// Output format of multi-frame instances
        #[arg(long = "video", value_enum, default_value_t = Video::Avi)]
        video: Video,

        #[command(flatten)]
        encoding: Encoding,
    },

    /// Compose four images into a 2x2 montage
    Layout {
        /// Top left image
        top_left: PathBuf,
        /// Top right image
        top_right: PathBuf,
        /// Bottom left image
        bottom_left: PathBuf,
        /// Bottom right image
        bottom_right: PathBuf,

        /// Path to the output image,
        /// its extension selecting the format
        #[arg(short = 'o', long = "out")]
        output: PathBuf,

        /// Width of the white border, in pixels
        #[arg(long = "border", default_value_t = DEFAULT_BORDER)]
        border: usize,

        #[command(flatten)]
        encoding: Encoding,
    },

    /// Remove every converted image, video and stored instance
    Clear {
        /// Archive root directory
        #[arg(short = 'o', long = "archive", default_value = ".")]
        archive_root: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct Encoding {
    /// JPEG quality
    #[arg(
        long = "quality",
        default_value = "100",
        value_parser(clap::value_parser!(u8).range(1..=100))
    )]
    quality: u8,

    /// PNG compression level
    #[arg(long = "png-compression", value_enum, default_value_t = Compression::Default)]
    png_compression: Compression,

    /// Frames per second of videos
    #[arg(
        long = "frame-rate",
        default_value = "10",
        value_parser(clap::value_parser!(u32).range(1..=120))
    )]
    frame_rate: u32,
}

impl From<&Encoding> for EncodeOptions {
    fn from(encoding: &Encoding) -> Self {
        EncodeOptions {
            jpeg_quality: encoding.quality,
            png_compression: match encoding.png_compression {
                Compression::Default => CompressionType::Default,
                Compression::Fast => CompressionType::Fast,
                Compression::Best => CompressionType::Best,
            },
            frame_rate: encoding.frame_rate,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Still {
    Bmp,
    Tif,
    Png,
    Jpg,
}

impl From<Still> for StillFormat {
    fn from(format: Still) -> Self {
        match format {
            Still::Bmp => StillFormat::Bmp,
            Still::Tif => StillFormat::Tiff,
            Still::Png => StillFormat::Png,
            Still::Jpg => StillFormat::Jpeg,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Video {
    Avi,
    Gif,
}

impl From<Video> for VideoFormat {
    fn from(format: Video) -> Self {
        match format {
            Video::Avi => VideoFormat::Avi,
            Video::Gif => VideoFormat::Gif,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Compression {
    Default,
    Fast,
    Best,
}

fn main() {
    let app = App::parse();
    let level = if app.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(level.into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    match run(app.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", Report::from_error(e));
            std::process::exit(-1);
        }
    }
}

/// Run a command, returning the exit code.
fn run(command: Command) -> Result<i32, Whatever> {
    match command {
        Command::Convert {
            archive_root,
            format,
            video,
            encoding,
        } => {
            let options = BatchOptions {
                still_format: format.into(),
                video_format: video.into(),
                encode: EncodeOptions::from(&encoding),
            };
            let report = convert(ArchiveLayout::new(archive_root), options)?;
            print_report(&report);
            Ok(if report.has_failures() { 2 } else { 0 })
        }
        Command::Layout {
            top_left,
            top_right,
            bottom_left,
            bottom_right,
            output,
            border,
            encoding,
        } => {
            let frames = [
                open_frame(&top_left)?,
                open_frame(&top_right)?,
                open_frame(&bottom_left)?,
                open_frame(&bottom_right)?,
            ];
            let [tl, tr, bl, br] = &frames;
            let quad =
                compose_quad([tl, tr, bl, br], border).whatever_context("Could not compose layout")?;
            let format = format_of(&output)?;
            let bytes = encode_still(&quad, format, &EncodeOptions::from(&encoding))
                .whatever_context("Could not encode layout")?;
            std::fs::write(&output, bytes).with_whatever_context(|_| {
                format!("Could not write {}", output.display())
            })?;
            info!("Layout saved to {}", output.display());
            Ok(0)
        }
        Command::Clear { archive_root } => {
            let removed = ArchiveLayout::new(archive_root)
                .clear()
                .whatever_context("Could not clear archive")?;
            info!("Removed {} file(s)", removed);
            Ok(0)
        }
    }
}

/// Run the batch on a blocking thread,
/// cancelling it between instances on Ctrl-C.
fn convert(layout: ArchiveLayout, options: BatchOptions) -> Result<BatchReport, Whatever> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .whatever_context("Could not start async runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut batch =
            tokio::task::spawn_blocking(move || convert_archive(&layout, &options, &token));

        let joined = tokio::select! {
            joined = &mut batch => joined,
            signal = tokio::signal::ctrl_c() => {
                signal.whatever_context("Could not listen for interrupt signal")?;
                info!("Interrupted, finishing the current instance");
                cancel.cancel();
                batch.await
            }
        };
        joined
            .whatever_context("Conversion task failed")?
            .whatever_context("Could not convert archive")
    })
}

fn print_report(report: &BatchReport) {
    for (id, path) in report.succeeded() {
        println!("converted {} -> {}", id, path.display());
    }
    for (id, e) in report.failed() {
        println!("failed    {}: {}", id, Report::from_error(e));
    }
    let converted = report.succeeded().count();
    let failed = report.failed().count();
    if report.cancelled {
        println!("{} converted, {} failed (cancelled)", converted, failed);
    } else {
        println!("{} converted, {} failed", converted, failed);
    }
}

fn open_frame(path: &Path) -> Result<Frame, Whatever> {
    let image = image::open(path)
        .with_whatever_context(|_| format!("Could not open {}", path.display()))?;
    Frame::from_dynamic_image(&image)
        .with_whatever_context(|_| format!("Invalid image {}", path.display()))
}

fn format_of(path: &Path) -> Result<StillFormat, Whatever> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .whatever_context("Output file has no extension")?;
    match extension.as_str() {
        "bmp" => Ok(StillFormat::Bmp),
        "tif" | "tiff" => Ok(StillFormat::Tiff),
        "png" => Ok(StillFormat::Png),
        "jpg" | "jpeg" => Ok(StillFormat::Jpeg),
        other => snafu::whatever!("Unsupported output format {}", other),
    }
}

#[cfg(test)]
mod tests {
    use crate::{format_of, App};
    use clap::CommandFactory;
    use dicom_archive_pixeldata::StillFormat;
    use std::path::Path;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }

    #[test]
    fn output_format_follows_extension() {
        assert_eq!(format_of(Path::new("quad.PNG")).unwrap(), StillFormat::Png);
        assert_eq!(format_of(Path::new("quad.tiff")).unwrap(), StillFormat::Tiff);
        assert!(format_of(Path::new("quad.webp")).is_err());
        assert!(format_of(Path::new("quad")).is_err());
    }
}
