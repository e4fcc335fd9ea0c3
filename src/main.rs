mod mosaic;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use image::Rgb;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mosaic::builder::{BuildConfig, MosaicBuilder, DEFAULT_WINDOW_RADIUS};
use mosaic::catalog::TileCatalog;
use mosaic::color::{checked_rgb, distance};
use mosaic::error::MosaicError;
use mosaic::image::{open_rgb, prepare_tile};
use mosaic::rendering::{apply_tint, render, save_output};
use mosaic::stats::RenderStats;

/// File name of the catalog cache inside a tiles directory.
const CATALOG_FILE_NAME: &str = ".labmosaic_catalog";

/// Source image blended over the tiles unless told otherwise, pulling each
/// tile towards the color of the cell it replaces.
const DEFAULT_TINT_OPACITY: f64 = 0.3;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scans a tiles directory and writes the average color of every image
    /// to its catalog cache
    Index(CatalogArgs),
    /// Builds a mosaic of an image out of the images in a tiles directory
    Mosaic(Mosaic),
    /// Prints the CIE94 distance from REFERENCE to SAMPLE, both given as r,g,b
    Distance {
        #[clap(value_parser = parse_rgb, allow_hyphen_values = true)]
        reference: Rgb<u8>,
        #[clap(value_parser = parse_rgb, allow_hyphen_values = true)]
        sample: Rgb<u8>,
    },
}

#[derive(Args)]
struct CatalogArgs {
    /// Path to directory containing tile images
    #[clap(value_parser)]
    tiles_dir: PathBuf,

    /// Catalog cache file [default: <TILES_DIR>/.labmosaic_catalog]
    #[clap(long, value_parser)]
    catalog: Option<PathBuf>,

    #[clap(long, default_values_t = [String::from("jpg"), String::from("jpeg")])]
    /// Extensions of image files in the tiles dir (case insensitive)
    extensions: Vec<String>,
}

#[derive(Args)]
struct Mosaic {
    /// Path to input image
    #[clap(value_parser)]
    img: PathBuf,

    #[clap(flatten)]
    catalog: CatalogArgs,

    /// Width of a grid cell in source pixels
    #[clap(short = 'W', long, default_value_t = 40, value_parser = is_positive)]
    cell_width: u32,

    /// Height of a grid cell in source pixels
    #[clap(short = 'H', long, default_value_t = 30, value_parser = is_positive)]
    cell_height: u32,

    /// Cells within this many columns and rows of a tile never reuse its image
    #[clap(short, long, default_value_t = DEFAULT_WINDOW_RADIUS, value_parser)]
    radius: u32,

    /// Output size relative to the input image
    #[clap(short, long, default_value_t = 1, value_parser = is_positive)]
    scale: u32,

    /// Output image path
    #[clap(default_value = "./output.png", short, long, value_parser)]
    output_path: PathBuf,

    /// Value between 0 and 1 indicating the opacity of the source image overlayed on the output image
    #[clap(default_value_t = DEFAULT_TINT_OPACITY, short, long, value_parser = is_between_zero_and_one)]
    tint_opacity: f64,

    /// Ignores the catalog cache forcing re-analysis of tiles
    #[clap(short, long, value_parser)]
    force: bool,

    #[clap(long)]
    /// Also write a heat map of match distances, one pixel per cell
    stats_image: bool,
}

/// Parses str as f64 and returns the resulting value if between 0 and 1 (inclusive)
fn is_between_zero_and_one(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&value) {
        return Ok(value);
    }
    Err(String::from("Value must be between 0 and 1"))
}

fn is_positive(s: &str) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|e| format!("{}", e))?;
    if value == 0 {
        return Err(String::from("Value must be greater than 0"));
    }
    Ok(value)
}

/// Parses `r,g,b` with each channel in 0..=255.
fn parse_rgb(s: &str) -> Result<Rgb<u8>, String> {
    let channels = s
        .split(',')
        .map(|c| c.trim().parse::<i64>().map_err(|e| format!("{:?}: {}", c, e)))
        .collect::<Result<Vec<_>, _>>()?;
    match channels[..] {
        [r, g, b] => checked_rgb(r, g, b).map_err(|e| e.to_string()),
        _ => Err(format!("expected r,g,b but got {:?}", s)),
    }
}

/// Validates that the input image path exists and is a valid image format
fn validate_input_image(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!(
            "❌ Input image does not exist: {}\n💡 Check the file path and ensure the file exists",
            path.display()
        ));
    }
    if !path.is_file() {
        return Err(format!(
            "❌ Input path is not a file: {}\n💡 Please provide a path to an image file, not a directory",
            path.display()
        ));
    }
    Ok(())
}

/// Validates that the tiles directory exists
fn validate_tiles_directory(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!(
            "❌ Tiles directory does not exist: {}\n💡 Create the directory and add image files to use as tiles",
            path.display()
        ));
    }
    if !path.is_dir() {
        return Err(format!(
            "❌ Tiles path is not a directory: {}\n💡 Please provide a path to a directory containing tile images",
            path.display()
        ));
    }
    Ok(())
}

/// Validates that the output directory exists
fn validate_output_path(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(format!(
                "Output directory does not exist: {}",
                parent.display()
            ));
        }
    }
    Ok(())
}

fn catalog_path(args: &CatalogArgs) -> PathBuf {
    args.catalog
        .clone()
        .unwrap_or_else(|| args.tiles_dir.join(CATALOG_FILE_NAME))
}

/// Analyses every image in the tiles directory and refreshes the cache.
fn scan_catalog(args: &CatalogArgs) -> Result<TileCatalog, Box<dyn Error>> {
    let (catalog, errors) = TileCatalog::scan(&args.tiles_dir, &args.extensions)?;
    for error in &errors {
        warn!("Skipping {}", error);
    }
    if catalog.is_empty() {
        return Err(format!(
            "No usable {} images in {}",
            args.extensions.join("/"),
            args.tiles_dir.display()
        )
        .into());
    }
    let path = catalog_path(args);
    if let Err(e) = catalog.save(&path) {
        warn!("Catalog will be rebuilt next time: {}", e);
    }
    Ok(catalog)
}

/// Reuses the catalog cache when there is one, scanning otherwise.
fn load_catalog(args: &CatalogArgs, force: bool) -> Result<TileCatalog, Box<dyn Error>> {
    if force {
        return scan_catalog(args);
    }
    let path = catalog_path(args);
    match TileCatalog::load(&path) {
        Ok(mut catalog) => {
            let pruned = catalog.prune_missing();
            if pruned > 0 {
                info!("Dropped {} images that no longer exist", pruned);
                if let Err(e) = catalog.save(&path) {
                    warn!("{}", e);
                }
            }
            if !catalog.is_empty() {
                info!("Loaded catalog of {} images from {}", catalog.len(), path.display());
                return Ok(catalog);
            }
        }
        Err(e) => info!("Scanning tiles ({})", e),
    }
    scan_catalog(args)
}

fn run_mosaic(args: Mosaic) -> Result<(), Box<dyn Error>> {
    validate_input_image(&args.img)?;
    validate_tiles_directory(&args.catalog.tiles_dir)?;
    validate_output_path(&args.output_path)?;

    let catalog = load_catalog(&args.catalog, args.force)?;

    info!("Opening source image: {}", args.img.display());
    let img = open_rgb(&args.img).map_err(MosaicError::from)?;

    let builder = MosaicBuilder::new(BuildConfig {
        cell_width: args.cell_width,
        cell_height: args.cell_height,
        window_radius: args.radius,
    });
    let grid = builder.grid_for(&img)?;
    let assignments = builder.build(&img, &catalog)?;

    let stats = RenderStats::new(&assignments);
    stats.summarise();

    let output = render(&grid, &assignments, args.scale, |assignment, width, height| {
        prepare_tile(&assignment.source_path, width, height)
    })?;

    let output = if args.tint_opacity > 0.0 {
        apply_tint(output, &img, args.tint_opacity)
    } else {
        output
    };
    save_output(&output, &args.output_path)
        .map_err(|e| format!("Failed to save output image: {}", e))?;
    info!("Wrote {}", args.output_path.display());

    if args.stats_image {
        let stats_path = args.output_path.with_extension("stats.png");
        save_output(&stats.render(&grid), &stats_path)
            .map_err(|e| format!("Failed to save stats image: {}", e))?;
        info!("Wrote {}", stats_path.display());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let start_time = Instant::now();
    let cli = Cli::parse();

    match cli.command {
        Command::Index(args) => {
            validate_tiles_directory(&args.tiles_dir)?;
            let catalog = scan_catalog(&args)?;
            info!(
                "Indexed {} images into {}",
                catalog.len(),
                catalog_path(&args).display()
            );
        }
        Command::Mosaic(args) => run_mosaic(args)?,
        Command::Distance { reference, sample } => {
            println!("{:.4}", distance(reference, sample));
        }
    }

    info!("Finished in {:.2?}", start_time.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rgb() {
        assert_eq!(parse_rgb("255,0,0"), Ok(Rgb([255, 0, 0])));
        assert_eq!(parse_rgb(" 1, 2 ,3"), Ok(Rgb([1, 2, 3])));
        assert!(parse_rgb("256,0,0").is_err());
        assert!(parse_rgb("-1,0,0").is_err());
        assert!(parse_rgb("1,2").is_err());
        assert!(parse_rgb("a,b,c").is_err());
    }

    #[test]
    fn test_value_parsers() {
        assert_eq!(is_between_zero_and_one("0.5"), Ok(0.5));
        assert!(is_between_zero_and_one("1.5").is_err());
        assert_eq!(is_positive("3"), Ok(3));
        assert!(is_positive("0").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["labmosaic", "mosaic", "in.jpg", "tiles"]);
        match cli.command {
            Command::Mosaic(args) => {
                assert_eq!(args.img, PathBuf::from("in.jpg"));
                assert_eq!(args.catalog.tiles_dir, PathBuf::from("tiles"));
                assert_eq!((args.cell_width, args.cell_height), (40, 30));
                assert_eq!(args.radius, DEFAULT_WINDOW_RADIUS);
                assert_eq!(args.scale, 1);
                assert_eq!(args.tint_opacity, DEFAULT_TINT_OPACITY);
                assert_eq!(
                    catalog_path(&args.catalog),
                    PathBuf::from("tiles").join(CATALOG_FILE_NAME)
                );
            }
            _ => panic!("expected mosaic subcommand"),
        }
    }

    #[test]
    fn test_distance_rejects_out_of_range_channels() {
        assert!(Cli::try_parse_from(["labmosaic", "distance", "-1,0,0", "0,0,0"]).is_err());
        assert!(Cli::try_parse_from(["labmosaic", "distance", "255,0,0", "0,0,0"]).is_ok());
    }
}
