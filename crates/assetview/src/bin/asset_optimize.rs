use clap::Parser;
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use assetview::lib::settings::DEFAULT_POINT_SIZE;
use assetview::{
    load_file, AssetExporter, CodecConfig, Codecs, ExportConfig, MetadataExtractor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Re-export an asset as a compressed GLB", long_about = None)]
struct Args {
    /// Input asset (glTF, GLB, OBJ, PLY, PCD or XYZ)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Directory the GLB is written to (defaults to the input's directory)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Compress vertex attributes and triangle lists
    #[arg(long)]
    draco: bool,

    /// Compress textures to KTX2
    #[arg(long)]
    ktx2: bool,

    /// Dry run - don't write the file, just show statistics
    #[arg(short, long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Err(err) = run(&args) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let codecs = Codecs::new(&CodecConfig::default());
    let status = |message: &str| info!("{}", message);
    let loaded = load_file(&args.input, DEFAULT_POINT_SIZE, &codecs, &status)?;
    let metadata = MetadataExtractor::extract(&loaded.object, &loaded.clips);
    info!(
        "Loaded {}: {} vertices, {} triangles, {} animations",
        metadata.name,
        metadata.vertex_count,
        metadata.triangle_count,
        metadata.animations.len()
    );

    let config = ExportConfig {
        draco: args.draco,
        ktx2: args.ktx2,
        ..ExportConfig::new(metadata.name.clone())
    };
    let exported = AssetExporter::export(&loaded.object, &loaded.clips, &config, &codecs)?;

    let directory = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => args
            .input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let path = directory.join(&exported.file_name);

    let ratio = if metadata.byte_size > 0 {
        exported.bytes.len() as f64 / metadata.byte_size as f64 * 100.0
    } else {
        0.0
    };
    if args.dry_run {
        println!(
            "Would write {} ({} bytes, {:.1}% of input)",
            path.display(),
            exported.bytes.len(),
            ratio
        );
        return Ok(());
    }

    fs::create_dir_all(&directory)?;
    fs::write(&path, &exported.bytes)?;
    println!(
        "Wrote {} ({} bytes, {:.1}% of input) in {:.2?}",
        path.display(),
        exported.bytes.len(),
        ratio,
        start.elapsed()
    );
    Ok(())
}
