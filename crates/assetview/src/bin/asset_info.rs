use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use assetview::lib::settings::DEFAULT_POINT_SIZE;
use assetview::{load_file, CodecConfig, Codecs, MetadataExtractor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print statistics about a 3D asset or point cloud", long_about = None)]
struct Args {
    /// Asset to inspect
    #[arg(value_name = "FILE")]
    path: PathBuf,

    /// Print the metadata as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let codecs = Codecs::new(&CodecConfig::default());
    let status = |message: &str| info!("{}", message);
    let loaded = match load_file(&args.path, DEFAULT_POINT_SIZE, &codecs, &status) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("Failed to load {}: {}", args.path.display(), err);
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };
    let metadata = MetadataExtractor::extract(&loaded.object, &loaded.clips);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Asset Information:");
    println!("==================");
    println!("File: {}", metadata.name);
    println!("Format: {}", metadata.format);
    println!("Size: {} bytes", metadata.byte_size);
    println!("Vertices: {}", metadata.vertex_count);
    println!("Triangles: {}", metadata.triangle_count);
    println!("Meshes: {}", metadata.mesh_count);
    println!("Materials: {}", metadata.material_count);
    println!("Textures: {}", metadata.texture_count);

    if let Some(bounds) = loaded.object.bounding_box() {
        let size = bounds.size();
        println!("\nBounding Box (centered):");
        println!("  Min: [{:.6}, {:.6}, {:.6}]", bounds.min.x, bounds.min.y, bounds.min.z);
        println!("  Max: [{:.6}, {:.6}, {:.6}]", bounds.max.x, bounds.max.y, bounds.max.z);
        println!("  Size: [{:.6}, {:.6}, {:.6}]", size.x, size.y, size.z);
    }

    if !metadata.animations.is_empty() {
        println!("\nAnimations:");
        for (index, clip) in loaded.clips.iter().enumerate() {
            println!(
                "  [{}] {} ({:.2}s, {} tracks)",
                index,
                clip.display_name(index),
                clip.duration,
                clip.tracks.len()
            );
        }
    }

    Ok(())
}
