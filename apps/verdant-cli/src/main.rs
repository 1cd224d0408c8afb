use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::{Vec2, Vec3};
use tracing_subscriber::EnvFilter;
use verdant_author::{GenerateSettings, WaveTerrain, generate_world};
use verdant_common::{Aabb, CancellationToken, ChunkId, LodMesh, ViewerCamera};
use verdant_persist::{StorageConfig, StorageMode, open_store};
use verdant_render::{ComputeBackend, HeadlessBackend};
use verdant_render_wgpu::WgpuBackend;
use verdant_stream::{ChunkGrid, FrameInput, GridConfig, LodMeshes, StreamConfig, StreamingManager};

#[derive(Parser)]
#[command(name = "verdant-cli", about = "Grass chunk generation and streaming tools")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the default streaming config as YAML
    DefaultConfig,
    /// Generate chunk data for a whole grid
    Generate {
        /// Chunks along x and z
        #[arg(long, num_args = 2, default_values_t = [8, 8])]
        chunks: Vec<u32>,
        /// Chunk edge length in world units
        #[arg(long, default_value = "32")]
        chunk_size: f32,
        /// Blades per square world unit
        #[arg(long, default_value = "0.5")]
        density: f32,
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Water level; lower ground stays bare
        #[arg(long)]
        water: Option<f32>,
        #[arg(long, default_value = "files")]
        storage: StorageMode,
        /// Store root directory
        #[arg(long, default_value = "chunks")]
        root: PathBuf,
    },
    /// Load one chunk and print its summary
    Inspect {
        x: i32,
        y: i32,
        #[arg(long, default_value = "files")]
        storage: StorageMode,
        #[arg(long, default_value = "chunks")]
        root: PathBuf,
    },
    /// Fly a camera across the grid and report streaming stats per frame
    Simulate {
        /// Streaming config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, default_value = "120")]
        frames: u64,
        /// Run culling on the GPU instead of the host
        #[arg(long)]
        gpu: bool,
        /// Override the configured storage mode
        #[arg(long)]
        storage: Option<StorageMode>,
        /// Override the configured store root
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("verdant-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", verdant_common::crate_info());
            println!("persist: {}", verdant_persist::crate_info());
            println!("render: {}", verdant_render::crate_info());
            println!("render-wgpu: {}", verdant_render_wgpu::crate_info());
            println!("stream: {}", verdant_stream::crate_info());
            println!("author: {}", verdant_author::crate_info());
        }
        Commands::DefaultConfig => {
            print!("{}", StreamConfig::default().to_yaml()?);
        }
        Commands::Generate {
            chunks,
            chunk_size,
            density,
            seed,
            water,
            storage,
            root,
        } => {
            let grid = grid_from_args(&chunks, chunk_size)?;
            let mut store = open_store(&StorageConfig { mode: storage, root: root.clone() })
                .with_context(|| format!("opening store at {}", root.display()))?;
            let terrain = WaveTerrain {
                water_level: water,
                ..WaveTerrain::default()
            };
            let settings = GenerateSettings {
                density,
                ..GenerateSettings::default()
            };
            let report = generate_world(store.as_mut(), &grid, &terrain, &settings, seed)?;
            println!(
                "Generated {} chunks ({} empty), {} blades into {}",
                report.chunks,
                report.empty_chunks,
                report.instances,
                root.display()
            );
        }
        Commands::Inspect { x, y, storage, root } => {
            let id = ChunkId::new(x, y);
            let store = open_store(&StorageConfig { mode: storage, root })?;
            let payload = pollster::block_on(store.load(id, CancellationToken::new()))
                .with_context(|| format!("chunk {id} is missing or invalid"))?;
            let occupied = payload
                .division_min
                .iter()
                .zip(&payload.division_max)
                .filter(|&(&min, &max)| Aabb::new(min, max).is_valid())
                .count();
            println!("Chunk {id}");
            println!("  bounds: {:?} .. {:?}", payload.bounds.min, payload.bounds.max);
            println!("  instances: {}", payload.instance_count());
            println!("  divisions: {} ({occupied} occupied)", payload.division_count());
            println!("  encoded size: {} bytes", payload.encoded_len());
        }
        Commands::Simulate {
            config,
            frames,
            gpu,
            storage,
            root,
        } => {
            let mut config = match config {
                Some(path) => StreamConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => StreamConfig::default(),
            };
            if let Some(mode) = storage {
                config.storage.mode = mode;
            }
            if let Some(root) = root {
                config.storage.root = root;
            }
            if gpu {
                let backend = WgpuBackend::request_headless()?;
                simulate(config, backend, frames)?;
            } else {
                simulate(config, HeadlessBackend::new(), frames)?;
            }
        }
    }

    Ok(())
}

/// Grid for `generate`, validated before it is built.
fn grid_from_args(chunks: &[u32], chunk_size: f32) -> anyhow::Result<ChunkGrid> {
    let &[count_x, count_y] = chunks else {
        anyhow::bail!("--chunks takes two values, got {}", chunks.len());
    };
    let config = GridConfig {
        chunk_count: [count_x, count_y],
        origin: Vec2::ZERO,
        chunk_size: Vec2::splat(chunk_size),
    };
    config.validate().context("invalid grid arguments")?;
    Ok(ChunkGrid::new(&config))
}

fn simulate<B: ComputeBackend>(config: StreamConfig, backend: B, frames: u64) -> anyhow::Result<()> {
    let meshes = LodMeshes {
        near: LodMesh {
            index_count: 36,
            ..LodMesh::default()
        },
        mid: LodMesh {
            index_count: 12,
            first_index: 36,
            ..LodMesh::default()
        },
    };
    tracing::info!(frames, root = %config.storage.root.display(), "simulating");
    let mut manager = StreamingManager::open(config, backend, meshes)?;
    let grid = manager.grid().clone();
    let (start, _) = grid.chunk_rect(ChunkId::new(0, 0));
    let [count_x, count_y] = grid.chunk_count();
    let (_, end) = grid.chunk_rect(ChunkId::new(count_x as i32 - 1, count_y as i32 - 1));

    for frame in 0..frames {
        let t = frame as f32 / frames.max(1) as f32;
        let ground = start.lerp(end, t);
        let position = Vec3::new(ground.x, 6.0, ground.y);
        let heading = (end - start).normalize_or_zero();
        let camera = ViewerCamera::looking_at(position, position + Vec3::new(heading.x, -0.3, heading.y));
        let visible = manager.update(&FrameInput::from_camera(&camera)).len();
        let stats = manager.stats();
        println!(
            "frame {:>4} chunk {} target {:>3} queued {:>3} loading {:>2} loaded {:>3} visible {:>3} +{}/-{} {:?}",
            stats.frame,
            stats.viewer_chunk,
            stats.target_chunks,
            stats.queued,
            stats.loading,
            stats.loaded,
            visible,
            stats.loads_completed,
            stats.chunks_disposed,
            stats.update_time
        );
        manager.check_invariants()?;
    }

    let timer = manager.frame_timer();
    println!(
        "update time: avg {:?}, min {:?}, max {:?} over {} frames",
        timer.average(),
        timer.min(),
        timer.max(),
        timer.count()
    );
    manager.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_grid_arguments_are_errors() {
        assert!(grid_from_args(&[4, 4], 0.0).is_err());
        assert!(grid_from_args(&[4, 4], -8.0).is_err());
        assert!(grid_from_args(&[0, 4], 16.0).is_err());
        assert!(grid_from_args(&[4], 16.0).is_err());
        let grid = grid_from_args(&[3, 2], 16.0).unwrap();
        assert_eq!(grid.chunk_count(), [3, 2]);
    }
}
