//! Sparnn CLI - build an index over random sparse vectors and time queries

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sparnn::{DistanceMetric, IndexConfig, IndexStoreBuilder, Record, SparseVector};

#[derive(Parser)]
#[command(name = "sparnn")]
#[command(about = "Approximate nearest-neighbor search over sparse vectors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index over random vectors and run midpoint queries
    Bench {
        /// Dimension of vectors
        #[arg(short, long, default_value_t = 10_000)]
        dim: usize,

        /// Number of indexed vectors
        #[arg(short, long, default_value_t = 20_000)]
        num: usize,

        /// Fraction of nonzero features per vector
        #[arg(long, default_value_t = 0.01)]
        density: f64,

        /// Number of queries
        #[arg(short, long, default_value_t = 100)]
        queries: usize,

        /// Neighbors per query
        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Distance metric (Cosine or JaccardBinary)
        #[arg(short, long, default_value = "Cosine")]
        metric: DistanceMetric,

        /// JSON index configuration; overrides --metric
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed for vector generation
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            dim,
            num,
            density,
            queries,
            k,
            metric,
            config,
            seed,
        } => {
            let config = match config {
                Some(path) => IndexConfig::from_json(&std::fs::read_to_string(path)?)?,
                None => IndexConfig::new(metric),
            };
            run_bench(config, dim, num, density, queries, k, seed)?;
        }
    }
    Ok(())
}

fn random_vector(rng: &mut StdRng, dim: usize, nnz: usize) -> sparnn::Result<SparseVector> {
    let entries = sample(rng, dim, nnz.min(dim))
        .into_iter()
        .map(|i| (i as u32, rng.gen_range(0.01f32..1.0)))
        .collect();
    SparseVector::new(dim, entries)
}

fn run_bench(
    config: IndexConfig,
    dim: usize,
    num: usize,
    density: f64,
    queries: usize,
    k: usize,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let nnz = ((dim as f64 * density).round() as usize).max(1);

    println!("Generating {num} random vectors of dimension {dim} ({nnz} nonzeros each)...");
    let vectors = (0..num)
        .map(|_| random_vector(&mut rng, dim, nnz))
        .collect::<sparnn::Result<Vec<_>>>()?;
    let records: Vec<Record<u64, ()>> = vectors
        .iter()
        .enumerate()
        .map(|(id, vector)| Record::new(id as u64, (), vector.clone()))
        .collect();

    let start = Instant::now();
    let store = IndexStoreBuilder::build(config, records)?;
    let build_time = start.elapsed();
    info!(depth = store.depth()?, nodes = store.node_count()?, "index built");
    println!("{}", store.description());
    println!("Built index over {} vectors in {:?}", store.count()?, build_time);

    // Each query is the midpoint of two indexed vectors.
    let mut batch = Vec::with_capacity(queries);
    for _ in 0..queries {
        if vectors.is_empty() {
            break;
        }
        let a = &vectors[rng.gen_range(0..vectors.len())];
        let b = &vectors[rng.gen_range(0..vectors.len())];
        batch.push(SparseVector::midpoint(a, b)?);
    }

    let start = Instant::now();
    let results = store.find_nearest(&batch, k)?;
    let duration = start.elapsed();

    println!("Ran {} queries in {:?}", batch.len(), duration);
    println!("Throughput: {:.2} queries/sec", batch.len() as f64 / duration.as_secs_f64());

    println!("\nTop results for the first queries:");
    for (q, hits) in results.iter().take(3).enumerate() {
        println!("  Query {q}:");
        for (i, hit) in hits.iter().take(5).enumerate() {
            println!("    {}. Vector {} (distance: {:.4})", i + 1, hit.id, hit.distance);
        }
    }
    Ok(())
}
