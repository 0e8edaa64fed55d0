extern crate failure;
extern crate rand;
extern crate rand_xorshift;
extern crate sasrec_data;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate tracing;
extern crate tracing_subscriber;

use std::env;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::info;

use sasrec_data::datasets::{load_dataset, DatasetStats};
use sasrec_data::evaluation::{evaluate, EvaluationConfig, EvaluationSplit, Metrics};
use sasrec_data::models::popularity::PopularityModel;
use sasrec_data::sampler::{SamplerConfig, WarpSampler};

const USAGE: &str = "usage: popularity_baseline <dataset> [num_batches] [max_sequence_length] [num_workers]";

#[derive(Debug, Serialize)]
struct Report {
    dataset: String,
    stats: DatasetStats,
    num_batches: usize,
    elapsed: Duration,
    validation: Metrics,
    test: Metrics,
}

fn positional(args: &[String], idx: usize, default: usize) -> Result<usize, failure::Error> {
    match args.get(idx) {
        Some(value) => Ok(value.parse()?),
        None => Ok(default),
    }
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let dataset = match args.first() {
        Some(dataset) => dataset.clone(),
        None => return Err(failure::err_msg(USAGE)),
    };
    let num_batches = positional(&args, 1, 1000)?;
    let max_sequence_length = positional(&args, 2, 200)?;
    let num_workers = positional(&args, 3, 3)?;

    let partition = load_dataset(&dataset)?;
    let stats = DatasetStats::from(&partition);

    let config = SamplerConfig::new(128, max_sequence_length).num_workers(num_workers);
    let mut sampler = WarpSampler::new(
        &partition.train,
        partition.num_users,
        partition.num_items,
        &config,
    )?;

    let start = Instant::now();
    let mut model = PopularityModel::new(partition.num_items);

    for step in 0..num_batches {
        model.fit_batch(&sampler.next_batch()?);

        if (step + 1) % 100 == 0 {
            info!(step = step + 1, "fitted batches");
        }
    }

    sampler.close();
    let elapsed = start.elapsed();

    let mut rng = XorShiftRng::seed_from_u64(42);
    let eval_config = EvaluationConfig::new(max_sequence_length);
    let validation = evaluate(
        &model,
        &partition,
        EvaluationSplit::Validation,
        &eval_config,
        &mut rng,
    )?;
    let test = evaluate(&model, &partition, EvaluationSplit::Test, &eval_config, &mut rng)?;

    let report = Report {
        dataset,
        stats,
        num_batches,
        elapsed,
        validation,
        test,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
