#[macro_use]
extern crate criterion;

extern crate rand;
extern crate rand_xorshift;
extern crate sasrec_data;

use criterion::Criterion;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use sasrec_data::data::{data_partition, Interaction, Interactions, Partition};
use sasrec_data::evaluation::{evaluate, EvaluationConfig, EvaluationSplit};
use sasrec_data::models::popularity::PopularityModel;
use sasrec_data::sampler::{BatchProducer, SamplerConfig, WarpSampler};

fn synthetic(num_users: usize, num_items: usize, max_len: usize) -> Partition {
    let mut rng = XorShiftRng::seed_from_u64(42);

    let interactions: Vec<Interaction> = (1..=num_users)
        .flat_map(|user| {
            let len = rng.gen_range(2..max_len);
            (0..len)
                .map(|_| Interaction::new(user, rng.gen_range(1..=num_items)))
                .collect::<Vec<_>>()
        })
        .collect();

    data_partition(&Interactions::from(interactions)).unwrap()
}

fn bench_producer(c: &mut Criterion) {
    c.bench_function("batch_producer", |b| {
        let partition = synthetic(5000, 3000, 100);
        let mut producer =
            BatchProducer::new(&partition.train, partition.num_items, 128, 50, 42).unwrap();

        b.iter(|| producer.next_batch())
    });
}

fn bench_warp_sampler(c: &mut Criterion) {
    c.bench_function("warp_sampler", |b| {
        let partition = synthetic(5000, 3000, 100);
        let config = SamplerConfig::new(128, 50).num_workers(3).seed(42);
        let mut sampler = WarpSampler::new(
            &partition.train,
            partition.num_users,
            partition.num_items,
            &config,
        )
        .unwrap();

        b.iter(|| sampler.next_batch().unwrap());

        sampler.close();
    });
}

fn bench_evaluation(c: &mut Criterion) {
    c.bench_function("evaluation", |b| {
        let partition = synthetic(2000, 3000, 100);
        let mut model = PopularityModel::new(partition.num_items);
        model.fit_sequences(&partition.train);

        let config = EvaluationConfig::new(50);
        let mut rng = XorShiftRng::seed_from_u64(42);

        b.iter(|| evaluate(&model, &partition, EvaluationSplit::Test, &config, &mut rng).unwrap())
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_producer, bench_warp_sampler, bench_evaluation
}
criterion_main!(benches);
