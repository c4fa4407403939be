use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::fetcher::{FetchError, FetchResult};
use super::model::{Datapoint, Experiment, Value};

// ---------------------------------------------------------------------------
// Demo registry
// ---------------------------------------------------------------------------

/// Named synthetic-data generators, used for samples and self-tests.
/// Generators are deterministic (seeded RNG) so repeated runs match.
pub const DEMOS: &[(&str, fn() -> Experiment)] = &[
    ("demo", demo_sweep),
    ("demo_training_curve", demo_training_curve),
    ("demo_missing_values", demo_missing_values),
];

/// Fetcher interface over the registry: unknown names do not apply.
pub fn load_demo(name: &str) -> FetchResult {
    DEMOS
        .iter()
        .find(|(demo_name, _)| *demo_name == name)
        .map(|(_, generator)| generator())
        .ok_or_else(|| FetchError::DoesNotApply(format!("no demo named '{name}'")))
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn row(pairs: Vec<(&str, Value)>) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// A hyperparameter sweep: 100 runs with random learning rate, dropout and
/// optimizer, a synthetic loss landscape, and lineage links from warm-started
/// runs back to the run they forked from.
fn demo_sweep() -> Experiment {
    let mut rng = StdRng::seed_from_u64(42);
    let optimizers = ["sgd", "adam", "adamw"];

    let mut datapoints = Vec::with_capacity(100);
    for i in 0..100u32 {
        let lr = 10f64.powf(rng.gen_range(-5.0..-1.0));
        let dropout = rng.gen_range(0.0..0.6);
        let optimizer = *optimizers.choose(&mut rng).unwrap();

        // A loss surface with a sweet spot around lr=1e-3, low dropout.
        let loss = (lr.log10() + 3.0).powi(2) * 0.2
            + dropout * 0.5
            + rng.gen_range(0.0..0.3);
        let accuracy = (1.0 - loss * 0.4).clamp(0.0, 1.0) * 100.0;

        let mut dp = Datapoint::new(
            i.to_string(),
            row(vec![
                ("lr", Value::Float(lr)),
                ("dropout", Value::Float(dropout)),
                ("optimizer", Value::String(optimizer.to_string())),
                ("loss", Value::Float(loss)),
                ("accuracy", Value::Float(accuracy)),
            ]),
        );
        // A third of the runs are warm-started from an earlier one.
        if i > 0 && rng.gen_bool(1.0 / 3.0) {
            dp = dp.with_parent(rng.gen_range(0..i).to_string());
        }
        datapoints.push(dp);
    }
    Experiment::from_datapoints(datapoints)
}

/// A single training run: one datapoint per epoch, chained by `from_uid`,
/// with smoothly decaying loss and rising accuracy.
fn demo_training_curve() -> Experiment {
    let mut rng = StdRng::seed_from_u64(7);

    let datapoints = (1..=30i64)
        .map(|epoch| {
            let progress = epoch as f64 / 30.0;
            let loss = 1.6 * (-2.0 * progress).exp() + rng.gen_range(0.0..0.02);
            let accuracy = 30.0 + 65.0 * progress + rng.gen_range(-1.0..1.0);
            let mut dp = Datapoint::new(
                epoch.to_string(),
                row(vec![
                    ("epoch", Value::Integer(epoch)),
                    ("train_loss", Value::Float(loss)),
                    ("test_accuracy", Value::Float(accuracy)),
                ]),
            );
            if epoch > 1 {
                dp = dp.with_parent((epoch - 1).to_string());
            }
            dp
        })
        .collect();
    Experiment::from_datapoints(datapoints)
}

/// Rows with uneven column sets, exercising the explicit-null fill the
/// rendering layer relies on.
fn demo_missing_values() -> Experiment {
    Experiment::from_rows(vec![
        row(vec![
            ("model", Value::String("baseline".to_string())),
            ("bleu", Value::Float(27.3)),
        ]),
        row(vec![
            ("model", Value::String("big".to_string())),
            ("bleu", Value::Float(28.4)),
            ("params_m", Value::Integer(213)),
        ]),
        row(vec![
            ("model", Value::String("distilled".to_string())),
            ("params_m", Value::Integer(66)),
            ("latency_ms", Value::Float(4.1)),
        ]),
    ])
}
