//! Property tests for the built-in classification metrics.
//!
//! - roc_auc is NaN exactly when the truth holds one class, else in [0, 1]
//! - label metrics stay in [0, 1] whatever the stump predicts

use foldwise_core::data::{ProblemType, Target};
use foldwise_core::traits::{ModelSpec, PipelineBuilder};
use foldwise_models::{metric_by_name, DefaultPipelineBuilder};
use ndarray::{Array1, Array2};
use proptest::prelude::*;

fn rows() -> impl Strategy<Value = Vec<(f64, f64, u8)>> {
    proptest::collection::vec((-5.0f64..5.0, -5.0f64..5.0, 0u8..2), 4..30)
}

fn split(rows: &[(f64, f64, u8)]) -> (Array2<f64>, Target) {
    let x = Array2::from_shape_fn((rows.len(), 2), |(i, j)| if j == 0 { rows[i].0 } else { rows[i].1 });
    let y = Array1::from_iter(rows.iter().map(|r| f64::from(r.2)));
    (x, Target::Single(y))
}

fn keys() -> Vec<String> {
    vec!["a".into(), "b".into()]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_roc_auc_is_bounded_or_undefined(rows in rows()) {
        let (x, y) = split(&rows);
        let mut model = DefaultPipelineBuilder
            .build(&keys(), &ModelSpec::new("logistic").scaled(), ProblemType::Binary)
            .unwrap();
        model.fit(x.view(), &y).unwrap();

        let auc = metric_by_name("roc_auc", ProblemType::Binary)
            .unwrap()
            .score(model.as_ref(), x.view(), &y)
            .unwrap();
        let single_class = rows.iter().all(|r| r.2 == rows[0].2);
        if single_class {
            prop_assert!(auc.is_nan());
        } else {
            prop_assert!((0.0..=1.0).contains(&auc), "auc {auc}");
        }
    }

    #[test]
    fn prop_label_metrics_stay_in_unit_interval(rows in rows()) {
        let (x, y) = split(&rows);
        let mut model = DefaultPipelineBuilder
            .build(&keys(), &ModelSpec::new("stump"), ProblemType::Binary)
            .unwrap();
        model.fit(x.view(), &y).unwrap();

        for name in ["accuracy", "balanced_accuracy", "macro_f1"] {
            let score = metric_by_name(name, ProblemType::Binary)
                .unwrap()
                .score(model.as_ref(), x.view(), &y)
                .unwrap();
            prop_assert!((0.0..=1.0).contains(&score), "{name} scored {score}");
        }
    }
}
