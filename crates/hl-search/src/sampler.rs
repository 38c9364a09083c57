//! Search space definitions and unique-sample drawing.
//!
//! A search template is a JSON object. Entries shaped like an axis (`min` /
//! `max`, `values` or `value`) become sampled dimensions; everything else is
//! carried through to every configuration untouched.

use hl_types::{SearchError, SearchResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use tracing::{debug, warn};

/// A full parameter set for one trial: the template with every sampled axis
/// carrying its chosen value under `"value"`.
pub type Configuration = Map<String, Value>;

/// One named dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Axis {
    /// Continuous uniform range [min, max].
    LinearRange { min: f64, max: f64 },
    /// Continuous log-scaled range. Parsed, but drawing from it is not supported.
    LogRange { min: f64, max: f64 },
    /// Integer range [min, max] inclusive.
    DiscreteIntRange { min: i64, max: i64 },
    /// Uniform choice among listed values.
    DiscreteSet { values: Vec<Value> },
    /// A single value.
    FixedValue { value: Value },
}

impl Axis {
    /// Classify one template entry.
    ///
    /// Returns `Ok(None)` for entries that are not axis specifications.
    pub fn from_spec(label: &str, spec: &Value) -> SearchResult<Option<Self>> {
        let Value::Object(spec) = spec else {
            return Ok(None);
        };

        if let (Some(Value::Number(min)), Some(Value::Number(max))) =
            (spec.get("min"), spec.get("max"))
        {
            if let (true, true, Some(min), Some(max)) =
                (min.is_f64(), max.is_f64(), min.as_f64(), max.as_f64())
            {
                if min > max {
                    return Err(invalid_range(label, min, max));
                }
                if !(max - min).is_finite() {
                    return Err(SearchError::InvalidAxis {
                        label: label.to_string(),
                        message: format!("range {min}..={max} is too wide to sample uniformly"),
                    });
                }
                let logarithmic = spec.get("type").and_then(Value::as_str) == Some("logarithmic");
                return Ok(Some(if logarithmic {
                    Axis::LogRange { min, max }
                } else {
                    Axis::LinearRange { min, max }
                }));
            }
            if let (Some(min), Some(max)) = (min.as_i64(), max.as_i64()) {
                if min > max {
                    return Err(invalid_range(label, min, max));
                }
                return Ok(Some(Axis::DiscreteIntRange { min, max }));
            }
        }

        if let Some(Value::Array(values)) = spec.get("values") {
            return Ok(Some(Axis::DiscreteSet {
                values: values.clone(),
            }));
        }

        if let Some(value) = spec.get("value") {
            return Ok(Some(Axis::FixedValue {
                value: value.clone(),
            }));
        }

        Ok(None)
    }

    /// Number of distinct values this axis can produce.
    pub fn cardinality(&self) -> Cardinality {
        match self {
            Axis::LinearRange { .. } | Axis::LogRange { .. } => Cardinality::Infinite,
            Axis::DiscreteIntRange { min, max } => {
                let width = i128::from(*max) - i128::from(*min) + 1;
                u64::try_from(width)
                    .map(Cardinality::Finite)
                    .unwrap_or(Cardinality::Infinite)
            }
            Axis::DiscreteSet { values } => Cardinality::Finite(values.len() as u64),
            Axis::FixedValue { .. } => Cardinality::Finite(1),
        }
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> SearchResult<Value> {
        match self {
            Axis::LinearRange { min, max } => Ok(Value::from(rng.gen_range(*min..=*max))),
            Axis::LogRange { .. } => Err(SearchError::NotImplemented {
                feature: "logarithmic range sampling".to_string(),
            }),
            Axis::DiscreteIntRange { min, max } => Ok(Value::from(rng.gen_range(*min..=*max))),
            Axis::DiscreteSet { values } => {
                if values.is_empty() {
                    return Err(SearchError::Exhausted { drawn: 0 });
                }
                Ok(values[rng.gen_range(0..values.len())].clone())
            }
            Axis::FixedValue { value } => Ok(value.clone()),
        }
    }
}

fn invalid_range<T: std::fmt::Display>(label: &str, min: T, max: T) -> SearchError {
    SearchError::InvalidAxis {
        label: label.to_string(),
        message: format!("range must be nonempty, got min {min} > max {max}"),
    }
}

/// Size of a search space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    Finite(u64),
    Infinite,
}

impl Cardinality {
    fn combine(self, other: Cardinality) -> Cardinality {
        match (self, other) {
            // An empty axis leaves nothing to draw, whatever the other axes hold.
            (Cardinality::Finite(0), _) | (_, Cardinality::Finite(0)) => Cardinality::Finite(0),
            (Cardinality::Infinite, _) | (_, Cardinality::Infinite) => Cardinality::Infinite,
            (Cardinality::Finite(a), Cardinality::Finite(b)) => a
                .checked_mul(b)
                .map(Cardinality::Finite)
                .unwrap_or(Cardinality::Infinite),
        }
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Cardinality::Finite(_))
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{n}"),
            Self::Infinite => write!(f, "inf"),
        }
    }
}

/// A drawn point in label order. Two samples are equal iff every label maps
/// to an equal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample(Vec<(String, Value)>);

impl Sample {
    pub fn pairs(&self) -> &[(String, Value)] {
        &self.0
    }
}

impl Hash for Sample {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (label, value) in &self.0 {
            label.hash(state);
            hash_value(value, state);
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => (1u8, b).hash(state),
        Value::Number(n) => {
            2u8.hash(state);
            if let Some(i) = n.as_i64() {
                (0u8, i).hash(state);
            } else if let Some(u) = n.as_u64() {
                (1u8, u).hash(state);
            } else {
                // -0.0 == 0.0, so both must hash alike.
                let f = n.as_f64().unwrap_or(0.0);
                let f = if f == 0.0 { 0.0f64 } else { f };
                (2u8, f.to_bits()).hash(state);
            }
        }
        Value::String(s) => (3u8, s).hash(state),
        Value::Array(items) => {
            (4u8, items.len()).hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            (5u8, map.len()).hash(state);
            for (key, item) in map {
                key.hash(state);
                hash_value(item, state);
            }
        }
    }
}

/// Draws configurations from a mixed discrete / continuous space without ever
/// returning the same point twice.
#[derive(Debug, Clone)]
pub struct Sampler {
    template: Configuration,
    axes: BTreeMap<String, Axis>,
    cardinality: Cardinality,
    drawn: HashSet<Sample>,
    rng: ChaCha8Rng,
    retry_limit: Option<usize>,
}

impl Sampler {
    pub fn new(template: Configuration) -> SearchResult<Self> {
        let mut axes = BTreeMap::new();
        let mut cardinality = Cardinality::Finite(1);

        for (label, spec) in &template {
            if let Some(axis) = Axis::from_spec(label, spec)? {
                cardinality = cardinality.combine(axis.cardinality());
                axes.insert(label.clone(), axis);
            }
        }

        debug!(
            "Parsed {} axes from {} template entries, cardinality {}",
            axes.len(),
            template.len(),
            cardinality
        );

        Ok(Self {
            template,
            axes,
            cardinality,
            drawn: HashSet::new(),
            rng: ChaCha8Rng::from_entropy(),
            retry_limit: None,
        })
    }

    pub fn from_value(template: Value) -> SearchResult<Self> {
        match template {
            Value::Object(map) => Self::new(map),
            other => Err(SearchError::InvalidTemplate {
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// Load a template from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> SearchResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&raw)?)
    }

    /// Reseed the generator so draws are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Give up with [`SearchError::Exhausted`] after `limit` consecutive
    /// collisions instead of retrying forever.
    pub fn with_retry_limit(mut self, limit: usize) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn axes(&self) -> &BTreeMap<String, Axis> {
        &self.axes
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn drawn_count(&self) -> usize {
        self.drawn.len()
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.cardinality, Cardinality::Finite(n) if self.drawn.len() as u64 >= n)
    }

    /// Draw a sample that has not been drawn before and apply it to a copy of
    /// the template.
    pub fn sample(&mut self) -> SearchResult<Configuration> {
        if self.is_exhausted() {
            return Err(SearchError::Exhausted {
                drawn: self.drawn.len(),
            });
        }

        let mut collisions = 0usize;
        let sample = loop {
            let candidate = Self::draw(&self.axes, &mut self.rng)?;
            if !self.drawn.contains(&candidate) {
                break candidate;
            }
            collisions += 1;
            if let Some(limit) = self.retry_limit {
                if collisions >= limit {
                    warn!("Gave up after {collisions} colliding draws");
                    return Err(SearchError::Exhausted {
                        drawn: self.drawn.len(),
                    });
                }
            }
        };

        let config = self.apply(&sample);
        self.drawn.insert(sample);
        Ok(config)
    }

    fn draw(axes: &BTreeMap<String, Axis>, rng: &mut ChaCha8Rng) -> SearchResult<Sample> {
        let pairs = axes
            .iter()
            .map(|(label, axis)| Ok((label.clone(), axis.draw(rng)?)))
            .collect::<SearchResult<Vec<_>>>()?;
        Ok(Sample(pairs))
    }

    fn apply(&self, sample: &Sample) -> Configuration {
        let mut config = self.template.clone();
        for (label, value) in sample.pairs() {
            if let Some(Value::Object(spec)) = config.get_mut(label) {
                spec.insert("value".to_string(), value.clone());
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn template(value: Value) -> Configuration {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn chosen(config: &Configuration, label: &str) -> Value {
        config[label]["value"].clone()
    }

    #[test]
    fn classifies_each_axis_kind() {
        let sampler = Sampler::new(template(json!({
            "lr": {"min": 0.001, "max": 0.1},
            "decay": {"min": 0.0001, "max": 0.1, "type": "logarithmic"},
            "layers": {"min": 1, "max": 4},
            "optimizer": {"values": ["adam", "sgd"]},
            "batch_size": {"value": 32},
        })))
        .unwrap();

        let axes = sampler.axes();
        assert_eq!(axes["lr"], Axis::LinearRange { min: 0.001, max: 0.1 });
        assert_eq!(axes["decay"], Axis::LogRange { min: 0.0001, max: 0.1 });
        assert_eq!(axes["layers"], Axis::DiscreteIntRange { min: 1, max: 4 });
        assert_eq!(
            axes["optimizer"],
            Axis::DiscreteSet {
                values: vec![json!("adam"), json!("sgd")]
            }
        );
        assert_eq!(axes["batch_size"], Axis::FixedValue { value: json!(32) });
        assert_eq!(sampler.cardinality(), Cardinality::Infinite);
    }

    #[test]
    fn unrecognised_entries_are_ignored() {
        let sampler = Sampler::new(template(json!({
            "epochs": 10,
            "name": "baseline",
            "notes": {"desc": "no axis keys here"},
            "mixed": {"min": 1, "max": 2.5},
        })))
        .unwrap();
        assert!(sampler.axes().is_empty());
        assert_eq!(sampler.cardinality(), Cardinality::Finite(1));
    }

    #[test]
    fn mixed_range_falls_through_to_values() {
        let sampler = Sampler::new(template(json!({
            "mixed": {"min": 1, "max": 2.5, "values": [1, 2]},
        })))
        .unwrap();
        assert_eq!(
            sampler.axes()["mixed"],
            Axis::DiscreteSet {
                values: vec![json!(1), json!(2)]
            }
        );
    }

    #[test]
    fn cardinality_is_product_of_discrete_axes() {
        let sampler = Sampler::new(template(json!({
            "a": {"values": [1, 2, 3]},
            "b": {"min": 0, "max": 4},
            "c": {"value": "fixed"},
        })))
        .unwrap();
        assert_eq!(sampler.cardinality(), Cardinality::Finite(15));
    }

    #[test]
    fn discrete_space_is_drawn_without_replacement() {
        let mut sampler = Sampler::new(template(json!({
            "a": {"values": [1, 2]},
            "b": {"values": [10, 20]},
        })))
        .unwrap()
        .with_seed(7);
        assert_eq!(sampler.cardinality(), Cardinality::Finite(4));

        let mut seen = HashSet::new();
        for _ in 0..4 {
            let config = sampler.sample().unwrap();
            let pair = (
                chosen(&config, "a").as_i64().unwrap(),
                chosen(&config, "b").as_i64().unwrap(),
            );
            assert!(seen.insert(pair), "duplicate sample {pair:?}");
        }
        let expected: HashSet<_> = [(1, 10), (1, 20), (2, 10), (2, 20)].into_iter().collect();
        assert_eq!(seen, expected);

        match sampler.sample() {
            Err(SearchError::Exhausted { drawn }) => assert_eq!(drawn, 4),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(sampler.is_exhausted());
    }

    #[test]
    fn sampling_leaves_template_untouched() {
        let raw = template(json!({
            "units": {"min": 8, "max": 64},
            "epochs": 3,
        }));
        let mut sampler = Sampler::new(raw.clone()).unwrap();
        let config = sampler.sample().unwrap();

        assert!(raw["units"].get("value").is_none());
        assert!(sampler.template["units"].get("value").is_none());
        let units = chosen(&config, "units").as_i64().unwrap();
        assert!((8..=64).contains(&units));
        assert_eq!(config["units"]["min"], json!(8));
        assert_eq!(config["epochs"], json!(3));
    }

    #[test]
    fn fixed_value_is_applied() {
        let mut sampler = Sampler::new(template(json!({
            "batch_size": {"value": 32},
        })))
        .unwrap();
        let config = sampler.sample().unwrap();
        assert_eq!(chosen(&config, "batch_size"), json!(32));
        assert!(matches!(
            sampler.sample(),
            Err(SearchError::Exhausted { drawn: 1 })
        ));
    }

    #[test]
    fn linear_range_respects_bounds() {
        let mut sampler = Sampler::new(template(json!({
            "dropout": {"min": 0.1, "max": 0.5},
        })))
        .unwrap()
        .with_seed(11);

        for _ in 0..50 {
            let config = sampler.sample().unwrap();
            let v = chosen(&config, "dropout").as_f64().unwrap();
            assert!((0.1..=0.5).contains(&v), "dropout out of bounds: {v}");
        }
        assert_eq!(sampler.drawn_count(), 50);
    }

    #[test]
    fn log_range_fails_only_when_drawn() {
        let mut sampler = Sampler::new(template(json!({
            "lr": {"min": 0.0001, "max": 0.1, "type": "logarithmic"},
        })))
        .unwrap();
        assert!(matches!(
            sampler.sample(),
            Err(SearchError::NotImplemented { .. })
        ));
        assert_eq!(sampler.drawn_count(), 0);
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let err = Sampler::new(template(json!({"layers": {"min": 5, "max": 1}}))).unwrap_err();
        assert!(matches!(err, SearchError::InvalidAxis { ref label, .. } if label == "layers"));

        let err = Sampler::new(template(json!({"lr": {"min": 0.5, "max": 0.1}}))).unwrap_err();
        assert!(matches!(err, SearchError::InvalidAxis { .. }));
    }

    #[test]
    fn overflowing_float_range_is_rejected() {
        let err = Sampler::new(template(json!({"x": {"min": -1e308, "max": 1e308}}))).unwrap_err();
        assert!(matches!(err, SearchError::InvalidAxis { ref label, .. } if label == "x"));

        let mut sampler =
            Sampler::new(template(json!({"x": {"min": -1e307, "max": 1e307}}))).unwrap();
        let x = chosen(&sampler.sample().unwrap(), "x").as_f64().unwrap();
        assert!((-1e307..=1e307).contains(&x));
    }

    #[test]
    fn empty_value_set_is_immediately_exhausted() {
        let mut sampler = Sampler::new(template(json!({
            "lr": {"min": 0.1, "max": 0.2},
            "act": {"values": []},
        })))
        .unwrap();
        assert_eq!(sampler.cardinality(), Cardinality::Finite(0));
        assert!(matches!(
            sampler.sample(),
            Err(SearchError::Exhausted { drawn: 0 })
        ));
    }

    #[test]
    fn retry_limit_turns_collisions_into_exhaustion() {
        // A degenerate continuous axis: infinite on paper, one point in practice.
        let mut sampler = Sampler::new(template(json!({
            "x": {"min": 1.0, "max": 1.0},
        })))
        .unwrap()
        .with_retry_limit(10);

        assert_eq!(chosen(&sampler.sample().unwrap(), "x"), json!(1.0));
        assert!(matches!(
            sampler.sample(),
            Err(SearchError::Exhausted { drawn: 1 })
        ));
    }

    #[test]
    fn seeded_samplers_agree() {
        let raw = template(json!({
            "a": {"min": 0, "max": 1000},
            "b": {"min": 0.0, "max": 1.0},
        }));
        let mut first = Sampler::new(raw.clone()).unwrap().with_seed(42);
        let mut second = Sampler::new(raw).unwrap().with_seed(42);
        for _ in 0..5 {
            assert_eq!(first.sample().unwrap(), second.sample().unwrap());
        }
    }

    #[test]
    fn non_object_template_is_rejected() {
        let err = Sampler::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, SearchError::InvalidTemplate { .. }));
    }

    #[test]
    fn loads_template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.json");
        std::fs::write(&path, r#"{"a": {"values": ["x", "y"]}, "epochs": 2}"#).unwrap();

        let sampler = Sampler::from_path(&path).unwrap();
        assert_eq!(sampler.cardinality(), Cardinality::Finite(2));
        assert_eq!(sampler.axes().len(), 1);
    }

    #[test]
    fn equal_samples_hash_alike() {
        use std::collections::hash_map::DefaultHasher;

        let hash = |s: &Sample| {
            let mut h = DefaultHasher::new();
            s.hash(&mut h);
            h.finish()
        };
        let a = Sample(vec![("x".into(), json!(0.0)), ("y".into(), json!({"k": [1, 2]}))]);
        let b = Sample(vec![("x".into(), json!(-0.0)), ("y".into(), json!({"k": [1, 2]}))]);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
    }
}
