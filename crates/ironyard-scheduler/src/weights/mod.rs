//! Node weighers.
//!
//! Each weigher produces a raw score per node. Raw scores are normalized to
//! `0.0..=1.0` across the candidate set, scaled by the weigher's
//! multiplier, and summed. Candidates are ranked highest first; equal
//! weights keep their input order.

use std::sync::Arc;

use ironyard_core::config::SchedulerSection;
use ironyard_core::{NodeState, WeightProperties};

use crate::error::{SchedulerError, SchedulerResult};

pub mod ports;

pub use ports::PortWeigher;

/// Scores one node for a request.
pub trait Weigher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scale applied to normalized scores. Negative inverts the preference.
    fn multiplier(&self) -> f64 {
        1.0
    }

    fn weigh(&self, node: &NodeState, props: &WeightProperties) -> f64;
}

/// Every weigher name this build knows about.
pub const AVAILABLE_WEIGHERS: &[&str] = &["PortWeigher"];

fn weigher_by_name(name: &str, config: &SchedulerSection) -> Option<Arc<dyn Weigher>> {
    let weigher: Arc<dyn Weigher> = match name {
        "PortWeigher" => Arc::new(PortWeigher::new(config.port_weight_multiplier)),
        _ => return None,
    };
    Some(weigher)
}

/// Resolve configured weigher names, failing on the first unknown one.
pub fn resolve_weighers(
    names: &[String],
    config: &SchedulerSection,
) -> SchedulerResult<Vec<Arc<dyn Weigher>>> {
    names
        .iter()
        .map(|name| {
            weigher_by_name(name, config)
                .ok_or_else(|| SchedulerError::WeigherNotFound(name.clone()))
        })
        .collect()
}

/// Strategy that turns weigher scores into a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightHandler {
    /// Normalized, multiplied, summed; highest first with stable ties.
    Ordered,
}

impl WeightHandler {
    /// Resolve a configured handler name.
    pub fn from_name(name: &str) -> SchedulerResult<Self> {
        match name {
            "ordered" => Ok(Self::Ordered),
            other => Err(SchedulerError::WeightHandlerNotFound(other.to_string())),
        }
    }

    /// Rank `nodes` with `weighers`, best first.
    pub fn rank<'a>(
        self,
        weighers: &[Arc<dyn Weigher>],
        nodes: Vec<&'a NodeState>,
        props: &WeightProperties,
    ) -> Vec<WeighedNode<'a>> {
        match self {
            Self::Ordered => weigh_nodes(weighers, nodes, props),
        }
    }
}

/// A candidate with its combined weight.
#[derive(Debug, Clone)]
pub struct WeighedNode<'a> {
    pub node: &'a NodeState,
    pub weight: f64,
}

/// Min-max scale `values` into `0.0..=1.0`. A flat set maps to all zeros.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Weigh and rank `nodes`, best first.
pub fn weigh_nodes<'a>(
    weighers: &[Arc<dyn Weigher>],
    nodes: Vec<&'a NodeState>,
    props: &WeightProperties,
) -> Vec<WeighedNode<'a>> {
    let mut weighed: Vec<WeighedNode<'a>> = nodes
        .into_iter()
        .map(|node| WeighedNode { node, weight: 0.0 })
        .collect();

    for weigher in weighers {
        let raw: Vec<f64> = weighed.iter().map(|w| weigher.weigh(w.node, props)).collect();
        let multiplier = weigher.multiplier();
        for (entry, score) in weighed.iter_mut().zip(normalize(&raw)) {
            entry.weight += multiplier * score;
        }
    }

    // `sort_by` is stable, so ties keep input order.
    weighed.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    weighed
}
