use ironyard_core::{NodeState, WeightProperties};

use super::Weigher;

/// Scores nodes by port count.
///
/// With the default negative multiplier, nodes with fewer ports win, which
/// keeps well-connected nodes free for requests that need them.
pub struct PortWeigher {
    multiplier: f64,
}

impl PortWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl Weigher for PortWeigher {
    fn name(&self) -> &'static str {
        "PortWeigher"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh(&self, node: &NodeState, _props: &WeightProperties) -> f64 {
        node.ports.len() as f64
    }
}
