//! Random-forest regressor
//!
//! Each tree is grown on a bootstrap sample with exhaustive variance-reduction
//! splits; predictions average the trees. Trees are stored as flat node
//! arrays so fitted forests serialise to JSON without recursion.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Fitting options
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One regression tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Fitted forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> PipelineResult<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(PipelineError::InsufficientData(format!(
                "random forest needs matching non-empty rows, got {} rows and {} targets",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        let mut rng = SmallRng::seed_from_u64(params.seed);
        let trees = (0..params.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut builder = TreeBuilder {
                    x,
                    y,
                    params,
                    nodes: Vec::new(),
                };
                builder.grow(sample, 0);
                RegressionTree {
                    nodes: builder.nodes,
                }
            })
            .collect();
        Ok(Self { trees })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl TreeBuilder<'_> {
    /// Grow the subtree for `rows`, returning its node index
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let mean = rows.iter().map(|&r| self.y[r]).sum::<f64>() / rows.len() as f64;
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.params.max_depth || rows.len() < self.params.min_samples_split {
            return idx;
        }
        let Some(best) = self.best_split(&rows) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[r][best.feature] <= best.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    /// Split maximising `sum_l²/n_l + sum_r²/n_r` (equivalent to the
    /// largest reduction in squared error)
    fn best_split(&self, rows: &[usize]) -> Option<BestSplit> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let total: f64 = rows.iter().map(|&r| self.y[r]).sum();
        let parent_score = total * total / n as f64;
        let dim = self.x[rows[0]].len();

        let mut best: Option<BestSplit> = None;
        let mut sorted = rows.to_vec();
        for feature in 0..dim {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                left_sum += self.y[sorted[i]];
                let here = self.x[sorted[i]][feature];
                let next = self.x[sorted[i + 1]][feature];
                if here == next {
                    continue;
                }
                let n_left = i + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / n_left as f64
                    + right_sum * right_sum / n_right as f64;
                if score > parent_score + 1e-12
                    && best.as_ref().map_or(true, |b| score > b.score)
                {
                    best = Some(BestSplit {
                        feature,
                        threshold: (here + next) / 2.0,
                        score,
                    });
                }
            }
        }
        best
    }
}
