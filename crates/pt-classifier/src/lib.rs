//! Default implementation of the classifier collaborator named in the
//! strategy framework's external interfaces: an off-the-shelf linear
//! classifier trained with stochastic gradient descent over a hinge loss.
//! The SDG strategy (C6) depends only on the `Classifier` trait; this is
//! one concrete, deterministic implementation of it.

use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha12Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    Hinge,
}

pub trait Classifier {
    fn new(loss: Loss, seed: u64) -> Self
    where
        Self: Sized;
    fn train(&mut self, x: &[Vec<f64>], y: &[i8]);
    fn predict(&self, x: &[Vec<f64>]) -> Vec<i8>;
}

/// Primal linear SVM trained by averaged Pegasos-style SGD: each epoch
/// visits every training row once in a freshly shuffled, seeded order, with
/// a `1/(lambda*t)` learning-rate schedule and the standard hinge-loss
/// shrink-then-update per step.
pub struct LinearSgdClassifier {
    weights: Vec<f64>,
    bias: f64,
    loss: Loss,
    seed: u64,
    lambda: f64,
    epochs: usize,
}

impl LinearSgdClassifier {
    pub fn with_hyperparams(loss: Loss, seed: u64, lambda: f64, epochs: usize) -> Self {
        LinearSgdClassifier {
            weights: Vec::new(),
            bias: 0.0,
            loss,
            seed,
            lambda,
            epochs,
        }
    }
}

impl Classifier for LinearSgdClassifier {
    fn new(loss: Loss, seed: u64) -> Self {
        Self::with_hyperparams(loss, seed, 1e-4, 20)
    }

    fn train(&mut self, x: &[Vec<f64>], y: &[i8]) {
        assert_eq!(self.loss, Loss::Hinge, "only hinge loss is implemented");
        assert_eq!(x.len(), y.len());
        if x.is_empty() {
            return;
        }
        let dim = x[0].len();
        self.weights = vec![0.0; dim];
        self.bias = 0.0;

        let mut rng = ChaCha12Rng::seed_from_u64(self.seed);
        let mut t = 1usize;
        for _epoch in 0..self.epochs {
            let mut order: Vec<usize> = (0..x.len()).collect();
            order.shuffle(&mut rng);
            for &i in &order {
                let eta = 1.0 / (self.lambda * t as f64);
                let label = if y[i] > 0 { 1.0 } else { -1.0 };
                let margin = label * (dot(&self.weights, &x[i]) + self.bias);

                for w in self.weights.iter_mut() {
                    *w *= 1.0 - eta * self.lambda;
                }
                if margin < 1.0 {
                    for (w, &xi) in self.weights.iter_mut().zip(x[i].iter()) {
                        *w += eta * label * xi;
                    }
                    self.bias += eta * label;
                }
                t += 1;
            }
        }
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<i8> {
        x.iter()
            .map(|row| i8::from(dot(&self.weights, row) + self.bias >= 0.0))
            .collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_linearly_separable_data() {
        let x: Vec<Vec<f64>> = vec![
            vec![2.0, 2.0],
            vec![2.5, 1.5],
            vec![3.0, 2.5],
            vec![-2.0, -2.0],
            vec![-2.5, -1.5],
            vec![-3.0, -2.5],
        ];
        let y: Vec<i8> = vec![1, 1, 1, 0, 0, 0];
        let mut clf = LinearSgdClassifier::new(Loss::Hinge, 7);
        clf.train(&x, &y);
        let preds = clf.predict(&x);
        assert_eq!(preds, y);
    }

    #[test]
    fn deterministic_given_seed() {
        let x: Vec<Vec<f64>> = vec![
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![-1.0, 0.0],
            vec![-0.9, -0.1],
        ];
        let y: Vec<i8> = vec![1, 1, 0, 0];
        let mut a = LinearSgdClassifier::new(Loss::Hinge, 42);
        let mut b = LinearSgdClassifier::new(Loss::Hinge, 42);
        a.train(&x, &y);
        b.train(&x, &y);
        assert_eq!(a.predict(&x), b.predict(&x));
    }
}
