//! Reduce-on-plateau learning rate schedule

/// Mode for plateau detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

/// Multiplies the learning rate by `factor` once the monitored metric has
/// not improved for more than `patience` consecutive epochs
#[derive(Debug, Clone)]
pub struct ReduceOnPlateau {
    best_metric: f64,
    bad_epochs: usize,
    current_lr: f64,
    factor: f64,
    patience: usize,
    min_lr: f64,
    mode: PlateauMode,
}

impl ReduceOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize, min_lr: f64, mode: PlateauMode) -> Self {
        let best_metric = match mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        };

        Self {
            best_metric,
            bad_epochs: 0,
            current_lr: initial_lr,
            factor,
            patience,
            min_lr,
            mode,
        }
    }

    /// Record an epoch's metric and return the learning rate for the next epoch
    pub fn step(&mut self, metric: f64) -> f64 {
        let improved = match self.mode {
            PlateauMode::Min => metric < self.best_metric,
            PlateauMode::Max => metric > self.best_metric,
        };

        if improved {
            self.best_metric = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
            if self.bad_epochs > self.patience {
                self.current_lr = (self.current_lr * self.factor).max(self.min_lr);
                self.bad_epochs = 0;
            }
        }

        self.current_lr
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }
}
