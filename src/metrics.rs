use std::time::Duration;

use candle_core::{DType, Result, Tensor, D};

/// Running micro-averaged accuracy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}
impl Accuracy {
    /// Accuracy of `logits` (rows of class scores) against `targets`.
    pub fn from_logits(logits: &Tensor, targets: &Tensor) -> Result<Self> {
        let total = targets.elem_count();
        if total == 0 {
            return Ok(Self::default());
        }
        let correct = logits
            .argmax(D::Minus1)?
            .eq(targets)?
            .to_dtype(DType::U32)?
            .sum_all()?
            .to_scalar::<u32>()? as usize;
        Ok(Self { correct, total })
    }
    pub fn update(&mut self, logits: &Tensor, targets: &Tensor) -> Result<()> {
        self.merge(Self::from_logits(logits, targets)?);
        Ok(())
    }
    pub fn merge(&mut self, other: Self) {
        self.correct += other.correct;
        self.total += other.total;
    }
    /// `None` before anything was counted.
    pub fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.correct as f64 / self.total as f64)
    }
}

/// Mean and population standard deviation of epoch durations once warm-up is over.
#[derive(Debug, Clone, Default)]
pub struct DurationStats {
    durations: Vec<Duration>,
    warmup: usize,
}
impl DurationStats {
    pub fn new(warmup: usize) -> Self {
        Self {
            durations: Vec::new(),
            warmup,
        }
    }
    pub fn push(&mut self, duration: Duration) {
        self.durations.push(duration);
    }
    pub fn durations(&self) -> &[Duration] {
        &self.durations
    }
    /// `(mean, std)` in seconds over the epochs after warm-up.
    pub fn summary(&self) -> Option<(f64, f64)> {
        let measured = self.durations.get(self.warmup..).filter(|d| !d.is_empty())?;
        let n = measured.len() as f64;
        let mean = measured.iter().map(Duration::as_secs_f64).sum::<f64>() / n;
        let var = measured
            .iter()
            .map(|d| (d.as_secs_f64() - mean).powi(2))
            .sum::<f64>()
            / n;
        Some((mean, var.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn accuracy_counts_argmax_hits() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[0.1f32, 0.9], [0.8, 0.2], [0.3, 0.7]], &device).unwrap();
        let targets = Tensor::new(&[1u32, 1, 1], &device).unwrap();
        let acc = Accuracy::from_logits(&logits, &targets).unwrap();
        assert_eq!(acc, Accuracy { correct: 2, total: 3 });
    }

    #[test]
    fn merged_batches_equal_concatenation() {
        let device = Device::Cpu;
        let mut acc = Accuracy::default();
        assert_eq!(acc.value(), None);
        acc.update(
            &Tensor::new(&[[1f32, 0.]], &device).unwrap(),
            &Tensor::new(&[0u32], &device).unwrap(),
        )
        .unwrap();
        acc.update(
            &Tensor::new(&[[1f32, 0.], [0., 1.], [0., 1.]], &device).unwrap(),
            &Tensor::new(&[1u32, 1, 0], &device).unwrap(),
        )
        .unwrap();
        assert_eq!(acc.value(), Some(0.5));
    }

    #[test]
    fn duration_summary_skips_warmup() {
        let mut stats = DurationStats::new(2);
        for secs in [10.0, 9.0, 1.0, 3.0] {
            stats.push(Duration::from_secs_f64(secs));
        }
        let (mean, std) = stats.summary().unwrap();
        assert!((mean - 2.0).abs() < 1e-9);
        assert!((std - 1.0).abs() < 1e-9);

        assert!(DurationStats::new(4).summary().is_none());
    }
}
