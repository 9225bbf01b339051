//! Softmax cross-entropy loss on output-layer logits.
use crate::activations::Softmax;
use crate::error::{NetError, Result};
use crate::tensor::Vector;

fn check_label(logits: &[f32], label: usize) -> Result<()> {
    if label >= logits.len() {
        return Err(NetError::InvalidLabel {
            label,
            classes: logits.len(),
        });
    }
    Ok(())
}

/// `-ln(softmax(logits)[label])`
pub fn cross_entropy_loss(logits: &[f32], label: usize) -> Result<f32> {
    check_label(logits, label)?;
    Ok((Softmax.log_sum_exp(logits) - logits[label]).max(0.0))
}

/// Gradient of the softmax cross-entropy loss with respect to the logits:
/// softmax minus the one-hot encoding of `label`.
pub fn cross_entropy_deriv(logits: &[f32], label: usize) -> Result<Vector> {
    check_label(logits, label)?;
    let mut grad = Softmax.apply_vec(logits);
    grad[label] -= 1.0;
    Ok(Vector::from_vec(grad))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_vanishes_when_confident_and_grows_when_wrong() {
        let confident = cross_entropy_loss(&[30.0, 0.0, 0.0], 0).unwrap();
        assert!(confident < 1e-6);
        let mut last = 0.0;
        for gap in [1.0, 5.0, 20.0, 80.0] {
            let wrong = cross_entropy_loss(&[gap, 0.0, 0.0], 1).unwrap();
            assert!(wrong > last);
            last = wrong;
        }
        assert!(last > 79.0);
    }

    #[test]
    fn uniform_logits_give_log_classes() {
        let l = cross_entropy_loss(&[0.0; 10], 3).unwrap();
        assert!((l - 10f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn gradient_sums_to_zero() {
        let g = cross_entropy_deriv(&[0.3, -1.2, 2.0], 2).unwrap();
        let total: f32 = g.iter().sum();
        assert!(total.abs() < 1e-6);
        assert!(g[2] < 0.0);
        assert!(g[0] > 0.0 && g[1] > 0.0);
    }

    #[test]
    fn rejects_out_of_range_label() {
        assert!(matches!(
            cross_entropy_loss(&[0.0, 0.0], 2),
            Err(NetError::InvalidLabel { label: 2, classes: 2 })
        ));
        assert!(cross_entropy_deriv(&[0.0], 1).is_err());
    }
}
