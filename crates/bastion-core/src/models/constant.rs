use ndarray::{Array1, Array2, ArrayView2};

use bastion_smt::terms::SmtTerm;

use crate::models::{
    check_input, check_symbolic_input, BarrierModel, ModelError, NumericModel, SymbolicModel,
};
use crate::symbolic::{Scope, Symbolic};

/// `h(x) = c` everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantModel {
    input_size: usize,
    value: f64,
}

impl ConstantModel {
    pub fn new(input_size: usize, value: f64) -> Self {
        Self { input_size, value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl NumericModel for ConstantModel {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        check_input("constant", &x, self.input_size)?;
        Ok(Array1::from_elem(x.nrows(), self.value))
    }

    fn gradient(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        check_input("constant", &x, self.input_size)?;
        Ok(Array2::zeros(x.raw_dim()))
    }
}

impl SymbolicModel for ConstantModel {
    fn forward_symbolic(
        &self,
        x: &[SmtTerm],
        _scope: &Scope,
    ) -> Result<Symbolic<SmtTerm>, ModelError> {
        check_symbolic_input("constant", x, self.input_size)?;
        Ok(Symbolic::pure(SmtTerm::real(self.value)))
    }

    fn gradient_symbolic(
        &self,
        x: &[SmtTerm],
        _scope: &Scope,
    ) -> Result<Symbolic<Vec<SmtTerm>>, ModelError> {
        check_symbolic_input("constant", x, self.input_size)?;
        Ok(Symbolic::pure(vec![SmtTerm::zero(); self.input_size]))
    }
}

impl BarrierModel for ConstantModel {
    fn name(&self) -> &str {
        "constant"
    }

    fn as_symbolic(&self) -> Option<&dyn SymbolicModel> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::assert_dual_agreement;
    use ndarray::array;

    #[test]
    fn constant_is_flat() {
        let h = ConstantModel::new(2, 0.5);
        let x = array![[1.0, 2.0], [-3.0, 4.0], [0.0, 0.0]];
        assert_eq!(h.forward(x.view()).unwrap(), array![0.5, 0.5, 0.5]);
        assert_eq!(h.gradient(x.view()).unwrap(), Array2::<f64>::zeros((3, 2)));
        assert_dual_agreement(&h, &x, true);
    }

    #[test]
    fn constant_is_not_trainable() {
        let mut h = ConstantModel::new(1, 1.0);
        assert!(h.as_trainable_mut().is_none());
        assert!(h.symbolic().is_ok());
    }
}
