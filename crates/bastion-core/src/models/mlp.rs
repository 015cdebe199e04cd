//! Fully connected network with a linear scalar output.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;

use bastion_smt::terms::SmtTerm;

use crate::consts::ActivationType;
use crate::error::ShapeError;
use crate::models::{
    check_input, check_output, check_symbolic_input, persistence, BarrierModel, ModelError,
    NumericModel, Persistence, SymbolicModel, TrainableModel,
};
use crate::symbolic::{Scope, Symbolic};

/// Affine layer `z = W·a + b` with `W` of shape `(out, in)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Dense {
    fn zeros(input: usize, output: usize) -> Self {
        Self {
            weight: Array2::zeros((output, input)),
            bias: Array1::zeros(output),
        }
    }

    fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn apply(&self, a: &Array2<f64>) -> Array2<f64> {
        a.dot(&self.weight.t()) + &self.bias
    }

    fn apply_linear(&self, a: &Array2<f64>) -> Array2<f64> {
        a.dot(&self.weight.t())
    }

    fn symbolic(&self, a: &[SmtTerm]) -> Vec<SmtTerm> {
        self.weight
            .rows()
            .into_iter()
            .zip(self.bias.iter())
            .map(|(row, &b)| {
                SmtTerm::sum(
                    row.iter()
                        .zip(a)
                        .map(|(&w, ai)| SmtTerm::real(w).mul(ai.clone())),
                )
                .add(SmtTerm::real(b))
            })
            .collect()
    }
}

/// Intermediate values of one forward pass with a tangent direction.
struct Trace {
    /// Input of every layer, the output layer included.
    inputs: Vec<Array2<f64>>,
    tangents: Vec<Array2<f64>>,
    /// Pre-activations of the hidden layers and their tangents.
    pre: Vec<Array2<f64>>,
    pre_tangents: Vec<Array2<f64>>,
    value: Array1<f64>,
    tangent: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    input_size: usize,
    hidden_sizes: Vec<usize>,
    activations: Vec<ActivationType>,
    /// Hidden layers followed by the output layer.
    layers: Vec<Dense>,
}

impl Mlp {
    /// All parameters zero.
    pub fn zeros(
        input_size: usize,
        hidden_sizes: &[usize],
        activations: &[ActivationType],
    ) -> Result<Self, ShapeError> {
        if activations.len() != hidden_sizes.len() {
            return Err(ShapeError::new(
                "mlp activations",
                format!("one per hidden layer ({})", hidden_sizes.len()),
                activations.len(),
            ));
        }
        if input_size == 0 || hidden_sizes.contains(&0) {
            return Err(ShapeError::new(
                "mlp layer sizes",
                "non-zero sizes",
                format!("input {input_size}, hidden {hidden_sizes:?}"),
            ));
        }
        let mut layers = Vec::with_capacity(hidden_sizes.len() + 1);
        let mut fan_in = input_size;
        for &h in hidden_sizes {
            layers.push(Dense::zeros(fan_in, h));
            fan_in = h;
        }
        layers.push(Dense::zeros(fan_in, 1));
        Ok(Self {
            input_size,
            hidden_sizes: hidden_sizes.to_vec(),
            activations: activations.to_vec(),
            layers,
        })
    }

    /// Weights and biases uniform in `±1/√fan_in`.
    pub fn random<R: Rng + ?Sized>(
        input_size: usize,
        hidden_sizes: &[usize],
        activations: &[ActivationType],
        rng: &mut R,
    ) -> Result<Self, ShapeError> {
        let mut mlp = Self::zeros(input_size, hidden_sizes, activations)?;
        for layer in &mut mlp.layers {
            let bound = 1.0 / (layer.weight.ncols() as f64).sqrt();
            layer
                .weight
                .mapv_inplace(|_| rng.gen_range(-bound..bound));
            layer.bias.mapv_inplace(|_| rng.gen_range(-bound..bound));
        }
        Ok(mlp)
    }

    pub fn hidden_sizes(&self) -> &[usize] {
        &self.hidden_sizes
    }

    pub fn activations(&self) -> &[ActivationType] {
        &self.activations
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        persistence::load_mlp(dir)
    }

    fn hidden(
        &self,
    ) -> impl DoubleEndedIterator<Item = (&Dense, ActivationType)> + ExactSizeIterator + '_ {
        self.layers.iter().zip(self.activations.iter().copied())
    }

    fn output_layer(&self) -> &Dense {
        &self.layers[self.layers.len() - 1]
    }

    fn trace(&self, x: ArrayView2<'_, f64>, v: ArrayView2<'_, f64>) -> Trace {
        let n_hidden = self.hidden_sizes.len();
        let mut trace = Trace {
            inputs: Vec::with_capacity(n_hidden + 1),
            tangents: Vec::with_capacity(n_hidden + 1),
            pre: Vec::with_capacity(n_hidden),
            pre_tangents: Vec::with_capacity(n_hidden),
            value: Array1::zeros(0),
            tangent: Array1::zeros(0),
        };
        let mut a = x.to_owned();
        let mut da = v.to_owned();
        for (layer, act) in self.hidden() {
            let z = layer.apply(&a);
            let dz = layer.apply_linear(&da);
            let next = z.mapv(|t| act.apply(t));
            let dnext = z.mapv(|t| act.derivative(t)) * &dz;
            trace.inputs.push(a);
            trace.tangents.push(da);
            trace.pre.push(z);
            trace.pre_tangents.push(dz);
            a = next;
            da = dnext;
        }
        let out = self.output_layer();
        trace.value = out.apply(&a).column(0).to_owned();
        trace.tangent = out.apply_linear(&da).column(0).to_owned();
        trace.inputs.push(a);
        trace.tangents.push(da);
        trace
    }

    fn check_tangent(
        &self,
        x: &ArrayView2<'_, f64>,
        v: &ArrayView2<'_, f64>,
    ) -> Result<(), ShapeError> {
        check_input("mlp", x, self.input_size)?;
        if v.dim() != x.dim() {
            return Err(ShapeError::new(
                "mlp tangent",
                format!("{:?}", x.dim()),
                format!("{:?}", v.dim()),
            ));
        }
        Ok(())
    }

    fn hidden_symbolic(
        &self,
        x: &[SmtTerm],
    ) -> Result<(Vec<Vec<SmtTerm>>, Vec<SmtTerm>), ModelError> {
        check_symbolic_input("mlp", x, self.input_size)?;
        let mut pre = Vec::with_capacity(self.hidden_sizes.len());
        let mut a = x.to_vec();
        for (layer, act) in self.hidden() {
            let z = layer.symbolic(&a);
            a = z
                .iter()
                .map(|zj| act.symbolic(zj.clone()))
                .collect::<Result<_, _>>()?;
            pre.push(z);
        }
        Ok((pre, a))
    }
}

impl NumericModel for Mlp {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        check_input("mlp", &x, self.input_size)?;
        let mut a = x.to_owned();
        for (layer, act) in self.hidden() {
            a = layer.apply(&a).mapv(|t| act.apply(t));
        }
        let out = self.output_layer().apply(&a).column(0).to_owned();
        check_output("mlp", &out, x.nrows())?;
        Ok(out)
    }

    fn gradient(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        check_input("mlp", &x, self.input_size)?;
        let trace = self.trace(x, Array2::<f64>::zeros(x.raw_dim()).view());
        let mut g = Array2::<f64>::ones((x.nrows(), 1)).dot(&self.output_layer().weight);
        for (k, (layer, act)) in self.hidden().enumerate().rev() {
            let slope = trace.pre[k].mapv(|t| act.derivative(t));
            g = (g * &slope).dot(&layer.weight);
        }
        Ok(g)
    }

    fn directional_derivative(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
    ) -> Result<Array1<f64>, ModelError> {
        self.check_tangent(&x, &v)?;
        Ok(self.trace(x, v).tangent)
    }
}

impl SymbolicModel for Mlp {
    fn forward_symbolic(
        &self,
        x: &[SmtTerm],
        _scope: &Scope,
    ) -> Result<Symbolic<SmtTerm>, ModelError> {
        let (_, a) = self.hidden_symbolic(x)?;
        let mut out = self.output_layer().symbolic(&a);
        Ok(Symbolic::pure(out.remove(0)))
    }

    fn gradient_symbolic(
        &self,
        x: &[SmtTerm],
        _scope: &Scope,
    ) -> Result<Symbolic<Vec<SmtTerm>>, ModelError> {
        let (pre, _) = self.hidden_symbolic(x)?;
        let mut g: Vec<SmtTerm> = self
            .output_layer()
            .weight
            .row(0)
            .iter()
            .map(|&w| SmtTerm::real(w))
            .collect();
        for (k, (layer, act)) in self.hidden().enumerate().rev() {
            let scaled = g
                .into_iter()
                .zip(&pre[k])
                .map(|(gj, zj)| Ok(gj.mul(act.symbolic_derivative(zj.clone())?)))
                .collect::<Result<Vec<_>, ModelError>>()?;
            g = (0..layer.weight.ncols())
                .map(|i| {
                    SmtTerm::sum(
                        scaled
                            .iter()
                            .zip(layer.weight.column(i))
                            .map(|(gj, &w)| gj.clone().mul(SmtTerm::real(w))),
                    )
                })
                .collect();
        }
        Ok(Symbolic::pure(g))
    }
}

impl TrainableModel for Mlp {
    fn num_parameters(&self) -> usize {
        self.layers.iter().map(Dense::num_parameters).sum()
    }

    fn parameters(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.num_parameters());
        for layer in &self.layers {
            params.extend(layer.weight.iter());
            params.extend(layer.bias.iter());
        }
        params
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<(), ShapeError> {
        if params.len() != self.num_parameters() {
            return Err(ShapeError::new(
                "mlp parameters",
                self.num_parameters(),
                params.len(),
            ));
        }
        let mut rest = params;
        for layer in &mut self.layers {
            let (w, tail) = rest.split_at(layer.weight.len());
            let (b, tail) = tail.split_at(layer.bias.len());
            for (dst, &src) in layer.weight.iter_mut().zip(w) {
                *dst = src;
            }
            for (dst, &src) in layer.bias.iter_mut().zip(b) {
                *dst = src;
            }
            rest = tail;
        }
        Ok(())
    }

    fn forward_with_tangent(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), ModelError> {
        self.check_tangent(&x, &v)?;
        let trace = self.trace(x, v);
        Ok((trace.value, trace.tangent))
    }

    fn parameter_gradient(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
        grad_value: &Array1<f64>,
        grad_tangent: &Array1<f64>,
    ) -> Result<Vec<f64>, ModelError> {
        self.check_tangent(&x, &v)?;
        check_output("mlp value gradient", grad_value, x.nrows())?;
        check_output("mlp tangent gradient", grad_tangent, x.nrows())?;
        let trace = self.trace(x, v);
        let n_hidden = self.hidden_sizes.len();

        let gv = grad_value.view().insert_axis(Axis(1));
        let gt = grad_tangent.view().insert_axis(Axis(1));
        let out = self.output_layer();
        let mut grads: Vec<(Array2<f64>, Array1<f64>)> = Vec::with_capacity(n_hidden + 1);
        grads.push((
            gv.t().dot(&trace.inputs[n_hidden]) + gt.t().dot(&trace.tangents[n_hidden]),
            Array1::from_elem(1, grad_value.sum()),
        ));
        let mut ga = gv.dot(&out.weight);
        let mut gda = gt.dot(&out.weight);

        for (k, (layer, act)) in self.hidden().enumerate().rev() {
            let z = &trace.pre[k];
            let dz = &trace.pre_tangents[k];
            let slope = z.mapv(|t| act.derivative(t));
            let curvature = z.mapv(|t| act.second_derivative(t));
            let gz = &ga * &slope + &gda * &curvature * dz;
            let gdz = &gda * &slope;
            grads.push((
                gz.t().dot(&trace.inputs[k]) + gdz.t().dot(&trace.tangents[k]),
                gz.sum_axis(Axis(0)),
            ));
            ga = gz.dot(&layer.weight);
            gda = gdz.dot(&layer.weight);
        }

        let mut flat = Vec::with_capacity(self.num_parameters());
        for (w, b) in grads.iter().rev() {
            flat.extend(w.iter());
            flat.extend(b.iter());
        }
        Ok(flat)
    }
}

impl BarrierModel for Mlp {
    fn name(&self) -> &str {
        "mlp"
    }

    fn as_symbolic(&self) -> Option<&dyn SymbolicModel> {
        Some(self)
    }

    fn as_trainable(&self) -> Option<&dyn TrainableModel> {
        Some(self)
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn TrainableModel> {
        Some(self)
    }

    fn save(&self, dir: &Path) -> Result<Persistence, ModelError> {
        persistence::save_mlp(self, dir)?;
        Ok(Persistence::Written)
    }

    fn load(&mut self, dir: &Path) -> Result<Persistence, ModelError> {
        let loaded = persistence::load_mlp(dir)?;
        if loaded.input_size != self.input_size
            || loaded.hidden_sizes != self.hidden_sizes
            || loaded.activations != self.activations
        {
            return Err(ModelError::Format {
                path: dir.display().to_string(),
                reason: "stored architecture differs from this network".into(),
            });
        }
        *self = loaded;
        Ok(Persistence::Loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{assert_dual_agreement, close, finite_difference, vars};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn net(acts: &[ActivationType], seed: u64) -> Mlp {
        let mut rng = StdRng::seed_from_u64(seed);
        let hidden = vec![5; acts.len()];
        Mlp::random(3, &hidden, acts, &mut rng).unwrap()
    }

    fn points(seed: u64, n: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((n, 3), |_| rng.gen_range(-2.0..2.0))
    }

    #[test]
    fn architecture_is_validated() {
        assert!(Mlp::zeros(2, &[4, 4], &[ActivationType::Relu]).is_err());
        assert!(Mlp::zeros(0, &[4], &[ActivationType::Relu]).is_err());
        let mlp = Mlp::zeros(2, &[4, 3], &[ActivationType::Relu; 2]).unwrap();
        assert_eq!(mlp.layers().len(), 3);
        assert_eq!(mlp.num_parameters(), (2 * 4 + 4) + (4 * 3 + 3) + (3 + 1));
    }

    #[test]
    fn forward_rejects_wrong_width() {
        let mlp = net(&[ActivationType::Relu], 0);
        let err = mlp.forward(array![[1.0, 2.0]].view()).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn linear_network_matches_hand_computation() {
        let mut mlp = Mlp::zeros(2, &[1], &[ActivationType::Linear]).unwrap();
        // hidden: z = 2 x0 - x1 + 1, output: 3 z - 0.5
        mlp.set_parameters(&[2.0, -1.0, 1.0, 3.0, -0.5]).unwrap();
        let out = mlp.forward(array![[1.0, 1.0], [0.0, 2.0]].view()).unwrap();
        assert_eq!(out, array![5.5, -3.5]);
        let grad = mlp.gradient(array![[0.3, 0.1]].view()).unwrap();
        assert_eq!(grad, array![[6.0, -3.0]]);
    }

    #[test]
    fn parameters_round_trip_through_the_flat_vector() {
        let mut mlp = net(&[ActivationType::Relu, ActivationType::Square], 1);
        let params = mlp.parameters();
        let shifted: Vec<f64> = params.iter().map(|p| p + 1.0).collect();
        mlp.set_parameters(&shifted).unwrap();
        assert_eq!(mlp.parameters(), shifted);
        assert!(mlp.set_parameters(&params[1..]).is_err());
    }

    #[test]
    fn input_jacobian_matches_finite_differences() {
        let mlp = net(&[ActivationType::Tanh, ActivationType::Softplus], 2);
        let x = points(3, 20);
        let grad = mlp.gradient(x.view()).unwrap();
        for (b, row) in x.rows().into_iter().enumerate() {
            let fd = finite_difference(&mlp, row, 1e-6);
            for j in 0..3 {
                assert!(close(fd[j], grad[[b, j]], 1e-5), "{} vs {}", fd[j], grad[[b, j]]);
            }
        }
    }

    #[test]
    fn tangent_pass_is_the_directional_derivative() {
        let mlp = net(&[ActivationType::Sigmoid, ActivationType::Square], 4);
        let x = points(5, 10);
        let v = points(6, 10);
        let (value, tangent) = mlp.forward_with_tangent(x.view(), v.view()).unwrap();
        assert_eq!(value, mlp.forward(x.view()).unwrap());
        let grad = mlp.gradient(x.view()).unwrap();
        let expected = (&grad * &v).sum_axis(Axis(1));
        for b in 0..10 {
            assert!(close(tangent[b], expected[b], 1e-10));
        }
    }

    #[test]
    fn parameter_gradient_matches_finite_differences() {
        let mlp = net(&[ActivationType::Tanh, ActivationType::Square], 7);
        let x = points(8, 6);
        let v = points(9, 6);
        let gv = array![1.0, -0.5, 0.25, 2.0, 0.0, -1.0];
        let gt = array![0.5, 1.0, -2.0, 0.0, 1.5, 0.75];
        let analytic = mlp
            .parameter_gradient(x.view(), v.view(), &gv, &gt)
            .unwrap();

        let objective = |m: &Mlp| {
            let (h, dh) = m.forward_with_tangent(x.view(), v.view()).unwrap();
            (&h * &gv).sum() + (&dh * &gt).sum()
        };
        let base = mlp.parameters();
        let step = 1e-6;
        for i in 0..base.len() {
            let mut plus = mlp.clone();
            let mut minus = mlp.clone();
            let mut p = base.clone();
            p[i] += step;
            plus.set_parameters(&p).unwrap();
            p[i] -= 2.0 * step;
            minus.set_parameters(&p).unwrap();
            let fd = (objective(&plus) - objective(&minus)) / (2.0 * step);
            assert!(close(fd, analytic[i], 1e-4), "param {i}: {fd} vs {}", analytic[i]);
        }
    }

    #[test]
    fn symbolic_forms_agree_for_solver_friendly_activations() {
        let x = points(10, 25);
        for acts in [
            vec![ActivationType::Relu, ActivationType::Relu],
            vec![ActivationType::Square],
            vec![ActivationType::HTanh, ActivationType::Requ],
            vec![ActivationType::HSigmoid, ActivationType::Identity],
            vec![ActivationType::Rational, ActivationType::Square],
        ] {
            assert_dual_agreement(&net(&acts, 11), &x, true);
        }
    }

    #[test]
    fn transcendental_networks_have_no_symbolic_form() {
        let mlp = net(&[ActivationType::Tanh], 12);
        let (_, terms) = vars(3);
        let err = mlp.forward_symbolic(&terms, &Scope::new("h")).unwrap_err();
        assert!(matches!(err, ModelError::Unimplemented(_)));
        assert!(mlp.gradient_symbolic(&terms, &Scope::new("h")).is_err());
    }
}
