use bastion_core::consts::DomainName;
use bastion_core::domains::Set;
use bastion_core::symbolic::Scope;
use bastion_smt::terms::SmtTerm;

use super::{Condition, ConditionKind, Context, TranslateError};

/// `x ∈ X_D ∧ h(x) ≥ 0 ⇒ ∃u ∈ U: ∇h·(f + g·u) − σ + α·h ≥ 0`.
pub(super) fn lie_condition(ctx: &Context<'_>) -> Result<Condition, TranslateError> {
    let x = &ctx.x;
    let domain = ctx.domain(DomainName::Lie)?.symbolic_constraints(x)?;
    let input = ctx.domain(DomainName::Input)?;
    let f = ctx.system.fx_symbolic(x)?;
    let g = ctx.system.gx_symbolic(x)?;

    let record = ctx
        .h_at(x, "h")?
        .zip(ctx.h.gradient_symbolic(x, &Scope::new("h"))?)
        .zip(ctx.sigma_at(x)?);
    let ((h, dh), sigma) = &record.value;
    let (drift, gain) = lie_derivative(dh, &f, &g);
    let rate = drift
        .sub(sigma.clone())
        .add(ctx.alpha().mul(h.clone()));
    let claim = h
        .clone()
        .ge(SmtTerm::zero())
        .implies(exists_control(ctx, rate, &gain, input)?);

    Ok(Condition::new(
        ConditionKind::Lie,
        ctx.system.vars().to_vec(),
        domain,
        record.map(|_| claim),
    ))
}

/// Over `x ∈ X_D, u ∈ U, z ∈ Z` with `h(x) ≥ 0`:
/// `∇h·(f + g·u) − σ + α·h ≥ 0 ⇒ ∇h·(f + g·u + Δ(x, z)) + α·h ≥ 0`.
pub(super) fn robust_condition(ctx: &Context<'_>) -> Result<Condition, TranslateError> {
    let x = &ctx.x;
    let (vars, z, domain) = ctx.robust_point()?;
    let uncertainty = ctx
        .system
        .uncertainty()
        .ok_or_else(|| TranslateError::MissingUncertainty(ctx.system.id().to_string()))?;
    let nominal = ctx.system.closed_loop_symbolic(x, &ctx.u)?;
    let disturbed: Vec<SmtTerm> = nominal
        .iter()
        .zip(uncertainty.fz_symbolic(x, &z)?)
        .map(|(v, d)| v.clone().add(d))
        .collect();

    let record = ctx
        .h_at(x, "h")?
        .zip(ctx.h.gradient_symbolic(x, &Scope::new("h"))?)
        .zip(ctx.sigma_at(x)?);
    let ((h, dh), sigma) = &record.value;
    let decay = ctx.alpha().mul(h.clone());
    let premise = SmtTerm::and(vec![
        h.clone().ge(SmtTerm::zero()),
        SmtTerm::dot(dh, &nominal)
            .sub(sigma.clone())
            .add(decay.clone())
            .ge(SmtTerm::zero()),
    ]);
    let conclusion = SmtTerm::dot(dh, &disturbed)
        .add(decay)
        .ge(SmtTerm::zero());

    Ok(Condition::new(
        ConditionKind::Robust,
        vars,
        domain,
        record.map(|_| premise.implies(conclusion)),
    ))
}

/// `∇h·f` and the coefficients of `u` in `∇h·g·u`.
fn lie_derivative(dh: &[SmtTerm], f: &[SmtTerm], g: &[Vec<SmtTerm>]) -> (SmtTerm, Vec<SmtTerm>) {
    let drift = SmtTerm::dot(dh, f);
    let n_controls = g.first().map_or(0, Vec::len);
    let gain = (0..n_controls)
        .map(|j| {
            SmtTerm::sum(
                dh.iter()
                    .zip(g)
                    .map(|(dhi, row)| dhi.clone().mul(row[j].clone())),
            )
        })
        .collect();
    (drift, gain)
}

/// `∃u ∈ U: base + gain·u ≥ 0`.
///
/// Over a box the left side is maximised coordinate-wise at a bound, which
/// removes the quantifier without changing the meaning.
fn exists_control(
    ctx: &Context<'_>,
    base: SmtTerm,
    gain: &[SmtTerm],
    input: &Set,
) -> Result<SmtTerm, TranslateError> {
    match input {
        Set::Rectangle { lower, upper, .. } if !ctx.config.quantify_inputs => {
            let best = gain.iter().zip(lower.iter().zip(upper)).map(|(c, (&lo, &hi))| {
                let at_lo = c.clone().mul(SmtTerm::real(lo));
                if lo == hi {
                    at_lo
                } else {
                    at_lo.max(c.clone().mul(SmtTerm::real(hi)))
                }
            });
            Ok(SmtTerm::sum(std::iter::once(base).chain(best)).ge(SmtTerm::zero()))
        }
        _ => {
            let body = SmtTerm::and(vec![
                input.symbolic_constraints(&ctx.u)?,
                base.add(SmtTerm::dot(gain, &ctx.u)).ge(SmtTerm::zero()),
            ]);
            Ok(SmtTerm::exists(ctx.system.controls().to_vec(), body))
        }
    }
}
