use bastion_core::consts::DomainName;
use bastion_smt::terms::SmtTerm;

use super::{Condition, ConditionKind, Context, TranslateError};

/// `x ∈ X_D ∧ h(x) ≥ 0 ⇒ ∃u ∈ U: h(f + g·u) − σ − h + α·h ≥ 0`.
///
/// `h(x⁺)` depends on `u`, so its fresh variables and side constraints live
/// inside the existential.
pub(super) fn lie_condition(ctx: &Context<'_>) -> Result<Condition, TranslateError> {
    let x = &ctx.x;
    let domain = ctx.domain(DomainName::Lie)?.symbolic_constraints(x)?;
    let input = ctx.domain(DomainName::Input)?;
    let next = ctx.system.closed_loop_symbolic(x, &ctx.u)?;
    let h_next = ctx.h_at(&next, "h_next")?;

    let record = ctx.h_at(x, "h")?.zip(ctx.sigma_at(x)?);
    let (h, sigma) = &record.value;
    let step = forward_difference(ctx, h_next.value.clone(), h)
        .sub(sigma.clone())
        .ge(SmtTerm::zero());

    let mut body = vec![input.symbolic_constraints(&ctx.u)?];
    body.extend(h_next.constraints.iter().cloned());
    body.push(step);
    let bound: Vec<String> = ctx
        .system
        .controls()
        .iter()
        .cloned()
        .chain(h_next.fresh_names())
        .collect();
    let claim = h
        .clone()
        .ge(SmtTerm::zero())
        .implies(SmtTerm::exists(bound, SmtTerm::and(body)));

    Ok(Condition::new(
        ConditionKind::Lie,
        ctx.system.vars().to_vec(),
        domain,
        record.map(|_| claim),
    ))
}

/// Over `x ∈ X_D, u ∈ U, z ∈ Z` with `h(x) ≥ 0`:
/// `h(x⁺) − σ − h + α·h ≥ 0 ⇒ h(x⁺ + Δ(x, z)) − h + α·h ≥ 0`.
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
        .zip(ctx.sigma_at(x)?)
        .zip(ctx.h_at(&nominal, "h_nom")?)
        .zip(ctx.h_at(&disturbed, "h_dist")?);
    let (((h, sigma), h_nom), h_dist) = &record.value;
    let premise = SmtTerm::and(vec![
        h.clone().ge(SmtTerm::zero()),
        forward_difference(ctx, h_nom.clone(), h)
            .sub(sigma.clone())
            .ge(SmtTerm::zero()),
    ]);
    let conclusion = forward_difference(ctx, h_dist.clone(), h).ge(SmtTerm::zero());

    Ok(Condition::new(
        ConditionKind::Robust,
        vars,
        domain,
        record.map(|_| premise.implies(conclusion)),
    ))
}

/// `h_next − h + α·h`.
fn forward_difference(ctx: &Context<'_>, h_next: SmtTerm, h: &SmtTerm) -> SmtTerm {
    h_next
        .sub(h.clone())
        .add(ctx.alpha().mul(h.clone()))
}

#[cfg(test)]
mod tests {
    use crate::translator::{make_translator, ConditionKind, TranslatorConfig};
    use bastion_core::consts::{CertificateType, TimeDomain, VerifierType};
    use bastion_core::models::{ConstantModel, Mlp, TrainableModel};
    use bastion_core::systems::{add_uncertainty, make_system};
    use bastion_core::ActivationType;
    use bastion_smt::terms::SmtTerm;

    fn first_coordinate() -> Mlp {
        let mut h = Mlp::zeros(2, &[2], &[ActivationType::Linear]).unwrap();
        h.set_parameters(&[1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
            .unwrap();
        h
    }

    #[test]
    fn next_state_value_is_bound_by_the_existential() {
        let system = make_system("SingleIntegratorDT").unwrap();
        let t = make_translator(
            CertificateType::Cbf,
            VerifierType::Z3,
            TimeDomain::Discrete,
            TranslatorConfig::default(),
        )
        .unwrap();
        let conditions = t.translate(&first_coordinate(), None, &system).unwrap();
        let lie = conditions.get(ConditionKind::Lie).unwrap();
        let SmtTerm::Implies(_, rhs) = &lie.claim else {
            panic!("expected an implication, got {:?}", lie.claim);
        };
        let SmtTerm::Exists(bound, _) = rhs.as_ref() else {
            panic!("expected an existential, got {rhs:?}");
        };
        let names: Vec<&str> = bound.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["u0", "u1"]);
        assert_eq!(lie.declarations().len(), 2);
    }

    #[test]
    fn compensator_relaxes_the_robust_premise() {
        let system = add_uncertainty(
            Some("AdditiveBounded"),
            make_system("SingleIntegratorDT").unwrap(),
        )
        .unwrap();
        let t = make_translator(
            CertificateType::Rcbf,
            VerifierType::Z3,
            TimeDomain::Discrete,
            TranslatorConfig::default(),
        )
        .unwrap();
        let h = first_coordinate();
        // x = (1, 0), u = (1, 0), z = (-0.5, 0): the nominal step gains 0.1,
        // the disturbed one loses 0.4.
        let point = [1.0, 0.0, 1.0, 0.0, -0.5, 0.0];

        let no_margin = ConstantModel::new(2, 0.0);
        let conditions = t.translate(&h, Some(&no_margin), system.as_ref()).unwrap();
        let robust = conditions.get(ConditionKind::Robust).unwrap();
        assert!(!robust.holds_at(&point).unwrap());

        let margin = ConstantModel::new(2, 0.6);
        let conditions = t.translate(&h, Some(&margin), system.as_ref()).unwrap();
        let robust = conditions.get(ConditionKind::Robust).unwrap();
        assert!(robust.holds_at(&point).unwrap());
        assert!(robust.holds_at(&[1.0, 0.0, 5.0, 0.0, -0.5, 0.0]).unwrap());
    }
}
