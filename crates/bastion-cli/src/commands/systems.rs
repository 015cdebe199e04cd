use bastion_core::consts::DomainName;
use bastion_core::systems::{make_system, ControlAffineDynamics, SYSTEM_IDS, UNCERTAINTY_IDS};

use super::CliError;

/// One line per registered system: id, time domain, state and control
/// dimensions, and the domains it declares.
pub(crate) fn render_systems() -> Result<String, CliError> {
    let mut out = String::from("Systems:\n");
    for id in SYSTEM_IDS {
        let system = make_system(id)?;
        let domains: Vec<&str> = DomainName::ALL
            .into_iter()
            .filter(|d| system.domain(*d).is_some())
            .map(DomainName::as_str)
            .collect();
        out.push_str(&format!(
            "  {:<20} {:<10} n={} m={}  domains: {}\n",
            id,
            system.time_domain(),
            system.n_vars(),
            system.n_controls(),
            domains.join(", ")
        ));
    }
    out.push_str("Uncertainties:\n");
    for id in UNCERTAINTY_IDS {
        out.push_str(&format!("  {id}\n"));
    }
    Ok(out)
}

pub(crate) fn run_systems_command() -> Result<(), CliError> {
    print!("{}", render_systems()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_system_is_listed() {
        let text = render_systems().unwrap();
        for id in SYSTEM_IDS {
            assert!(text.contains(id), "{id} missing from:\n{text}");
        }
        assert!(text.contains("AdditiveBounded"));
        assert!(text.contains("discrete"));
    }
}
