//! SMT-LIB2 solver running as a child process (z3 or cvc5).

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;
use tracing::debug;

use crate::backends::smtlib_printer::{sort_to_smtlib, to_smtlib};
use crate::backends::values::{parens_balanced, parse_get_value_response};
use crate::solver::{Model, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum ProcessSolverError {
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver not found: {0}")]
    NotFound(String),
    #[error("solver error: {0}")]
    SolverError(String),
    #[error("Failed to parse solver output: {0}")]
    ParseError(String),
}

/// How to launch and configure an SMT-LIB2 speaking solver.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSolverConfig {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Commands replayed after start-up and after every `(reset)`.
    pub preamble: Vec<String>,
}

impl ProcessSolverConfig {
    /// z3 reading SMT-LIB2 from stdin. Irrational model values are printed
    /// as truncated decimals so they can be parsed back.
    pub fn z3(timeout_secs: u64) -> Self {
        let mut preamble = vec![
            "(set-option :print-success false)".to_string(),
            "(set-option :produce-models true)".to_string(),
            "(set-option :pp.decimal true)".to_string(),
            "(set-option :pp.decimal_precision 17)".to_string(),
        ];
        if timeout_secs > 0 {
            preamble.push(format!(
                "(set-option :timeout {})",
                timeout_secs.saturating_mul(1000)
            ));
        }
        Self {
            name: "z3".into(),
            program: "z3".into(),
            args: vec!["-in".into(), "-smt2".into()],
            preamble,
        }
    }

    /// cvc5 in incremental mode. Quantified Lie conditions need the `ALL` logic.
    pub fn cvc5(timeout_secs: u64) -> Self {
        let mut args = vec![
            "--lang".to_string(),
            "smt2".to_string(),
            "--incremental".to_string(),
            "--produce-models".to_string(),
        ];
        if timeout_secs > 0 {
            args.push(format!("--tlimit-per={}", timeout_secs.saturating_mul(1000)));
        }
        Self {
            name: "cvc5".into(),
            program: "cvc5".into(),
            args,
            preamble: vec!["(set-logic ALL)".to_string()],
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

pub struct ProcessSolver {
    config: ProcessSolverConfig,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
    vars: HashMap<String, SmtSort>,
}

impl ProcessSolver {
    pub fn spawn(config: ProcessSolverConfig) -> Result<Self, ProcessSolverError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessSolverError::NotFound(format!("{}: {e}", config.program)))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ProcessSolverError::SolverError("failed to capture solver stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessSolverError::SolverError("failed to capture solver stdout".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ProcessSolverError::SolverError("failed to capture solver stderr".into())
        })?;

        let mut solver = Self {
            config,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
            vars: HashMap::new(),
        };
        solver.send_preamble()?;
        Ok(solver)
    }

    pub fn z3(timeout_secs: u64) -> Result<Self, ProcessSolverError> {
        Self::spawn(ProcessSolverConfig::z3(timeout_secs))
    }

    pub fn cvc5(timeout_secs: u64) -> Result<Self, ProcessSolverError> {
        Self::spawn(ProcessSolverConfig::cvc5(timeout_secs))
    }

    fn send_preamble(&mut self) -> Result<(), ProcessSolverError> {
        for cmd in self.config.preamble.clone() {
            self.send_command_no_response(&cmd)?;
        }
        Ok(())
    }

    /// Send a command and read one complete s-expression (or atom) back.
    fn send_command(&mut self, cmd: &str) -> Result<String, ProcessSolverError> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;

        let mut response = String::new();
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line)?;
            if read == 0 {
                let mut stderr = String::new();
                let _ = self.stderr.read_line(&mut stderr);
                return Err(ProcessSolverError::SolverError(format!(
                    "No response from {} for command `{cmd}`. stderr: {}",
                    self.config.name,
                    stderr.trim()
                )));
            }
            if response.is_empty() && line.trim().is_empty() {
                continue;
            }
            response.push_str(&line);
            if parens_balanced(&response) {
                break;
            }
        }
        let response = response.trim().to_string();
        if response.starts_with("(error") {
            return Err(ProcessSolverError::SolverError(response));
        }
        Ok(response)
    }

    fn send_command_no_response(&mut self, cmd: &str) -> Result<(), ProcessSolverError> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn parse_sat(&self, response: &str) -> Result<SatResult, ProcessSolverError> {
        match response {
            "sat" => Ok(SatResult::Sat),
            "unsat" => Ok(SatResult::Unsat),
            "unknown" => Ok(SatResult::Unknown(format!(
                "{} returned unknown",
                self.config.name
            ))),
            "timeout" => Ok(SatResult::Unknown(format!("{} timed out", self.config.name))),
            other => Err(ProcessSolverError::SolverError(other.to_string())),
        }
    }
}

impl Drop for ProcessSolver {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl SmtSolver for ProcessSolver {
    type Error = ProcessSolverError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), ProcessSolverError> {
        let sort_str = sort_to_smtlib(sort);
        self.send_command_no_response(&format!("(declare-const {name} {sort_str})"))?;
        self.vars.insert(name.to_string(), *sort);
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), ProcessSolverError> {
        let smt_str = to_smtlib(term);
        self.send_command_no_response(&format!("(assert {smt_str})"))?;
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, ProcessSolverError> {
        let response = self.send_command("(check-sat)")?;
        self.parse_sat(&response)
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), ProcessSolverError> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }

        let mut values = BTreeMap::new();
        for &(name, sort) in var_names {
            let response = self.send_command(&format!("(get-value ({name}))"))?;
            match parse_get_value_response(&response, name, sort) {
                Some(val) => {
                    values.insert(name.to_string(), val);
                }
                None => debug!(solver = %self.config.name, %name, %response, "unparsed model value"),
            }
        }

        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), ProcessSolverError> {
        self.send_command_no_response("(reset)")?;
        // `(reset)` drops options and logic; replay them.
        self.send_preamble()?;
        self.vars.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z3_config_sets_timeout_in_milliseconds() {
        let cfg = ProcessSolverConfig::z3(3);
        assert_eq!(cfg.program, "z3");
        assert!(cfg
            .preamble
            .contains(&"(set-option :timeout 3000)".to_string()));
        assert!(!ProcessSolverConfig::z3(0)
            .preamble
            .iter()
            .any(|c| c.contains(":timeout")));
    }

    #[test]
    fn cvc5_config_uses_per_query_limit_and_all_logic() {
        let cfg = ProcessSolverConfig::cvc5(2);
        assert!(cfg.args.contains(&"--tlimit-per=2000".to_string()));
        assert_eq!(cfg.preamble, vec!["(set-logic ALL)".to_string()]);
    }

    #[test]
    fn missing_binary_reports_not_found() {
        let cfg = ProcessSolverConfig::z3(0).with_program("definitely-not-a-solver-binary");
        match ProcessSolver::spawn(cfg) {
            Err(ProcessSolverError::NotFound(msg)) => {
                assert!(msg.contains("definitely-not-a-solver-binary"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawning a missing binary should fail"),
        }
    }
}
