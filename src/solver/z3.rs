//! Solver backend driving a `z3` process over SMT-LIB 2.
//!
//! A fresh process is spawned per query; on a SAT answer the process stays
//! alive inside the returned [`Model`] so that values, including array
//! bytes, can be fetched on demand with `(get-value …)`.

use super::sexp::Sexp;
use super::translate::{bv_literal, symbol_atom, SmtSort, Translator};
use super::{Model, ModelResult, ModelValue, Solver, SolverError};
use crate::assertion::{Assertion, AssertionList};
use crate::ir::Symbol;
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

pub struct Z3Process {
    path: String,
    timeout: Option<Duration>,
}

impl Z3Process {
    pub fn new() -> Z3Process {
        Z3Process {
            path: "z3".into(),
            timeout: None,
        }
    }

    /// Soft per-query timeout; the solver answers `unknown` when it fires.
    pub fn with_timeout(timeout: Duration) -> Z3Process {
        Z3Process {
            path: "z3".into(),
            timeout: Some(timeout),
        }
    }

    /// Whether a `z3` binary is reachable on the current system.
    pub fn is_available() -> bool {
        Command::new("z3")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for Z3Process {
    fn default() -> Z3Process {
        Z3Process::new()
    }
}

impl Solver for Z3Process {
    fn name(&self) -> &'static str {
        "Z3"
    }

    fn resolve(
        &self,
        assertions: &mut AssertionList,
        extra: &Assertion,
    ) -> Result<ModelResult, SolverError> {
        if extra.is_constant_value(false) {
            return Ok(ModelResult::Unsat);
        }

        let mut translator = Translator::new();
        for assertion in assertions.iter() {
            let term = assertion.value().expect("iterated assertions are non-empty");
            translator.assert(term);
        }
        if !extra.is_constant_value(true) {
            translator.assert(extra.value().expect("non-trivial assertion has a term"));
        }
        let (commands, symbols) = translator.into_parts();

        time_debug!("finished solving query", {
            let mut proc = SmtProc::spawn(&self.path, self.timeout)?;
            proc.send_raw("(set-option :produce-models true)")?;
            for command in &commands {
                proc.send(command)?;
            }
            let answer = proc.check_sat()?;
            trace!("z3 answered {}", answer);

            match answer.as_str() {
                "sat" => {
                    if extra.is_constant_value(true) {
                        assertions.mark_proven();
                    }
                    Ok(ModelResult::Sat(Box::new(Z3Model {
                        proc: RefCell::new(proc),
                        symbols,
                    })))
                }
                "unsat" => Ok(ModelResult::Unsat),
                "unknown" | "timeout" => Ok(ModelResult::Unknown),
                other => Err(SolverError::Malformed(format!(
                    "unexpected check-sat answer {:?}",
                    other
                ))),
            }
        })
    }
}

struct SmtProc {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SmtProc {
    fn spawn(path: &str, timeout: Option<Duration>) -> Result<SmtProc, SolverError> {
        let mut command = Command::new(path);
        command.arg("-smt2").arg("-in");
        if let Some(timeout) = timeout {
            command.arg(format!("-t:{}", timeout.as_millis()));
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SolverError::Spawn(format!("{}: {}", path, e)))?;
        let stdin = child.stdin.take().expect("configured as piped");
        let stdout = BufReader::new(child.stdout.take().expect("configured as piped"));
        debug!("spawned solver process {}", path);
        Ok(SmtProc {
            child,
            stdin,
            stdout,
        })
    }

    fn send(&mut self, command: &Sexp) -> Result<(), SolverError> {
        writeln!(self.stdin, "{}", command)?;
        Ok(())
    }

    fn send_raw(&mut self, command: &str) -> Result<(), SolverError> {
        writeln!(self.stdin, "{}", command)?;
        Ok(())
    }

    fn check_sat(&mut self) -> Result<String, SolverError> {
        self.send_raw("(check-sat)")?;
        self.stdin.flush()?;
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(SolverError::Malformed("solver closed the pipe".into()));
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    /// Issues `(get-value (expr))` and returns the bound value.
    fn get_value(&mut self, expr: &Sexp) -> Result<Sexp, SolverError> {
        writeln!(self.stdin, "(get-value ({}))", expr)?;
        self.stdin.flush()?;
        let response = self.read_sexp()?;
        if let Some(items) = response.as_list() {
            if items.first().and_then(Sexp::as_atom) == Some("error") {
                return Err(SolverError::Malformed(response.to_string()));
            }
            if let Some(pair) = items.first().and_then(Sexp::as_list) {
                if let Some(value) = pair.last() {
                    return Ok(value.clone());
                }
            }
        }
        Err(SolverError::Malformed(format!(
            "unexpected get-value response: {}",
            response
        )))
    }

    /// Reads one complete parenthesized response, which may span lines.
    fn read_sexp(&mut self) -> Result<Sexp, SolverError> {
        let mut buffer = String::new();
        let mut depth: i64 = 0;
        let mut seen_open = false;
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(SolverError::Malformed("solver closed the pipe".into()));
            }
            let mut quote: Option<char> = None;
            for c in line.chars() {
                match quote {
                    Some(q) => {
                        if c == q {
                            quote = None;
                        }
                    }
                    None => match c {
                        '|' | '"' => quote = Some(c),
                        '(' => {
                            depth += 1;
                            seen_open = true;
                        }
                        ')' => depth -= 1,
                        _ => {}
                    },
                }
            }
            buffer.push_str(&line);
            if seen_open && depth <= 0 {
                break;
            }
            if !seen_open && !buffer.trim().is_empty() {
                break;
            }
        }
        Sexp::parse(buffer.trim()).map_err(SolverError::Malformed)
    }
}

impl Drop for SmtProc {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Z3Model {
    proc: RefCell<SmtProc>,
    symbols: HashMap<Symbol, SmtSort>,
}

impl Model for Z3Model {
    fn lookup(&self, symbol: &Symbol, size: Option<usize>) -> Option<ModelValue> {
        let sort = self.symbols.get(symbol)?.clone();
        let mut proc = self.proc.borrow_mut();
        match sort {
            SmtSort::Bool => {
                let value = proc.get_value(&symbol_atom(symbol)).ok()?;
                match value.as_atom()? {
                    "true" => Some(ModelValue::Int { value: 1, width: 1 }),
                    "false" => Some(ModelValue::Int { value: 0, width: 1 }),
                    _ => None,
                }
            }
            SmtSort::BitVec(width) => {
                let value = proc.get_value(&symbol_atom(symbol)).ok()?;
                let (value, _) = parse_bv_value(&value)?;
                Some(ModelValue::Int { value, width })
            }
            SmtSort::Float { exp, sig } => {
                let value = proc.get_value(&symbol_atom(symbol)).ok()?;
                let bits = parse_float_value(&value, exp, sig)?;
                Some(ModelValue::Float { bits, exp, sig })
            }
            SmtSort::Array { index_width } => {
                let size = size.expect("array model lookup requires a size");
                let mut bytes = Vec::with_capacity(size);
                for i in 0..size {
                    let select = Sexp::app(
                        "select",
                        vec![symbol_atom(symbol), bv_literal(i as u128, index_width)],
                    );
                    let value = proc.get_value(&select).ok()?;
                    let (byte, _) = parse_bv_value(&value)?;
                    bytes.push(byte as u8);
                }
                Some(ModelValue::Bytes(bytes))
            }
        }
    }
}

/// Decodes a bit-vector numeral in any of the `#x…`, `#b…` or
/// `(_ bvN w)` shapes.
pub(crate) fn parse_bv_value(sexp: &Sexp) -> Option<(u128, u32)> {
    match sexp {
        Sexp::Atom(atom) => {
            if let Some(hex) = atom.strip_prefix("#x") {
                let value = u128::from_str_radix(hex, 16).ok()?;
                Some((value, (hex.len() * 4) as u32))
            } else if let Some(bin) = atom.strip_prefix("#b") {
                let value = u128::from_str_radix(bin, 2).ok()?;
                Some((value, bin.len() as u32))
            } else {
                None
            }
        }
        Sexp::List(items) => match items.as_slice() {
            [head, num, width] if head.as_atom() == Some("_") => {
                let digits = num.as_atom()?.strip_prefix("bv")?;
                let value = digits.parse::<u128>().ok()?;
                let width = width.as_atom()?.parse::<u32>().ok()?;
                Some((value, width))
            }
            _ => None,
        },
    }
}

/// Decodes an FPA value into raw IEEE bits.
///
/// NaN reconstruction fixes the exponent to all ones and the fraction to a
/// non-zero value; the sign of a NaN is not recoverable from the solver and
/// is forced to 0.
pub(crate) fn parse_float_value(sexp: &Sexp, exp: u32, sig: u32) -> Option<u64> {
    let frac_bits = sig - 1;
    let exp_all_ones = (1u64 << exp) - 1;
    let items = sexp.as_list()?;
    match items {
        [head, sign, exponent, fraction] if head.as_atom() == Some("fp") => {
            let (sign, _) = parse_bv_value(sign)?;
            let (exponent, _) = parse_bv_value(exponent)?;
            let (fraction, _) = parse_bv_value(fraction)?;
            Some(((sign as u64) << (exp + frac_bits)) | ((exponent as u64) << frac_bits) | fraction as u64)
        }
        [head, kind, ..] if head.as_atom() == Some("_") => match kind.as_atom()? {
            "NaN" => Some((exp_all_ones << frac_bits) | 1),
            "+oo" => Some(exp_all_ones << frac_bits),
            "-oo" => Some((1u64 << (exp + frac_bits)) | (exp_all_ones << frac_bits)),
            "+zero" => Some(0),
            "-zero" => Some(1u64 << (exp + frac_bits)),
            _ => None,
        },
        _ => None,
    }
}
