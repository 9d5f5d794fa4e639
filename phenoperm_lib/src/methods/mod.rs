pub mod analysis;
pub mod de;
pub mod fdr;
pub mod gsea;
pub mod null_distribution;
pub mod rank;
pub mod saturation;
pub mod shuffle;
pub mod trials;

use std::path::Path;
use std::process::{Command, Stdio};

/// `{name}` placeholders substituted into external command arguments.
#[derive(Debug, Default, Clone)]
pub struct TemplateVars {
    vars: Vec<(&'static str, String)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: String) -> Self {
        self.vars.push((name, value));
        self
    }

    pub fn fill(&self, args: &[String]) -> Vec<String> {
        args.iter()
            .map(|arg| {
                let mut filled = arg.clone();
                for (name, value) in &self.vars {
                    filled = filled.replace(&format!("{{{}}}", name), value);
                }
                filled
            })
            .collect()
    }
}

/// Run an external program to completion. The error string carries the exit
/// status and the last non-empty stderr line.
pub(crate) fn run_external(program: &Path, args: &[String]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("could not start {}: {}", program.display(), e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no stderr output");
        return Err(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            last_line
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_placeholder() {
        let vars = TemplateVars::new()
            .with("rnk", "/tmp/a.rnk".to_string())
            .with("seed", "12".to_string());
        let args = vec!["-rnk".to_string(), "{rnk}".to_string(), "seed={seed}".to_string()];
        assert_eq!(vars.fill(&args), vec!["-rnk", "/tmp/a.rnk", "seed=12"]);
    }
}
