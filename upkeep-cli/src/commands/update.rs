//! `upkeep update`: analyse, confirm, back up, apply, validate.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use upkeep_core::{RiskLevel, UpdateAction};
use upkeep_engine::{
    AppliedAction, ConsentAction, ConsentPolicy, ConsentProvider, FileUpdateDecision,
    UpdateAnalysis, UpdateEngine, UpdateError, UpdateOptions, UpdateResult, UpdateState,
};

/// Arguments for `upkeep update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Show what would change, with diffs, without touching any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Apply every change without prompting.
    #[arg(long)]
    pub force: bool,

    /// Only update agent files.
    #[arg(long, conflicts_with = "hooks_only")]
    pub agents_only: bool,

    /// Only update hook files.
    #[arg(long)]
    pub hooks_only: bool,

    /// Store the pre-update backup here instead of the configured root.
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Workspace to update (default: current directory).
    #[arg(long)]
    pub project_path: Option<PathBuf>,

    /// Emit the full result as JSON.
    #[arg(long)]
    pub json: bool,
}

impl UpdateArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = super::load_env()?;
        let project = super::project_root(self.project_path.clone())?;
        let mut engine = UpdateEngine::from_config(&config, &home, &project);
        if let Some(dir) = self.backup_dir.clone() {
            engine = engine.with_backup_dir(dir);
        }

        let options = UpdateOptions {
            dry_run: self.dry_run,
            force: self.force,
            agents_only: self.agents_only,
            hooks_only: self.hooks_only,
        };
        let stdin = std::io::stdin();
        let mut prompt = PromptConsent::new(stdin.lock(), std::io::stdout());
        let result = engine
            .execute_update(options, &mut prompt)
            .context("update failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("failed to serialize update result")?
            );
        } else {
            print_result(&result);
        }
        if !result.success {
            bail!("update finished with errors");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Interactive consent
// ---------------------------------------------------------------------------

/// Asks on `output` and reads answers line by line from `input`.
/// End of input cancels.
pub struct PromptConsent<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptConsent<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> Result<Option<String>, UpdateError> {
        write!(self.output, "{question} ").map_err(consent_io)?;
        self.output.flush().map_err(consent_io)?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).map_err(consent_io)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_ascii_lowercase()))
    }

    fn review(&mut self, analysis: &UpdateAnalysis) -> Result<ConsentPolicy, UpdateError> {
        let mut policy = ConsentPolicy::auto();
        for decision in analysis.decisions() {
            let action = if decision.action == UpdateAction::Delete {
                let q = format!("  delete {}? [y/N]", decision.file_path);
                match self.ask(&q)?.as_deref() {
                    None => return Ok(ConsentPolicy::cancelled()),
                    Some("y") | Some("yes") => ConsentAction::Update,
                    Some(_) => ConsentAction::Skip,
                }
            } else {
                let q = format!(
                    "  {} {}: [a]uto / [u]pdate / [m]erge / [s]kip",
                    decision.action, decision.file_path
                );
                match self.ask(&q)?.as_deref() {
                    None => return Ok(ConsentPolicy::cancelled()),
                    Some("u") | Some("update") => ConsentAction::Update,
                    Some("m") | Some("merge") => ConsentAction::SmartMerge,
                    Some("s") | Some("skip") => ConsentAction::Skip,
                    Some(_) => ConsentAction::Auto,
                }
            };
            policy = policy.with_file(decision.file_path.clone(), action);
        }
        Ok(policy)
    }
}

impl<R: BufRead, W: Write> ConsentProvider for PromptConsent<R, W> {
    fn gather(&mut self, analysis: &UpdateAnalysis) -> Result<ConsentPolicy, UpdateError> {
        write_analysis(&mut self.output, analysis).map_err(consent_io)?;
        if analysis.update_categories.is_empty() {
            return Ok(ConsentPolicy::auto());
        }
        match self.ask("Proceed? [y]es / [N]o / [r]eview each file")?.as_deref() {
            Some("y") | Some("yes") => Ok(ConsentPolicy::auto()),
            Some("r") | Some("review") => self.review(analysis),
            _ => Ok(ConsentPolicy::cancelled()),
        }
    }
}

fn consent_io(e: std::io::Error) -> UpdateError {
    UpdateError::Consent(e.to_string())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn write_analysis(out: &mut impl Write, analysis: &UpdateAnalysis) -> std::io::Result<()> {
    writeln!(
        out,
        "{} {} -> {}",
        "Update available:".bold(),
        analysis.current_version.as_deref().unwrap_or("none"),
        analysis.latest_version.green()
    )?;
    for decision in analysis.decisions() {
        writeln!(out, "{}", decision_line(decision))?;
    }
    for risk in &analysis.risks {
        writeln!(out, "{} {}", risk_label(risk.level), risk.description)?;
    }
    for rec in &analysis.recommendations {
        writeln!(out, "  → {rec}")?;
    }
    Ok(())
}

fn decision_line(d: &FileUpdateDecision) -> String {
    let marker = match d.action {
        UpdateAction::Create => "+".green(),
        UpdateAction::Update => "~".yellow(),
        UpdateAction::Delete => "-".red(),
        UpdateAction::Skip => "·".bright_black(),
    };
    format!(
        "  {marker} {:<6} {} ({})",
        d.action.to_string(),
        d.file_path,
        risk_label(d.risk)
    )
}

fn risk_label(level: RiskLevel) -> String {
    match level {
        RiskLevel::Low => "low".green().to_string(),
        RiskLevel::Medium => "medium".yellow().to_string(),
        RiskLevel::High => "HIGH".red().bold().to_string(),
    }
}

fn print_result(result: &UpdateResult) {
    match result.state {
        UpdateState::Completed if !result.analysis.has_updates => {
            println!("✓ already up to date ({})", result.analysis.latest_version);
            return;
        }
        UpdateState::Cancelled => {
            println!("Update cancelled; nothing was changed.");
            return;
        }
        _ => {}
    }

    if result.dry_run {
        let mut stdout = std::io::stdout();
        let _ = write_analysis(&mut stdout, &result.analysis);
        println!("[dry-run] {} files would change", result.previews.len());
        for preview in &result.previews {
            for line in preview.unified_diff.lines() {
                if line.starts_with("+++") || line.starts_with("---") {
                    println!("{}", line.bold());
                } else if line.starts_with('+') {
                    println!("{}", line.green());
                } else if line.starts_with('-') {
                    println!("{}", line.red());
                } else if line.starts_with("@@") {
                    println!("{}", line.cyan());
                } else {
                    println!("{line}");
                }
            }
        }
        return;
    }

    let mark = if result.success {
        "✓".green()
    } else {
        "✗".red()
    };
    println!(
        "{mark} {} -> {}: {} updated, {} preserved",
        result.analysis.current_version.as_deref().unwrap_or("none"),
        result.analysis.latest_version,
        result.files_updated,
        result.files_preserved
    );
    for outcome in &result.results.updates {
        let symbol = match (outcome.success, outcome.action) {
            (false, _) => "✗".red(),
            (true, AppliedAction::Created) => "+".green(),
            (true, AppliedAction::Updated) => "✎".normal(),
            (true, AppliedAction::Merged) => "⇄".cyan(),
            (true, AppliedAction::Deleted) => "-".red(),
            (true, AppliedAction::Skipped | AppliedAction::Preserved) => "·".bright_black(),
        };
        let detail = outcome
            .error
            .as_deref()
            .or(outcome.result.as_deref())
            .unwrap_or_default();
        println!("  {symbol}  {}  {}", outcome.file_path, detail.bright_black());
    }
    for path in &result.conflicts {
        println!("  {} custom blocks appended in {path}", "conflict:".yellow());
    }
    if let Some(validation) = &result.validation {
        for w in &validation.warnings {
            println!("  {} {w}", "warning:".yellow());
        }
        for e in &validation.errors {
            println!("  {} {e}", "error:".red());
        }
        for c in &validation.critical {
            println!("  {} {c}", "critical:".red().bold());
        }
    }
    if let Some(id) = &result.backup_id {
        println!("Backup: {id}");
    }
    for rec in &result.recommendations {
        println!("  → {rec}");
    }
}
