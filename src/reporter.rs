use bytesize::ByteSize;
use std::path::{Path, PathBuf};

use crate::audit::AuditLog;
use crate::events::Event;

/// Receives progress events from the orchestrator.
pub trait ProgressSink {
    fn record(&mut self, event: Event);
}

/// Collecting sink, handy for tests and embedding.
impl ProgressSink for Vec<Event> {
    fn record(&mut self, event: Event) {
        self.push(event);
    }
}

/// Reporter aggregates events and produces human or JSON output.
pub struct Reporter {
    json_mode: bool,
    quiet: bool,
    completed: usize,
    failed: usize,
    skipped: usize,
    bytes_moved: u64,
    failures: Vec<(PathBuf, String)>,
    cancelled: Option<usize>,
    audit: Option<AuditLog>,
    #[cfg(feature = "cli")]
    bar: Option<indicatif::ProgressBar>,
}

impl Reporter {
    pub fn new(json_mode: bool, quiet: bool) -> Self {
        Self {
            json_mode,
            quiet,
            completed: 0,
            failed: 0,
            skipped: 0,
            bytes_moved: 0,
            failures: Vec::new(),
            cancelled: None,
            audit: None,
            #[cfg(feature = "cli")]
            bar: None,
        }
    }

    /// Also write every event to `audit`.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn audit_path(&self) -> Option<&Path> {
        self.audit.as_ref().and_then(AuditLog::path)
    }

    fn line(&self, text: String) {
        if self.json_mode || self.quiet {
            return;
        }
        #[cfg(feature = "cli")]
        if let Some(bar) = &self.bar {
            bar.println(text);
            return;
        }
        println!("{text}");
    }

    #[cfg(feature = "cli")]
    fn start_bar(&mut self, pending: usize) {
        use indicatif::{ProgressBar, ProgressStyle};
        if self.json_mode || self.quiet || pending == 0 {
            return;
        }
        let bar = ProgressBar::new(pending as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        self.bar = Some(bar);
    }

    #[cfg(not(feature = "cli"))]
    fn start_bar(&mut self, _pending: usize) {}

    fn tick(&self) {
        #[cfg(feature = "cli")]
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn finish_bar(&mut self) {
        #[cfg(feature = "cli")]
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    /// Human-readable end-of-run summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} moved ({}), {} skipped, {} failed",
            self.completed,
            ByteSize::b(self.bytes_moved),
            self.skipped,
            self.failed
        );
        for (path, error) in &self.failures {
            out.push_str(&format!("\n  failed: {}: {}", path.display(), error));
        }
        if let Some(pending) = self.cancelled {
            out.push_str(&format!(
                "\nInterrupted with {pending} file(s) left; run `picsort resume` to continue."
            ));
        }
        if let Some(path) = self.audit_path() {
            out.push_str(&format!("\nLog: {}", path.display()));
        }
        out
    }

    /// Print the summary unless in JSON or quiet mode.
    pub fn print_summary(&self) {
        if !self.json_mode && !self.quiet {
            println!("{}", self.summary());
        }
    }
}

impl ProgressSink for Reporter {
    fn record(&mut self, event: Event) {
        if let Some(audit) = self.audit.as_mut() {
            audit.record(event.clone());
        }
        if self.json_mode
            && let Ok(line) = serde_json::to_string(&event)
        {
            println!("{line}");
        }

        match &event {
            Event::RunStarted {
                pending, dry_run, ..
            } => {
                if !*dry_run {
                    self.start_bar(*pending);
                }
            }
            Event::OpPlanned { .. } | Event::OpStarted { .. } => {}
            Event::OpCompleted { src, dst, bytes, .. } => {
                self.completed += 1;
                self.bytes_moved += bytes;
                self.tick();
                self.line(format!("Moved {} -> {}", file_name(src), tail(dst)));
            }
            Event::OpFailed { src, error, .. } => {
                self.failed += 1;
                self.failures.push((src.clone(), error.clone()));
                self.tick();
                self.line(format!("Failed {}: {}", file_name(src), error));
            }
            Event::OpSkipped {
                src, dst, reason, ..
            } => {
                self.skipped += 1;
                self.tick();
                match reason.as_deref() {
                    Some(crate::orchestrator::DRY_RUN_REASON) => {
                        self.line(format!("Would move {} -> {}", file_name(src), tail(dst)))
                    }
                    Some(reason) => self.line(format!("Skipped {}: {}", file_name(src), reason)),
                    None => self.line(format!("Skipped {}", file_name(src))),
                }
            }
            Event::RunCancelled { pending, .. } => {
                self.cancelled = Some(*pending);
                self.finish_bar();
            }
            Event::RunFinished { .. } => self.finish_bar(),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `.../08.2024/a.jpg` -> `08.2024/a.jpg`.
fn tail(path: &Path) -> String {
    match path.parent().and_then(Path::file_name) {
        Some(folder) => format!("{}/{}", folder.to_string_lossy(), file_name(path)),
        None => file_name(path),
    }
}
