use std::path::PathBuf;

use clap::Args;
use futures_util::StreamExt;
use upkeep_core::{PipelineProgress, StoreInstallation, UpdateProgress, UpdaterContext};

use crate::error::AppError;

#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Store file describing one or more installations.
    #[arg(long = "store")]
    pub stores: Vec<PathBuf>,
    /// Directory whose `*.json` files are all store files.
    #[arg(long = "store-dir")]
    pub store_dirs: Vec<PathBuf>,
}

impl StoreArgs {
    /// Explicit store files first, then the JSON files of each store
    /// directory in name order.
    pub fn store_files(&self) -> Result<Vec<PathBuf>, AppError> {
        let mut files = self.stores.clone();
        for dir in &self.store_dirs {
            let entries = std::fs::read_dir(dir)
                .map_err(|error| AppError::io("failed to list store directory", dir, error))?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
                })
                .collect();
            found.sort();
            files.extend(found);
        }

        if files.is_empty() {
            return Err(AppError::NoStores);
        }
        Ok(files)
    }
}

/// Installations of every store file that loaded, plus the number of store
/// files that did not.
fn load_installations(files: &[PathBuf], ctx: &UpdaterContext) -> (Vec<StoreInstallation>, usize) {
    let mut installations = Vec::new();
    let mut failed = 0;
    for file in files {
        match StoreInstallation::load_all(file, ctx.clone()) {
            Ok(loaded) => installations.extend(loaded),
            Err(error) => {
                log::error!("Skipping store {}: {error}", file.display());
                failed += 1;
            }
        }
    }
    (installations, failed)
}

fn report_incompatibilities(installation: &StoreInstallation) {
    let Ok(problems) = installation.check_for_incompatibilities() else {
        return;
    };
    for problem in problems {
        log::warn!(
            "{}: {} requires {} ({})",
            installation.name(),
            problem.manifest.id,
            problem.relationship.id,
            problem.level
        );
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub updates: usize,
    pub failed_stores: usize,
}

pub async fn check(files: &[PathBuf], ctx: &UpdaterContext) -> CheckSummary {
    let (installations, failed_stores) = load_installations(files, ctx);
    let mut summary = CheckSummary {
        failed_stores,
        ..CheckSummary::default()
    };

    for mut installation in installations {
        if let Err(error) = installation.read_store_state().await {
            log::error!("{}: {error}", installation.name());
            summary.failed_stores += 1;
            continue;
        }
        report_incompatibilities(&installation);

        let updates = installation.manifests_to_update().unwrap_or_default();
        if updates.is_empty() {
            println!("{}: up to date", installation.name());
        }
        for (installed, available) in &updates {
            match installed {
                Some(installed) => println!(
                    "{}: {} {} -> {}",
                    installation.name(),
                    available.id,
                    installed.version,
                    available.version
                ),
                None => println!(
                    "{}: {} {} (new)",
                    installation.name(),
                    available.id,
                    available.version
                ),
            }
        }
        if installation.update_available() {
            summary.updates += updates.len();
        }
    }
    summary
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    pub done: usize,
    pub failed: usize,
    pub failed_stores: usize,
}

impl UpdateSummary {
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.failed_stores == 0
    }
}

pub async fn update(files: &[PathBuf], ctx: &UpdaterContext) -> UpdateSummary {
    let (installations, failed_stores) = load_installations(files, ctx);
    let mut summary = UpdateSummary {
        failed_stores,
        ..UpdateSummary::default()
    };

    for mut installation in installations {
        if let Err(error) = installation.read_store_state().await {
            log::error!("{}: {error}", installation.name());
            summary.failed_stores += 1;
            continue;
        }
        report_incompatibilities(&installation);

        let stream = match installation.update_all() {
            Ok(stream) => stream,
            Err(error) => {
                log::error!("{}: {error}", installation.name());
                summary.failed_stores += 1;
                continue;
            }
        };
        let mut stream = std::pin::pin!(stream);
        let mut printer = ProgressPrinter::default();
        while let Some((manifest, progress)) = stream.next().await {
            match &progress {
                UpdateProgress::Done => summary.done += 1,
                UpdateProgress::Failed(_) => summary.failed += 1,
                UpdateProgress::Step(_) => {}
            }
            if let Some(line) = printer.line(&manifest.id, &progress) {
                println!("{}: {line}", installation.name());
            }
        }
    }
    summary
}

/// Thins out progress so each step prints at most once per 10%.
#[derive(Default)]
struct ProgressPrinter {
    last: Option<(String, PipelineProgress)>,
}

impl ProgressPrinter {
    fn line(&mut self, id: &str, progress: &UpdateProgress) -> Option<String> {
        let line = format!("{id} {progress}");
        let UpdateProgress::Step(step) = progress else {
            self.last = None;
            return Some(line);
        };

        let bucket = |progress: &PipelineProgress| tenth(progress.fraction);
        let repeated = self.last.as_ref().is_some_and(|(last_id, last)| {
            last_id == id && last.step == step.step && bucket(last) == bucket(step)
        });
        if repeated {
            return None;
        }
        self.last = Some((id.to_string(), *step));
        Some(line)
    }
}

/// Completed tenths of `fraction`, `0` for anything below the first tenth
/// or not a number.
fn tenth(fraction: f32) -> u8 {
    (1..=10_u8)
        .rev()
        .find(|tenth| fraction >= f32::from(*tenth) / 10.0)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use upkeep_core::{PipelineProgress, UpdateProgress};

    use super::{ProgressPrinter, StoreArgs, tenth};
    use crate::error::AppError;

    #[test]
    fn store_files_lists_json_files_in_order() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        for name in ["b.json", "a.JSON", "notes.txt"] {
            std::fs::write(temp_dir.path().join(name), "{}").expect("file should be written");
        }
        let explicit = temp_dir.path().join("explicit.store");
        let args = StoreArgs {
            stores: vec![explicit.clone()],
            store_dirs: vec![temp_dir.path().to_path_buf()],
        };

        let files = args.store_files().expect("store files should be listed");

        assert_eq!(
            files,
            vec![
                explicit,
                temp_dir.path().join("a.JSON"),
                temp_dir.path().join("b.json"),
            ]
        );
    }

    #[test]
    fn store_files_requires_at_least_one() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let args = StoreArgs {
            stores: Vec::new(),
            store_dirs: vec![temp_dir.path().to_path_buf()],
        };

        assert!(matches!(args.store_files(), Err(AppError::NoStores)));
    }

    #[test]
    fn printer_skips_repeats_within_a_tenth() {
        let mut printer = ProgressPrinter::default();
        let step = |fraction| UpdateProgress::Step(PipelineProgress::download(fraction));

        assert!(printer.line("Forge", &step(0.01)).is_some());
        assert!(printer.line("Forge", &step(0.05)).is_none());
        assert!(printer.line("Forge", &step(0.12)).is_some());
        assert!(printer.line("Other", &step(0.12)).is_some());
        assert_eq!(
            printer.line("Forge", &UpdateProgress::Done).as_deref(),
            Some("Forge Done")
        );
    }

    #[test]
    fn tenth_stays_in_range_for_odd_fractions() {
        assert_eq!(tenth(0.0), 0);
        assert_eq!(tenth(0.099), 0);
        assert_eq!(tenth(0.1), 1);
        assert_eq!(tenth(0.55), 5);
        assert_eq!(tenth(1.0), 10);
        assert_eq!(tenth(7.5), 10);
        assert_eq!(tenth(-1.0), 0);
        assert_eq!(tenth(f32::NAN), 0);
    }
}
