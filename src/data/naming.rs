//! Output file naming.
//!
//! File names come from `strfmt` templates such as
//! `"{proposal}_{year}{month}{day}_{counter}"`. Available variables:
//!
//! | name | example |
//! |---|---|
//! | `proposal` | `p1234` |
//! | `year`, `month`, `day` | `2026`, `10`, `15` |
//! | `hour`, `minute`, `second` | `09`, `05`, `00` |
//! | `counter` | `0042` |
//!
//! A template that renders without an extension gets the backend's one.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use strfmt::strfmt;

/// Concrete files for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFiles {
    /// Display name, the file name of the first path.
    pub short_name: String,
    pub paths: Vec<PathBuf>,
}

/// Assigns scan counters and turns templates into paths.
pub trait FileNamer: Send + Sync {
    /// Next counter value. Monotonic for the lifetime of the namer.
    fn assign_counter(&self) -> u64;

    /// One path per template, in template order.
    fn filenames(
        &self,
        counter: u64,
        templates: &[String],
        subdir: &str,
        extension: &str,
    ) -> Result<NamedFiles>;
}

/// [`FileNamer`] rooted at a data directory.
#[derive(Debug)]
pub struct TemplateNamer {
    root: PathBuf,
    proposal: String,
    counter: AtomicU64,
}

impl TemplateNamer {
    /// `first_counter` is the value handed out by the first
    /// [`assign_counter`](FileNamer::assign_counter) call.
    pub fn new(root: impl Into<PathBuf>, proposal: &str, first_counter: u64) -> Self {
        Self {
            root: root.into(),
            proposal: proposal.to_string(),
            counter: AtomicU64::new(first_counter),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// [`FileNamer::filenames`] against an explicit local time.
    pub fn filenames_at(
        &self,
        counter: u64,
        templates: &[String],
        subdir: &str,
        extension: &str,
        now: DateTime<Local>,
    ) -> Result<NamedFiles> {
        if templates.is_empty() {
            bail!("No file name templates configured");
        }

        let mut vars = HashMap::new();
        vars.insert("proposal".to_string(), self.proposal.clone());
        vars.insert("year".to_string(), format!("{:04}", now.year()));
        vars.insert("month".to_string(), format!("{:02}", now.month()));
        vars.insert("day".to_string(), format!("{:02}", now.day()));
        vars.insert("hour".to_string(), format!("{:02}", now.hour()));
        vars.insert("minute".to_string(), format!("{:02}", now.minute()));
        vars.insert("second".to_string(), format!("{:02}", now.second()));
        vars.insert("counter".to_string(), format!("{counter:04}"));

        let dir = if subdir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(subdir)
        };

        let mut paths = Vec::with_capacity(templates.len());
        for template in templates {
            let mut name = strfmt(template, &vars)
                .map_err(|e| anyhow!("Failed to render file name template '{template}': {e}"))?;
            if Path::new(&name).extension().is_none() {
                name = format!("{name}.{extension}");
            }
            paths.push(dir.join(name));
        }

        let short_name = paths
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(NamedFiles { short_name, paths })
    }
}

impl FileNamer for TemplateNamer {
    fn assign_counter(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    fn filenames(
        &self,
        counter: u64,
        templates: &[String],
        subdir: &str,
        extension: &str,
    ) -> Result<NamedFiles> {
        self.filenames_at(counter, templates, subdir, extension, Local::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap()
    }

    #[test]
    fn renders_every_variable() {
        let namer = TemplateNamer::new("/data", "p1234", 1);
        let files = namer
            .filenames_at(
                42,
                &["{proposal}_{year}{month}{day}T{hour}{minute}{second}_{counter}".to_string()],
                "",
                "nxs.json",
                at(),
            )
            .unwrap();
        assert_eq!(
            files.paths,
            vec![PathBuf::from("/data/p1234_20260307T090500_0042.nxs.json")]
        );
        assert_eq!(files.short_name, "p1234_20260307T090500_0042.nxs.json");
    }

    #[test]
    fn explicit_extension_and_subdir_are_kept() {
        let namer = TemplateNamer::new("/data", "p1", 1);
        let templates = vec!["{counter}.h5".to_string(), "copy_{counter}".to_string()];
        let files = namer
            .filenames_at(7, &templates, "nmr", "nxs", at())
            .unwrap();
        assert_eq!(
            files.paths,
            vec![
                PathBuf::from("/data/nmr/0007.h5"),
                PathBuf::from("/data/nmr/copy_0007.nxs"),
            ]
        );
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let namer = TemplateNamer::new("/data", "p1", 1);
        let err = namer
            .filenames_at(1, &["{sample}".to_string()], "", "nxs", at())
            .unwrap_err();
        assert!(err.to_string().contains("{sample}"));
    }

    #[test]
    fn counter_is_monotonic() {
        let namer = TemplateNamer::new("/data", "p1", 5);
        assert_eq!(namer.assign_counter(), 5);
        assert_eq!(namer.assign_counter(), 6);
        assert_eq!(namer.assign_counter(), 7);
    }
}
