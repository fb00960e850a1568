// Cosmos device app functional test harness
//
// Copyright (C) 2024 Alekos Filini
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use handlebars::Handlebars;

use super::model::TestLog;

pub const HB_TEMPLATE: &'static str = include_str!("../../report.hb");

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HtmlReport {
    None,
    OnlyFailing,
    All,
}

impl HtmlReport {
    pub fn should_render(&self, log: &TestLog) -> bool {
        match self {
            HtmlReport::None => false,
            HtmlReport::OnlyFailing => !log.result,
            HtmlReport::All => true,
        }
    }
}

pub fn render_report(to: &Path, log: &TestLog) -> Result<(), crate::Error> {
    let mut hb = Handlebars::new();
    hb.register_template_string("report", HB_TEMPLATE)?;

    let writer = File::create(to)?;
    hb.render_to_write("report", log, writer)?;

    log::info!("Rendered report to: {}", to.display());

    Ok(())
}

/// `REPORT_TMP_DIR` if set, otherwise a temp directory kept for the whole run
pub fn get_temp_dir() -> Result<PathBuf, crate::Error> {
    if let Ok(dir) = std::env::var("REPORT_TMP_DIR") {
        let path = PathBuf::from(&dir);
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }

        Ok(path)
    } else {
        // n.b. static items do not call [`Drop`] on program termination, but this is
        // actually good for us because it means the tempdir will be kept
        static TEMPDIR: OnceLock<tempdir::TempDir> = OnceLock::new();
        if TEMPDIR.get().is_none() {
            let _ = TEMPDIR.set(tempdir::TempDir::new("cosmos-func-tests")?);
        }
        let dir = TEMPDIR.get().ok_or("Temp directory unavailable")?;
        Ok(dir.path().to_path_buf())
    }
}

pub fn report_path(dir: &Path, log: &TestLog) -> PathBuf {
    dir.join(format!("{}-{}.html", log.model, log.scenario))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::model::{get_model, ModelKind};
    use crate::utils::snapshot::Snapshot;

    #[test]
    fn test_render_failing_step() {
        let dir = tempdir::TempDir::new("report").unwrap();
        let mut log = TestLog::new(get_model(ModelKind::Nanox), "show_address");
        let screen = Snapshot::new(2, 2, vec![0, 255, 255, 0]).with_texts(["Address"]);
        log.push("Capture", Some(0), &screen);
        log.push("Right", Some(1), &screen);
        log.fail(Some(Snapshot::new(2, 2, vec![0; 4])), "snapshot 1 differs");

        assert!(HtmlReport::OnlyFailing.should_render(&log));
        assert!(!HtmlReport::None.should_render(&log));

        let path = report_path(dir.path(), &log);
        render_report(&path, &log).unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("nanox"));
        assert!(html.contains("snapshot 1 differs"));
        assert!(html.contains("data:image/png;base64,"));
    }
}
