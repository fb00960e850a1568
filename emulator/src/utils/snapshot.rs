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

use std::path::PathBuf;

use super::model::HardwareVariant;

/// A captured screen. Pixels are 8-bit grayscale, row-major.
///
/// `texts` holds the text events the device reported for the screen, they are
/// only used to look for keywords and never take part in comparisons.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
    pub texts: Vec<String>,
}

impl Snapshot {
    pub fn new(width: u16, height: u16, pixels: Vec<u8>) -> Self {
        Snapshot {
            width,
            height,
            pixels,
            texts: vec![],
        }
    }

    pub fn with_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.texts = texts.into_iter().map(Into::into).collect();
        self
    }

    /// Number of different pixels, `None` when the sizes don't match
    pub fn diff_pixels(&self, other: &Snapshot) -> Option<usize> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        if self.pixels.len() != other.pixels.len() {
            return None;
        }

        Some(
            self.pixels
                .iter()
                .zip(other.pixels.iter())
                .filter(|(a, b)| a != b)
                .count(),
        )
    }

    pub fn same_image(&self, other: &Snapshot) -> bool {
        self.diff_pixels(other) == Some(0)
    }

    pub fn matches(&self, other: &Snapshot, tolerance: usize) -> bool {
        matches!(self.diff_pixels(other), Some(diff) if diff <= tolerance)
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.texts.iter().any(|t| t.contains(needle))
    }

    fn to_image(&self) -> Result<image::GrayImage, crate::Error> {
        image::GrayImage::from_raw(
            self.width as u32,
            self.height as u32,
            self.pixels.clone(),
        )
        .ok_or_else(|| {
            format!(
                "{} pixels don't fill a {}x{} screen",
                self.pixels.len(),
                self.width,
                self.height
            )
            .into()
        })
    }

    pub fn to_png(&self) -> Result<Vec<u8>, crate::Error> {
        let mut buf = vec![];
        image::DynamicImage::ImageLuma8(self.to_image()?)
            .write_to(&mut buf, image::ImageOutputFormat::Png)?;
        Ok(buf)
    }

    pub fn to_base64_png(&self) -> Result<String, crate::Error> {
        Ok(base64::encode(self.to_png()?))
    }

    pub fn from_png(data: &[u8]) -> Result<Self, crate::Error> {
        let image = image::load_from_memory(data)?.to_luma8();
        let (width, height) = image.dimensions();
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(format!("Image too large: {}x{}", width, height).into());
        }

        Ok(Snapshot::new(width as u16, height as u16, image.into_raw()))
    }
}

#[derive(Debug, Clone)]
pub enum Comparison {
    Match,
    /// The reference was (re)written from the captured screen
    Updated,
    Mismatch { expected: Snapshot, diff: Option<usize> },
    Missing(PathBuf),
}

/// Reference snapshots, one directory per model and scenario:
/// `<root>/<prefix>-<label>/00000.png`.
///
/// References are only ever written in update mode.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    update: bool,
    tolerance: usize,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, update: bool, tolerance: usize) -> Self {
        SnapshotStore {
            root: root.into(),
            update,
            tolerance,
        }
    }

    /// `ZEMU_SNAPSHOTS_DIR` (default `snapshots`), update mode when
    /// `ZEMU_UPDATE_SNAPSHOTS` is set to anything but `0`
    pub fn from_env() -> Self {
        let root = std::env::var("ZEMU_SNAPSHOTS_DIR").unwrap_or_else(|_| "snapshots".into());
        let update = std::env::var("ZEMU_UPDATE_SNAPSHOTS")
            .map(|v| v != "0")
            .unwrap_or(false);
        SnapshotStore::new(root, update, 0)
    }

    pub fn is_update(&self) -> bool {
        self.update
    }

    pub fn reference_path(&self, model: &HardwareVariant, label: &str, index: usize) -> PathBuf {
        self.root
            .join(model.snapshot_dir_name(label))
            .join(format!("{:05}.png", index))
    }

    pub fn load(
        &self,
        model: &HardwareVariant,
        label: &str,
        index: usize,
    ) -> Result<Option<Snapshot>, crate::Error> {
        let path = self.reference_path(model, label, index);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(Snapshot::from_png(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn check(
        &self,
        model: &HardwareVariant,
        label: &str,
        index: usize,
        actual: &Snapshot,
    ) -> Result<Comparison, crate::Error> {
        let path = self.reference_path(model, label, index);

        if self.update {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, actual.to_png()?)?;
            log::debug!("Updated reference {}", path.display());
            return Ok(Comparison::Updated);
        }

        match self.load(model, label, index)? {
            None => Ok(Comparison::Missing(path)),
            Some(expected) if actual.matches(&expected, self.tolerance) => Ok(Comparison::Match),
            Some(expected) => {
                let diff = actual.diff_pixels(&expected);
                Ok(Comparison::Mismatch { expected, diff })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::model::{get_model, ModelKind};

    fn screen(fill: u8) -> Snapshot {
        Snapshot::new(4, 2, vec![fill; 8])
    }

    #[test]
    fn test_diff() {
        let mut other = screen(0);
        other.pixels[3] = 0xFF;

        assert_eq!(screen(0).diff_pixels(&other), Some(1));
        assert!(!screen(0).same_image(&other));
        assert!(screen(0).matches(&other, 1));
        assert_eq!(screen(0).diff_pixels(&Snapshot::new(2, 4, vec![0; 8])), None);
    }

    #[test]
    fn test_texts_dont_count() {
        let a = screen(1).with_texts(["Address"]);
        let b = screen(1).with_texts(["APPROVE"]);
        assert!(a.same_image(&b));
        assert!(b.contains_text("APPROVE"));
        assert!(!a.contains_text("APPROVE"));
    }

    #[test]
    fn test_png() {
        let mut snapshot = screen(0x80);
        snapshot.pixels[0] = 0;

        let decoded = Snapshot::from_png(&snapshot.to_png().unwrap()).unwrap();
        assert!(decoded.same_image(&snapshot));
    }

    #[test]
    fn test_store_update_then_check() {
        let dir = tempdir::TempDir::new("snapshots").unwrap();
        let model = get_model(ModelKind::Nanosp);

        let store = SnapshotStore::new(dir.path(), false, 0);
        assert!(matches!(
            store.check(model, "show_address", 0, &screen(7)).unwrap(),
            Comparison::Missing(_)
        ));
        assert!(!store.reference_path(model, "show_address", 0).exists());

        let updating = SnapshotStore::new(dir.path(), true, 0);
        assert!(matches!(
            updating.check(model, "show_address", 0, &screen(7)).unwrap(),
            Comparison::Updated
        ));
        assert!(dir.path().join("sp-show_address").join("00000.png").exists());

        assert!(matches!(
            store.check(model, "show_address", 0, &screen(7)).unwrap(),
            Comparison::Match
        ));
        match store.check(model, "show_address", 0, &screen(8)).unwrap() {
            Comparison::Mismatch { expected, diff } => {
                assert!(expected.same_image(&screen(7)));
                assert_eq!(diff, Some(8));
            }
            other => panic!("Unexpected comparison: {:?}", other),
        }
    }

    #[test]
    fn test_store_tolerance() {
        let dir = tempdir::TempDir::new("snapshots").unwrap();
        let model = get_model(ModelKind::Stax);
        SnapshotStore::new(dir.path(), true, 0)
            .check(model, "sign_basic", 3, &screen(0))
            .unwrap();

        let mut noisy = screen(0);
        noisy.pixels[5] = 1;
        let store = SnapshotStore::new(dir.path(), false, 1);
        assert!(matches!(
            store.check(model, "sign_basic", 3, &noisy).unwrap(),
            Comparison::Match
        ));
    }
}
