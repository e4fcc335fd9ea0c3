mod entry;

pub use entry::{CatalogEntry, EntryId};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use ::image::error::{LimitError, LimitErrorKind};
use ::image::Rgb;
use chrono::NaiveDate;
use itertools::Itertools;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::de::Error as _;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::average::average_color;
use super::color::{cie94, to_lab, Lab};
use super::error::{ImageError, MosaicError};
use super::image::{capture_date, find_images, has_extension, open_rgb};
use super::progress_bar;

/// Bumped whenever the cache layout changes so stale caches are rescanned.
const CATALOG_FORMAT: u16 = 1;

/// The query a mosaic build needs from a catalog of library images.
pub trait Catalog: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry whose average color is closest to `target` by CIE94, the
    /// entry's color being the reference, among entries not in `exclude`.
    ///
    /// Returns `Ok(None)` when every entry is excluded.
    fn find_nearest(
        &self,
        target: Rgb<u8>,
        exclude: &HashSet<EntryId>,
    ) -> Result<Option<CatalogEntry>, MosaicError>;
}

/// In-memory catalog searched by a parallel linear scan.
///
/// Lab values of the entries are computed once when they are added. Among
/// entries at exactly the same distance the earliest added wins.
#[derive(Clone, Debug)]
pub struct TileCatalog {
    entries: Vec<CatalogEntry>,
    labs: Vec<Lab>,
    next_id: EntryId,
}

impl TileCatalog {
    pub fn new() -> TileCatalog {
        TileCatalog {
            entries: vec![],
            labs: vec![],
            next_id: 1,
        }
    }

    /// Builds a catalog from entries whose ids were assigned elsewhere.
    ///
    /// # Errors
    /// [`MosaicError::CatalogUnavailable`] if two entries share an id or an
    /// id leaves no room for the next one.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<TileCatalog, MosaicError> {
        let mut seen = HashSet::with_capacity(entries.len());
        if let Some(duplicate) = entries.iter().find(|entry| !seen.insert(entry.id)) {
            return Err(MosaicError::catalog_unavailable(
                &duplicate.source_path,
                format!("duplicate catalog id {}", duplicate.id),
            ));
        }
        let labs = entries.iter().map(|e| to_lab(e.average_color)).collect();
        let next_id = match entries.iter().max_by_key(|e| e.id) {
            Some(last) => last.id.checked_add(1).ok_or_else(|| {
                MosaicError::catalog_unavailable(
                    &last.source_path,
                    format!("catalog id {} leaves no room for new entries", last.id),
                )
            })?,
            None => 1,
        };
        Ok(TileCatalog {
            entries,
            labs,
            next_id,
        })
    }

    /// Adds an image and returns the id it was given.
    ///
    /// # Errors
    /// [`MosaicError::CatalogUnavailable`] once the id space is used up.
    pub fn push(
        &mut self,
        path: PathBuf,
        average_color: Rgb<u8>,
        captured_on: NaiveDate,
    ) -> Result<EntryId, MosaicError> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| MosaicError::catalog_unavailable(&path, "catalog ids exhausted"))?;
        self.labs.push(to_lab(average_color));
        self.entries.push(CatalogEntry::new(id, average_color, path, captured_on));
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Drops entries whose files no longer exist. Remaining ids are unchanged.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.entries.len();
        let (entries, labs): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .zip(self.labs.drain(..))
            .filter(|(entry, _)| entry.source_path.exists())
            .unzip();
        self.entries = entries;
        self.labs = labs;
        before - self.entries.len()
    }

    /// Walks `tiles_dir` and reduces every matching image to its average color.
    ///
    /// Images are decoded and averaged in parallel. Files that fail to decode
    /// are skipped and returned alongside the catalog.
    pub fn scan(
        tiles_dir: &Path,
        extensions: &[String],
    ) -> Result<(TileCatalog, Vec<ImageError>), MosaicError> {
        let paths = find_images(tiles_dir, has_extension(extensions))
            .map_err(|e| MosaicError::catalog_unavailable(tiles_dir, e))?;
        info!("Found {} candidate images in {}", paths.len(), tiles_dir.display());

        let pb = progress_bar(paths.len() as u64, "Analysing tiles");
        let analysed: Vec<_> = paths
            .into_par_iter()
            .map(|path| {
                let result = analyse_image(&path);
                pb.inc(1);
                result.map(|(color, date)| (path, color, date))
            })
            .collect();
        pb.finish_and_clear();

        let mut catalog = TileCatalog::new();
        let mut errors = vec![];
        for result in analysed {
            match result {
                Ok((path, color, date)) => {
                    catalog.push(path, color, date)?;
                }
                Err(error) => errors.push(error),
            }
        }

        let unique_colors = catalog.entries.iter().map(|e| e.average_color).unique().count();
        info!(
            "Catalog has {} images with {} distinct average colors",
            catalog.len(),
            unique_colors
        );
        if !errors.is_empty() {
            warn!("Failed to read {} images", errors.len());
        }
        Ok((catalog, errors))
    }

    pub fn save(&self, path: &Path) -> Result<(), MosaicError> {
        let bytes = bincode::serialize(self).map_err(|e| MosaicError::catalog_unavailable(path, e))?;
        fs::write(path, bytes).map_err(|e| MosaicError::catalog_unavailable(path, e))?;
        info!("Saved catalog of {} images to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<TileCatalog, MosaicError> {
        let bytes = fs::read(path).map_err(|e| MosaicError::catalog_unavailable(path, e))?;
        bincode::deserialize(&bytes).map_err(|e| MosaicError::catalog_unavailable(path, e))
    }
}

impl Default for TileCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Average color and capture date of one library image.
fn analyse_image(path: &Path) -> Result<(Rgb<u8>, NaiveDate), ImageError> {
    let img = open_rgb(path)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(ImageError {
            path: path.to_owned(),
            error: ::image::ImageError::Limits(LimitError::from_kind(LimitErrorKind::DimensionError)),
        });
    }
    let color = average_color(&img, (0, 0, img.width(), img.height()));
    let date = capture_date(path).map_err(|e| ImageError {
        path: path.to_owned(),
        error: e.into(),
    })?;
    Ok((color, date))
}

impl Catalog for TileCatalog {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn find_nearest(
        &self,
        target: Rgb<u8>,
        exclude: &HashSet<EntryId>,
    ) -> Result<Option<CatalogEntry>, MosaicError> {
        let target = to_lab(target);
        let nearest = self
            .entries
            .par_iter()
            .zip(self.labs.par_iter())
            .enumerate()
            .filter(|(_, (entry, _))| !exclude.contains(&entry.id))
            .map(|(index, (_, lab))| (cie94(lab, &target), index))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(nearest.map(|(_, index)| self.entries[index].clone()))
    }
}

impl Serialize for TileCatalog {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut st = serializer.serialize_tuple(2)?;
        st.serialize_element(&CATALOG_FORMAT)?;
        st.serialize_element(&self.entries)?;
        st.end()
    }
}

impl<'de> Deserialize<'de> for TileCatalog {
    fn deserialize<D>(deserializer: D) -> Result<TileCatalog, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (format, entries): (u16, Vec<CatalogEntry>) = Deserialize::deserialize(deserializer)?;
        if format != CATALOG_FORMAT {
            return Err(D::Error::custom(format!(
                "catalog format {} is not supported (expected {})",
                format, CATALOG_FORMAT
            )));
        }
        TileCatalog::from_entries(entries).map_err(D::Error::custom)
    }
}
