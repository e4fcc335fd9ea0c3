use std::path::PathBuf;

use ::image::Rgb;
use chrono::NaiveDate;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize};

/// Identifier of a catalog image, unique and stable for the catalog's lifetime.
pub type EntryId = u32;

/// One library image reduced to its average color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: EntryId,
    pub average_color: Rgb<u8>,
    pub source_path: PathBuf,
    pub captured_on: NaiveDate,
}

impl CatalogEntry {
    pub fn new(
        id: EntryId,
        average_color: Rgb<u8>,
        source_path: impl Into<PathBuf>,
        captured_on: NaiveDate,
    ) -> CatalogEntry {
        CatalogEntry {
            id,
            average_color,
            source_path: source_path.into(),
            captured_on,
        }
    }
}

impl Serialize for CatalogEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut st = serializer.serialize_tuple(4)?;
        st.serialize_element(&self.id)?;
        st.serialize_element(&self.average_color.0)?;
        st.serialize_element(&self.source_path)?;
        st.serialize_element(&self.captured_on)?;
        st.end()
    }
}

impl<'de> Deserialize<'de> for CatalogEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (id, rgb, source_path, captured_on): (EntryId, [u8; 3], PathBuf, NaiveDate) =
            Deserialize::deserialize(deserializer)?;
        Ok(CatalogEntry::new(id, Rgb(rgb), source_path, captured_on))
    }
}

