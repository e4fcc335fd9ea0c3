use std::path::PathBuf;

use derive_more::Display;

/// A file that could not be decoded, together with the underlying cause.
#[derive(Debug, Display)]
#[display(fmt = "{:?}: {}", path, error)]
pub struct ImageError {
    pub path: PathBuf,
    pub error: ::image::ImageError,
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Everything that can abort a catalog or mosaic operation.
#[derive(Debug, Display)]
pub enum MosaicError {
    #[display(fmt = "invalid color input: {} channel is {}, expected 0..=255", channel, value)]
    InvalidColorInput { channel: &'static str, value: i64 },

    #[display(fmt = "cannot average an empty region")]
    EmptyRegion,

    #[display(
        fmt = "invalid grid: cells of {}x{} pixels over a {}x{} image",
        cell_width,
        cell_height,
        image_width,
        image_height
    )]
    InvalidGrid {
        cell_width: u32,
        cell_height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[display(
        fmt = "catalog exhausted at cell ({}, {}): all eligible entries are excluded ({} ids in the window)",
        column,
        row,
        excluded
    )]
    CatalogExhausted { column: u32, row: u32, excluded: usize },

    #[display(fmt = "source image unreadable: {}", _0)]
    SourceImageUnreadable(ImageError),

    #[display(fmt = "catalog unavailable at {:?}: {}", path, reason)]
    CatalogUnavailable { path: PathBuf, reason: String },

    #[display(fmt = "build cancelled before cell ({}, {})", column, row)]
    Cancelled { column: u32, row: u32 },
}

impl std::error::Error for MosaicError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MosaicError::SourceImageUnreadable(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ImageError> for MosaicError {
    fn from(error: ImageError) -> Self {
        MosaicError::SourceImageUnreadable(error)
    }
}

impl MosaicError {
    pub(crate) fn catalog_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MosaicError::CatalogUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
