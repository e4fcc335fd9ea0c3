pub mod average;
pub mod builder;
pub mod catalog;
pub mod color;
pub mod error;
pub mod image;
pub mod rendering;
pub mod stats;

use indicatif::{ProgressBar, ProgressStyle};

const PROGRESS_TEMPLATE: &str = "{msg} {wide_bar} {pos}/{len} ({per_sec})";

pub(crate) fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len).with_message(message).with_style(style)
}
