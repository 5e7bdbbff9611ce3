//! External service adapters — classifier, rewrite, image generation.

pub mod classify;
pub mod image;
pub mod rewrite;

pub use classify::{Classifier, HttpClassifier};
pub use image::{GenerationOutcome, HttpImageGenerator, ImageGenerator};
pub use rewrite::{HttpRewriter, Rewriter};
