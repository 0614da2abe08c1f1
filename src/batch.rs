//! Embarrassingly-parallel batch processing.
//!
//! The engine holds no mutable state, so batches fan out over a rayon
//! worker pool with no synchronization beyond result collection. Results
//! come back per item and in input order: one structurally bad item never
//! aborts the rest, and a parallel run yields exactly the results of a
//! sequential one.

use rayon::prelude::*;

use crate::composite::CompositeImage;
use crate::engine::{AuthEngine, AuthReport, GenerateOptions};
use crate::error::QrSealError;
use crate::record::BarcodeRecord;

/// One generation work item.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Application data for the public layer.
    pub public_data: String,
    /// Optional secret message to seal into the hidden layer.
    pub secret_message: Option<Vec<u8>>,
}

impl GenerateRequest {
    /// Item without a secret message.
    pub fn public_only(public_data: impl Into<String>) -> Self {
        Self {
            public_data: public_data.into(),
            secret_message: None,
        }
    }

    /// Item with a sealed secret.
    pub fn with_secret(public_data: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            public_data: public_data.into(),
            secret_message: Some(secret.into()),
        }
    }
}

/// Generate all requested barcodes in parallel.
pub fn generate_all(
    engine: &AuthEngine,
    requests: &[GenerateRequest],
    options: &GenerateOptions,
) -> Vec<Result<(BarcodeRecord, CompositeImage), QrSealError>> {
    requests
        .par_iter()
        .map(|request| {
            engine.generate(
                &request.public_data,
                request.secret_message.as_deref(),
                options,
            )
        })
        .collect()
}

/// Verify all records in parallel.
pub fn verify_all(
    engine: &AuthEngine,
    records: &[BarcodeRecord],
) -> Vec<Result<AuthReport, QrSealError>> {
    records
        .par_iter()
        .map(|record| engine.verify(record))
        .collect()
}

/// Read and verify all composite images in parallel.
pub fn verify_images(
    engine: &AuthEngine,
    images: &[CompositeImage],
) -> Vec<Result<(BarcodeRecord, AuthReport), QrSealError>> {
    images
        .par_iter()
        .map(|image| engine.verify_image(image))
        .collect()
}
