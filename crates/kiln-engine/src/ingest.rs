use std::thread;

use kiln_contracts::errors::IngestionError;
use kiln_contracts::normalized::{AssetReference, IngestedAsset};
use kiln_contracts::providers::AssetTransport;
use kiln_contracts::request::ReferencePart;

use crate::providers::StorageClient;

/// Turns reference parts into provider-consumable assets, preserving order.
///
/// Hosted uploads run on one scoped thread per part. When several parts fail,
/// the error for the lowest position is returned.
pub fn ingest(
    parts: &[ReferencePart],
    transport: AssetTransport,
    storage: Option<&dyn StorageClient>,
) -> Result<Vec<IngestedAsset>, IngestionError> {
    if parts.is_empty() {
        return Ok(Vec::new());
    }
    match transport {
        AssetTransport::Inline => parts
            .iter()
            .enumerate()
            .map(|(position, part)| inline_asset(position, part))
            .collect(),
        AssetTransport::Hosted => {
            let Some(storage) = storage else {
                let first = &parts[0];
                return Err(IngestionError {
                    role: first.role,
                    position: 0,
                    message: "hosted transport requires a storage client".to_string(),
                });
            };
            upload_all(parts, storage)
        }
    }
}

fn inline_asset(position: usize, part: &ReferencePart) -> Result<IngestedAsset, IngestionError> {
    let bytes = decode(position, part)?;
    Ok(IngestedAsset {
        role: part.role,
        position,
        mime_type: part.mime_type.clone(),
        reference: AssetReference::Inline(bytes),
    })
}

fn upload_all(
    parts: &[ReferencePart],
    storage: &dyn StorageClient,
) -> Result<Vec<IngestedAsset>, IngestionError> {
    let results = thread::scope(|scope| {
        let workers = parts
            .iter()
            .enumerate()
            .map(|(position, part)| {
                let worker = scope.spawn(move || upload_one(position, part, storage));
                (position, part.role, worker)
            })
            .collect::<Vec<_>>();
        workers
            .into_iter()
            .map(|(position, role, worker)| {
                worker.join().unwrap_or_else(|_| {
                    Err(IngestionError {
                        role,
                        position,
                        message: "upload worker panicked".to_string(),
                    })
                })
            })
            .collect::<Vec<_>>()
    });
    // Joined in position order, so the first error is the lowest failing position.
    results.into_iter().collect()
}

fn upload_one(
    position: usize,
    part: &ReferencePart,
    storage: &dyn StorageClient,
) -> Result<IngestedAsset, IngestionError> {
    let bytes = decode(position, part)?;
    let url = storage
        .upload(&bytes, &part.mime_type)
        .map_err(|err| IngestionError {
            role: part.role,
            position,
            message: err.to_string(),
        })?;
    tracing::debug!(position, role = %part.role, bytes = bytes.len(), "reference uploaded");
    Ok(IngestedAsset {
        role: part.role,
        position,
        mime_type: part.mime_type.clone(),
        reference: AssetReference::Hosted(url),
    })
}

fn decode(position: usize, part: &ReferencePart) -> Result<Vec<u8>, IngestionError> {
    let bytes = part.data.decode().map_err(|err| IngestionError {
        role: part.role,
        position,
        message: format!("invalid base64 payload: {err}"),
    })?;
    if bytes.is_empty() {
        return Err(IngestionError {
            role: part.role,
            position,
            message: "reference image is empty".to_string(),
        });
    }
    Ok(bytes)
}
