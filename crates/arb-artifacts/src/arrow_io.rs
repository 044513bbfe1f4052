// SPDX-License-Identifier: MIT OR Apache-2.0
//! The columnar embeddings artifact.
//!
//! Arrow IPC *file* format (not streaming), schema exactly
//! `{trial_id: int32, vector: fixed_size_list<float32, dims>}`, rows in
//! ascending `trial_id`. Any failure here is reported to the caller,
//! who demotes the run to `jsonl_fallback` instead of failing it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, FixedSizeListArray, Float32Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;

/// Write `embeddings.arrow` from `(trial_id, vector)` rows.
///
/// Rows must already be sorted by `trial_id` ascending and every vector
/// must have exactly `dims` elements.
///
/// # Errors
///
/// A human-readable message covering schema construction, encoding, or
/// I/O failure; the caller records it in the provenance document.
pub fn write_arrow_embeddings(
    path: &Path,
    rows: &[(u32, Vec<f32>)],
    dims: usize,
) -> Result<(), String> {
    if rows.iter().any(|(_, v)| v.len() != dims) {
        return Err(format!("a vector does not have the declared {dims} dimensions"));
    }
    let dims_i32 =
        i32::try_from(dims).map_err(|_| format!("{dims} dimensions exceed the Arrow limit"))?;

    let trial_ids: Int32Array = rows.iter().map(|(id, _)| Some(*id as i32)).collect();
    let values: Float32Array = rows
        .iter()
        .flat_map(|(_, v)| v.iter().copied().map(Some))
        .collect();
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let vectors = FixedSizeListArray::try_new(
        Arc::clone(&item_field),
        dims_i32,
        Arc::new(values) as ArrayRef,
        None,
    )
    .map_err(|err| format!("failed to build vector column: {err}"))?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("trial_id", DataType::Int32, false),
        Field::new("vector", DataType::FixedSizeList(item_field, dims_i32), false),
    ]));
    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![Arc::new(trial_ids) as ArrayRef, Arc::new(vectors) as ArrayRef],
    )
    .map_err(|err| format!("failed to assemble record batch: {err}"))?;

    let file = fs::File::create(path).map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    let mut writer = FileWriter::try_new(file, &schema)
        .map_err(|err| format!("failed to open IPC writer: {err}"))?;
    writer
        .write(&batch)
        .map_err(|err| format!("failed to write batch: {err}"))?;
    writer
        .finish()
        .map_err(|err| format!("failed to finalize IPC file: {err}"))?;
    Ok(())
}
