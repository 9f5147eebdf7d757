use serde_json::Value;

use crate::config::SectionSpec;

/// A bounded slice of one section, processed as an independent unit. A
/// section below the chunking criteria travels as a single implicit chunk
/// so task construction stays uniform.
#[derive(Debug, Clone)]
pub struct SectionChunk {
    pub section_key: String,
    pub display_name: String,
    pub index: usize,
    pub total: usize,
    pub value: Value,
}

impl SectionChunk {
    pub fn elements(&self) -> Option<&Vec<Value>> {
        self.value.as_array()
    }

    /// Deterministic blob path for the persisted chunk file.
    pub fn blob_path(&self, run_id: &str) -> String {
        format!(
            "runs/{run_id}/chunks/{}_{}.json",
            self.section_key, self.index
        )
    }

    /// Serialized upload shape: the chunk value under its section key.
    pub fn blob_payload(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(self.section_key.clone(), self.value.clone());
        Value::Object(map)
    }
}

pub fn chunk_count(len: usize, max_elements: usize) -> usize {
    if max_elements == 0 { 1 } else { len.div_ceil(max_elements) }
}

/// Split an oversized chunkable array into contiguous slices of at most
/// `max_elements` elements, preserving order; anything else wraps whole.
pub fn build_chunks(spec: &SectionSpec, value: &Value, max_elements: usize) -> Vec<SectionChunk> {
    if spec.chunkable && max_elements > 0 {
        if let Some(elements) = value.as_array() {
            if elements.len() > max_elements {
                let total = chunk_count(elements.len(), max_elements);
                return elements
                    .chunks(max_elements)
                    .enumerate()
                    .map(|(index, slice)| SectionChunk {
                        section_key: spec.key.clone(),
                        display_name: spec.display_name.clone(),
                        index,
                        total,
                        value: Value::Array(slice.to_vec()),
                    })
                    .collect();
            }
        }
    }

    vec![SectionChunk {
        section_key: spec.key.clone(),
        display_name: spec.display_name.clone(),
        index: 0,
        total: 1,
        value: value.clone(),
    }]
}
