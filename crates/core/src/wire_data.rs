//! Wire form of a permuter's configuration (`PermuterData`).
//!
//! The raw `source` and `target_o_bin` payloads are intentionally excluded
//! from the JSON encoding: on the wire they travel as separate (compressed)
//! frames adjacent to the JSON message that references them. `pah-wire` is
//! responsible for that framing; this module only owns the logical struct
//! and its JSON-field round trip.

use serde::{Deserialize, Serialize};

/// A permuter's configuration as sent once, immutably, when a session adds
/// it to a remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermuterData {
    /// Target function name, if the job directory specified one.
    pub fn_name: Option<String>,
    /// Display filename (typically the job directory's `base.c`).
    pub filename: String,
    /// Probability of continuing to mutate the previous output.
    pub keep_prob: f64,
    /// Whether the scorer should take stack layout differences into account.
    pub stack_differences: bool,
    /// Contents of the job's `compile.sh`.
    pub compile_script: String,
    /// Preprocessed base C source.
    pub source: String,
    /// Target object file bytes.
    pub target_o_bin: Vec<u8>,
}

/// The JSON-encodable subset of [`PermuterData`] (everything but the two
/// byte payloads, which travel as raw frames).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermuterDataFields {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fn_name: Option<String>,
    pub filename: String,
    /// Serialized as a string to avoid float-precision drift across the wire.
    pub keep_prob: String,
    pub stack_differences: bool,
    pub compile_script: String,
}

/// Split a [`PermuterData`] into its JSON fields and raw byte payloads.
pub fn permuter_data_to_json(data: &PermuterData) -> (PermuterDataFields, Vec<u8>, Vec<u8>) {
    let fields = PermuterDataFields {
        fn_name: data.fn_name.clone(),
        filename: data.filename.clone(),
        keep_prob: data.keep_prob.to_string(),
        stack_differences: data.stack_differences,
        compile_script: data.compile_script.clone(),
    };
    (
        fields,
        data.source.as_bytes().to_vec(),
        data.target_o_bin.clone(),
    )
}

/// Reassemble a [`PermuterData`] from its JSON fields plus the two raw
/// frames that accompanied them.
pub fn permuter_data_from_json(
    fields: PermuterDataFields,
    source: String,
    target_o_bin: Vec<u8>,
) -> Result<PermuterData, String> {
    let keep_prob: f64 = fields
        .keep_prob
        .parse()
        .map_err(|_| format!("invalid keep_prob: {:?}", fields.keep_prob))?;
    if !(0.0..=1.0).contains(&keep_prob) {
        return Err(format!("keep_prob out of range: {keep_prob}"));
    }
    Ok(PermuterData {
        fn_name: fields.fn_name,
        filename: fields.filename,
        keep_prob,
        stack_differences: fields.stack_differences,
        compile_script: fields.compile_script,
        source,
        target_o_bin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permuter_data_json_round_trips() {
        let data = PermuterData {
            fn_name: Some("func_80012345".to_string()),
            filename: "base.c".to_string(),
            keep_prob: 0.6,
            stack_differences: true,
            compile_script: "#!/bin/sh\ngcc -c \"$1\" -o \"$3\"\n".to_string(),
            source: "int func_80012345(void) { return 0; }".to_string(),
            target_o_bin: vec![0x7f, b'E', b'L', b'F'],
        };

        let (fields, source_bytes, target_bytes) = permuter_data_to_json(&data);
        let json = serde_json::to_string(&fields).unwrap();
        let decoded_fields: PermuterDataFields = serde_json::from_str(&json).unwrap();
        let source = String::from_utf8(source_bytes).unwrap();
        let rebuilt =
            permuter_data_from_json(decoded_fields, source, target_bytes).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn rejects_out_of_range_keep_prob() {
        let fields = PermuterDataFields {
            fn_name: None,
            filename: "base.c".to_string(),
            keep_prob: "1.5".to_string(),
            stack_differences: false,
            compile_script: String::new(),
        };
        assert!(permuter_data_from_json(fields, String::new(), Vec::new()).is_err());
    }
}
