use std::collections::BTreeMap;

use thiserror::Error;

/// Pipeline id -> stage id that means "new / reopened" in that pipeline.
///
/// Built once at startup and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineStageMap {
    stages: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineMapError {
    #[error("pipeline stage map must contain at least one entry")]
    Empty,
    #[error("pipeline stage map contains a blank pipeline id")]
    BlankPipeline,
    #[error("pipeline `{pipeline}` maps to a blank stage id")]
    BlankStage { pipeline: String },
    #[error("pipeline `{pipeline}` is mapped more than once")]
    DuplicatePipeline { pipeline: String },
    #[error("pipeline stage entry `{0}` must look like `<pipeline>=<stage>`")]
    MalformedEntry(String),
}

const DEFAULT_STAGES: &[(&str, &str)] = &[
    ("0", "1"),                 // IT
    ("5370445", "5370446"),     // PT
    ("3636100", "12289400"),    // PL
    ("6055533", "18538414"),    // FR
    ("10269822", "29856908"),   // UK
    ("72187614", "173144812"),  // ES
    ("11377503", "33961887"),   // SCA
    ("127897585", "256122604"), // DACH
    ("237646037", "401290228"), // BE
    ("239129274", "402809056"), // NL
];

impl Default for PipelineStageMap {
    fn default() -> Self {
        Self {
            stages: DEFAULT_STAGES
                .iter()
                .map(|(pipeline, stage)| (pipeline.to_string(), stage.to_string()))
                .collect(),
        }
    }
}

impl PipelineStageMap {
    pub fn new<I, K, V>(entries: I) -> Result<Self, PipelineMapError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut stages = BTreeMap::new();
        for (pipeline, stage) in entries {
            let pipeline = pipeline.into().trim().to_string();
            let stage = stage.into().trim().to_string();
            if pipeline.is_empty() {
                return Err(PipelineMapError::BlankPipeline);
            }
            if stage.is_empty() {
                return Err(PipelineMapError::BlankStage { pipeline });
            }
            if stages.contains_key(&pipeline) {
                return Err(PipelineMapError::DuplicatePipeline { pipeline });
            }
            stages.insert(pipeline, stage);
        }

        if stages.is_empty() {
            return Err(PipelineMapError::Empty);
        }
        Ok(Self { stages })
    }

    /// Parses `pipeline=stage` pairs separated by commas, as used in environment overrides.
    pub fn parse_pairs(raw: &str) -> Result<Self, PipelineMapError> {
        let mut entries = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((pipeline, stage)) = entry.split_once('=') else {
                return Err(PipelineMapError::MalformedEntry(entry.to_string()));
            };
            entries.push((pipeline.to_string(), stage.to_string()));
        }
        Self::new(entries)
    }

    pub fn stage_for(&self, pipeline: &str) -> Option<&str> {
        self.stages.get(pipeline).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.stages.iter().map(|(pipeline, stage)| (pipeline.as_str(), stage.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineMapError, PipelineStageMap};

    #[test]
    fn default_map_covers_reference_pipelines() {
        let map = PipelineStageMap::default();
        assert_eq!(map.len(), 10);
        assert_eq!(map.stage_for("0"), Some("1"));
        assert_eq!(map.stage_for("239129274"), Some("402809056"));
        assert_eq!(map.stage_for("unknown"), None);
    }

    #[test]
    fn rejects_blank_and_duplicate_entries() {
        assert_eq!(PipelineStageMap::new(Vec::<(String, String)>::new()), Err(PipelineMapError::Empty));
        assert_eq!(PipelineStageMap::new([(" ", "1")]), Err(PipelineMapError::BlankPipeline));
        assert_eq!(
            PipelineStageMap::new([("P1", "")]),
            Err(PipelineMapError::BlankStage { pipeline: "P1".to_string() })
        );
        assert_eq!(
            PipelineStageMap::new([("P1", "1"), ("P1 ", "2")]),
            Err(PipelineMapError::DuplicatePipeline { pipeline: "P1".to_string() })
        );
    }

    #[test]
    fn parses_comma_separated_pairs() {
        let map = PipelineStageMap::parse_pairs("P1=S1, P2=S2,").expect("valid pairs");
        assert_eq!(map.stage_for("P2"), Some("S2"));

        let error = PipelineStageMap::parse_pairs("P1=S1,P2").expect_err("missing separator");
        assert_eq!(error, PipelineMapError::MalformedEntry("P2".to_string()));
    }
}
