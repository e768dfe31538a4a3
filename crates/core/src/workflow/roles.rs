//! Node role classification.
//!
//! The tracer never matches on node kinds directly; it asks a [`RoleTable`]
//! what a kind does. Exact names are checked first, then case-insensitive
//! substring families in insertion order, so custom node packs that follow
//! ComfyUI naming conventions are understood without being listed.

use std::collections::HashMap;
use std::sync::OnceLock;

/// What a node contributes to the generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Sampling node; trace roots.
    Sampler,
    /// Model loader. LoRA loaders wrap another model.
    Loader { lora: bool },
    /// Turns prompt text into conditioning.
    PromptEncoder,
    /// Produces the initial latent and therefore the output dimensions.
    LatentSource,
    /// Holds a single literal value (primitive, seed generator).
    Literal,
    /// Forwards its input unchanged (reroute).
    Passthrough,
    Unknown,
}

/// Extensible mapping from node kind to [`NodeRole`].
#[derive(Debug, Clone)]
pub struct RoleTable {
    exact: HashMap<String, NodeRole>,
    families: Vec<(String, NodeRole)>,
}

const EXACT: &[(&str, NodeRole)] = &[
    ("KSampler", NodeRole::Sampler),
    ("KSamplerAdvanced", NodeRole::Sampler),
    ("SamplerCustom", NodeRole::Sampler),
    ("SamplerCustomAdvanced", NodeRole::Sampler),
    // Selects a sampler algorithm, it does not sample.
    ("KSamplerSelect", NodeRole::Unknown),
    ("CheckpointLoaderSimple", NodeRole::Loader { lora: false }),
    ("CheckpointLoader", NodeRole::Loader { lora: false }),
    ("ImageOnlyCheckpointLoader", NodeRole::Loader { lora: false }),
    ("unCLIPCheckpointLoader", NodeRole::Loader { lora: false }),
    ("UNETLoader", NodeRole::Loader { lora: false }),
    ("UnetLoaderGGUF", NodeRole::Loader { lora: false }),
    ("DiffusersLoader", NodeRole::Loader { lora: false }),
    ("LoraLoader", NodeRole::Loader { lora: true }),
    ("LoraLoaderModelOnly", NodeRole::Loader { lora: true }),
    ("CLIPTextEncode", NodeRole::PromptEncoder),
    ("CLIPTextEncodeSDXL", NodeRole::PromptEncoder),
    ("CLIPTextEncodeSDXLRefiner", NodeRole::PromptEncoder),
    ("CLIPTextEncodeFlux", NodeRole::PromptEncoder),
    ("EmptyLatentImage", NodeRole::LatentSource),
    ("EmptySD3LatentImage", NodeRole::LatentSource),
    ("EmptyHunyuanLatentVideo", NodeRole::LatentSource),
    ("EmptyMochiLatentVideo", NodeRole::LatentSource),
    ("EmptyLTXVLatentVideo", NodeRole::LatentSource),
    ("PrimitiveNode", NodeRole::Literal),
    ("PrimitiveInt", NodeRole::Literal),
    ("PrimitiveFloat", NodeRole::Literal),
    ("PrimitiveString", NodeRole::Literal),
    ("PrimitiveStringMultiline", NodeRole::Literal),
    ("PrimitiveBoolean", NodeRole::Literal),
    ("Reroute", NodeRole::Passthrough),
];

const FAMILIES: &[(&str, NodeRole)] = &[
    ("ksampler", NodeRole::Sampler),
    ("samplercustom", NodeRole::Sampler),
    ("loraloader", NodeRole::Loader { lora: true }),
    ("lora loader", NodeRole::Loader { lora: true }),
    ("checkpointloader", NodeRole::Loader { lora: false }),
    ("unetloader", NodeRole::Loader { lora: false }),
    ("ckpt", NodeRole::Loader { lora: false }),
    ("cliptextencode", NodeRole::PromptEncoder),
    ("textencode", NodeRole::PromptEncoder),
    ("emptylatent", NodeRole::LatentSource),
    ("empty latent", NodeRole::LatentSource),
    ("literal", NodeRole::Literal),
    ("primitive", NodeRole::Literal),
    ("seed", NodeRole::Literal),
    ("reroute", NodeRole::Passthrough),
];

impl RoleTable {
    /// An empty table that classifies everything as [`NodeRole::Unknown`].
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            families: Vec::new(),
        }
    }

    /// The built-in table covering stock ComfyUI nodes and common families.
    pub fn builtin() -> &'static Self {
        static BUILTIN: OnceLock<RoleTable> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut table = Self::empty();
            for (kind, role) in EXACT {
                table = table.with_kind(kind, *role);
            }
            for (needle, role) in FAMILIES {
                table = table.with_family(needle, *role);
            }
            table
        })
    }

    /// Register an exact kind name. Replaces any earlier entry.
    pub fn with_kind(mut self, kind: &str, role: NodeRole) -> Self {
        self.exact.insert(kind.to_string(), role);
        self
    }

    /// Register a case-insensitive substring family. Families are tried in
    /// insertion order after exact names.
    pub fn with_family(mut self, needle: &str, role: NodeRole) -> Self {
        self.families.push((needle.to_ascii_lowercase(), role));
        self
    }

    pub fn classify(&self, kind: &str) -> NodeRole {
        if let Some(role) = self.exact.get(kind) {
            return *role;
        }
        let lowered = kind.to_ascii_lowercase();
        self.families
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, role)| *role)
            .unwrap_or(NodeRole::Unknown)
    }
}

impl Default for RoleTable {
    fn default() -> Self {
        Self::builtin().clone()
    }
}
