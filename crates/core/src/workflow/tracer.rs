//! Backward tracer.
//!
//! Starting from each active sampler node, walks links backwards to recover
//! the model, LoRAs, prompts, latent dimensions and sampling scalars. Every
//! walk is bounded by [`TraceOptions::max_hops`]; running out of hops (or
//! running into a cycle) simply leaves the field empty.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DEFAULT_TRACE_MAX_HOPS;
use crate::workflow::graph::{GraphIndex, Node, NodeInput, NodeMode, SourceRef};
use crate::workflow::roles::{NodeRole, RoleTable};

// ---------------------------------------------------------------------------
// Options and output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// Maximum number of links followed by a single walk.
    pub max_hops: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_TRACE_MAX_HOPS,
        }
    }
}

/// Parameters recovered for one sampler node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplerDetail {
    pub node_id: String,
    pub kind: String,
    pub model: Option<String>,
    /// LoRA filenames in the order they wrap the model, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loras: Vec<String>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Option<f64>,
    pub steps: Option<i64>,
    pub seed: Option<u64>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

/// Literal keys holding the value of single-value nodes.
const VALUE_KEYS: &[&str] = &["value", "int", "float", "number", "string", "text", "seed"];

/// Literal keys naming the file a loader reads.
const FILENAME_KEYS: &[&str] = &[
    "ckpt_name",
    "unet_name",
    "lora_name",
    "model_path",
    "model_name",
    "clip_name",
    "vae_name",
    "control_net_name",
    "clip_name1",
];

const CONDITIONING_INPUTS: &[&str] = &["conditioning", "conditioning_1", "conditioning_to"];
const LATENT_INPUTS: &[&str] = &["samples", "latent", "latent_image", "pixels", "image"];

/// `(node id, field)` pairs already expanded by one scalar lookup.
type Visited = HashSet<(String, String)>;

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

pub struct Tracer<'g> {
    graph: &'g GraphIndex,
    roles: &'g RoleTable,
    options: TraceOptions,
}

impl<'g> Tracer<'g> {
    pub fn new(graph: &'g GraphIndex, roles: &'g RoleTable, options: TraceOptions) -> Self {
        Self {
            graph,
            roles,
            options,
        }
    }

    /// Role of a node, with bypassed nodes acting as plain wires.
    pub fn role(&self, node: &Node) -> NodeRole {
        if node.mode == NodeMode::Bypassed {
            NodeRole::Passthrough
        } else {
            self.roles.classify(&node.kind)
        }
    }

    /// Active sampler nodes in numeric id order.
    pub fn sampler_roots(&self) -> Vec<&'g Node> {
        self.graph
            .nodes_in_id_order()
            .into_iter()
            .filter(|node| node.is_active() && self.role(node) == NodeRole::Sampler)
            .collect()
    }

    /// Trace every parameter reachable from `sampler`.
    pub fn trace_sampler(&self, sampler: &Node) -> SamplerDetail {
        let mut detail = SamplerDetail {
            node_id: sampler.id.clone(),
            kind: sampler.kind.clone(),
            ..Default::default()
        };

        detail.sampler_name = self
            .sampler_scalar(sampler, &["sampler_name"], &["sampler"])
            .and_then(as_text);
        detail.scheduler = self
            .sampler_scalar(sampler, &["scheduler"], &["sigmas"])
            .and_then(as_text);
        detail.steps = self
            .sampler_scalar(sampler, &["steps"], &["sigmas"])
            .and_then(|v| as_integer(&v));
        detail.cfg = self
            .sampler_scalar(sampler, &["cfg"], &["guider"])
            .and_then(|v| as_float(&v));
        detail.seed = self
            .sampler_scalar(sampler, &["seed", "noise_seed"], &["noise"])
            .and_then(|v| as_seed(&v));

        if let Some(start) = self.sampler_link(sampler, &["model"], &["guider", "sigmas"]) {
            detail.model = self.trace_model(start, &mut detail.loras);
        }
        if let Some(start) = self.sampler_link(sampler, &["positive", "conditioning"], &["guider"]) {
            detail.positive_prompt = self.trace_prompt(start, "positive");
        }
        if let Some(start) = self.sampler_link(sampler, &["negative"], &["guider"]) {
            detail.negative_prompt = self.trace_prompt(start, "negative");
        }
        if let Some(start) = sampler.link("latent_image") {
            let (width, height) = self.trace_dimensions(start);
            detail.width = width;
            detail.height = height;
        }

        detail
    }

    // -- sampler fields -------------------------------------------------------

    /// Read one of `names` on the sampler, falling back to the same names on
    /// the nodes wired into its auxiliary inputs (custom sampler pipelines).
    fn sampler_scalar(&self, sampler: &Node, names: &[&str], aux: &[&str]) -> Option<Value> {
        if let Some(value) = self.field_on(sampler, names, 0) {
            return Some(value);
        }
        aux.iter()
            .filter_map(|input| self.aux_node(sampler, input))
            .find_map(|node| self.field_on(node, names, 1))
    }

    /// Find the link for one of `names` on the sampler or its auxiliary nodes.
    fn sampler_link<'a>(
        &'a self,
        sampler: &'a Node,
        names: &[&str],
        aux: &[&str],
    ) -> Option<&'a SourceRef> {
        if let Some(link) = names.iter().find_map(|name| sampler.link(name)) {
            return Some(link);
        }
        aux.iter()
            .filter_map(|input| self.aux_node(sampler, input))
            .find_map(|node| names.iter().find_map(|name| node.link(name)))
    }

    /// The node feeding `input` on `node`, skipping reroutes and bypassed nodes.
    fn aux_node(&self, node: &Node, input: &str) -> Option<&'g Node> {
        let mut current = self.graph.source(node.link(input)?)?;
        for _ in 0..self.options.max_hops {
            if self.role(current) != NodeRole::Passthrough {
                return Some(current);
            }
            let next = current.link(input).or_else(|| first_link(current))?;
            current = self.graph.source(next)?;
        }
        None
    }

    // -- scalar resolution ----------------------------------------------------

    /// The first of `names` on `node` that resolves to a value.
    fn field_on(&self, node: &Node, names: &[&str], hops: usize) -> Option<Value> {
        self.field_within(node, names, hops, &mut Visited::new())
    }

    fn field_within(
        &self,
        node: &Node,
        names: &[&str],
        hops: usize,
        visited: &mut Visited,
    ) -> Option<Value> {
        names
            .iter()
            .filter_map(|name| node.input(name).map(|input| (*name, input)))
            .find_map(|(name, input)| self.scalar(input, name, hops, visited))
    }

    fn scalar(
        &self,
        input: &NodeInput,
        field: &str,
        hops: usize,
        visited: &mut Visited,
    ) -> Option<Value> {
        match input {
            NodeInput::Literal(Value::Null) => None,
            NodeInput::Literal(value) => Some(value.clone()),
            NodeInput::Link(source) => {
                let node = self.graph.source(source)?;
                self.output_value(node, field, hops + 1, visited)
            }
        }
    }

    /// The value a node emits when something reads `field` from it.
    ///
    /// Each `(node, field)` pair is expanded at most once per lookup.
    fn output_value(
        &self,
        node: &Node,
        field: &str,
        hops: usize,
        visited: &mut Visited,
    ) -> Option<Value> {
        if hops > self.options.max_hops
            || !visited.insert((node.id.clone(), field.to_string()))
        {
            return None;
        }

        let role = self.role(node);
        if role == NodeRole::Passthrough {
            let input = node
                .input(field)
                .or_else(|| node.inputs.values().find(|i| matches!(i, NodeInput::Link(_))))?;
            return self.scalar(input, field, hops, visited);
        }

        // Literal nodes emit their single value whatever the reader calls it.
        let own = [field];
        let order: [&[&str]; 2] = if role == NodeRole::Literal {
            [VALUE_KEYS, &own]
        } else {
            [&own, VALUE_KEYS]
        };
        for names in order {
            if let Some(value) = self.field_within(node, names, hops, visited) {
                return Some(value);
            }
        }
        if let Some(value) = node.literal("widget_0") {
            return Some(value.clone());
        }
        if node.inputs.len() == 1 {
            let (name, input) = node.inputs.iter().next()?;
            return self.scalar(input, name, hops, visited);
        }
        None
    }

    // -- model ----------------------------------------------------------------

    fn trace_model(&self, start: &SourceRef, loras: &mut Vec<String>) -> Option<String> {
        let mut current = self.graph.source(start)?;
        for hop in 0..self.options.max_hops {
            let next = match self.role(current) {
                NodeRole::Loader { lora: false } => return self.loader_filename(current, hop),
                NodeRole::Loader { lora: true } => {
                    if let Some(name) = self.loader_filename(current, hop) {
                        loras.push(name);
                    }
                    next_hop(current, "model", &[])
                }
                _ => next_hop(current, "model", &[]),
            };
            current = self.graph.source(next?)?;
        }
        None
    }

    /// Filename a loader node reads, from well-known keys or any `*_name`
    /// string literal.
    pub fn loader_filename(&self, node: &Node, hops: usize) -> Option<String> {
        if let Some(name) = FILENAME_KEYS
            .iter()
            .find_map(|key| self.field_on(node, &[*key], hops).and_then(as_text))
        {
            return Some(name);
        }
        node.literals()
            .filter(|(name, _)| name.ends_with("_name"))
            .find_map(|(_, value)| as_text(value.clone()))
    }

    // -- prompts --------------------------------------------------------------

    fn trace_prompt(&self, start: &SourceRef, field: &str) -> Option<String> {
        let mut current = self.graph.source(start)?;
        for hop in 0..self.options.max_hops {
            if self.role(current) == NodeRole::PromptEncoder {
                return self.prompt_text(current, hop);
            }
            current = self.graph.source(next_hop(current, field, CONDITIONING_INPUTS)?)?;
        }
        None
    }

    fn prompt_text(&self, node: &Node, hops: usize) -> Option<String> {
        let text = |name: &str| self.field_on(node, &[name], hops).and_then(as_text);

        text("text")
            .or_else(|| combine(text("text_g"), text("text_l")))
            .or_else(|| combine(text("t5xxl"), text("clip_l")))
            .or_else(|| text("prompt"))
    }

    // -- dimensions -----------------------------------------------------------

    fn trace_dimensions(&self, start: &SourceRef) -> (Option<i64>, Option<i64>) {
        let Some(mut current) = self.graph.source(start) else {
            return (None, None);
        };
        for hop in 0..self.options.max_hops {
            let role = self.role(current);
            let sized = current.input("width").is_some() && current.input("height").is_some();
            if role == NodeRole::LatentSource || (role != NodeRole::Passthrough && sized) {
                let width = self.field_on(current, &["width"], hop).and_then(|v| as_dimension(&v));
                let height = self.field_on(current, &["height"], hop).and_then(|v| as_dimension(&v));
                return (width, height);
            }
            let Some(next) = next_hop(current, "latent_image", LATENT_INPUTS)
                .and_then(|link| self.graph.source(link))
            else {
                break;
            };
            current = next;
        }
        (None, None)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn first_link(node: &Node) -> Option<&SourceRef> {
    node.links().next().map(|(_, source)| source)
}

/// Pick the link to follow: the traced field itself, then the preferred
/// inputs, then the first linked input by slot name.
fn next_hop<'n>(node: &'n Node, field: &str, preferred: &[&str]) -> Option<&'n SourceRef> {
    node.link(field)
        .or_else(|| preferred.iter().find_map(|name| node.link(name)))
        .or_else(|| first_link(node))
}

/// Join two prompt halves, collapsing duplicates.
fn combine(first: Option<String>, second: Option<String>) -> Option<String> {
    match (first, second) {
        (Some(a), Some(b)) if a != b => Some(format!("{a}\n{b}")),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}

fn as_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_seed(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A positive pixel dimension. Arrays (unresolved link pairs) are rejected.
fn as_dimension(value: &Value) -> Option<i64> {
    as_integer(value).filter(|v| *v > 0)
}
