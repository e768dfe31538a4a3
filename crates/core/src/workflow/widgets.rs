//! Positional widget schemas for UI-format documents.
//!
//! UI documents store widget values as a bare array, so the array position of
//! each field depends on the node kind. Seed widgets are followed by a
//! frontend-only `control_after_generate` value that older exports omit;
//! [`WidgetField::Control`] only consumes a value when it actually is one of
//! the control words, otherwise the positions after it would shift by one.

use serde_json::Value;

/// One positional widget slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetField {
    Named(&'static str),
    /// Optional `control_after_generate` slot.
    Control,
}

use WidgetField::{Control, Named};

/// Values the frontend writes into the `control_after_generate` slot.
pub const CONTROL_WORDS: &[&str] = &["fixed", "increment", "decrement", "randomize"];

const KSAMPLER: &[WidgetField] = &[
    Named("seed"),
    Control,
    Named("steps"),
    Named("cfg"),
    Named("sampler_name"),
    Named("scheduler"),
    Named("denoise"),
];

const KSAMPLER_ADVANCED: &[WidgetField] = &[
    Named("add_noise"),
    Named("noise_seed"),
    Control,
    Named("steps"),
    Named("cfg"),
    Named("sampler_name"),
    Named("scheduler"),
    Named("start_at_step"),
    Named("end_at_step"),
    Named("return_with_leftover_noise"),
];

const SAMPLER_CUSTOM: &[WidgetField] = &[
    Named("add_noise"),
    Named("noise_seed"),
    Control,
    Named("cfg"),
];

const SDXL_TEXT_ENCODE: &[WidgetField] = &[
    Named("width"),
    Named("height"),
    Named("crop_w"),
    Named("crop_h"),
    Named("target_width"),
    Named("target_height"),
    Named("text_g"),
    Named("text_l"),
];

const LATENT_IMAGE: &[WidgetField] = &[Named("width"), Named("height"), Named("batch_size")];

const LATENT_VIDEO: &[WidgetField] = &[
    Named("width"),
    Named("height"),
    Named("length"),
    Named("batch_size"),
];

/// Widget layout for known node kinds.
pub fn widget_schema(kind: &str) -> Option<&'static [WidgetField]> {
    let schema: &'static [WidgetField] = match kind {
        "KSampler" => KSAMPLER,
        "KSamplerAdvanced" => KSAMPLER_ADVANCED,
        "SamplerCustom" => SAMPLER_CUSTOM,
        "KSamplerSelect" => &[Named("sampler_name")],
        "BasicScheduler" => &[Named("scheduler"), Named("steps"), Named("denoise")],
        "KarrasScheduler" | "ExponentialScheduler" | "PolyexponentialScheduler" => &[
            Named("steps"),
            Named("sigma_max"),
            Named("sigma_min"),
        ],
        "SDTurboScheduler" => &[Named("steps"), Named("denoise")],
        "AlignYourStepsScheduler" => &[Named("model_type"), Named("steps"), Named("denoise")],
        "RandomNoise" => &[Named("noise_seed"), Control],
        "CFGGuider" => &[Named("cfg")],
        "FluxGuidance" => &[Named("guidance")],
        "CheckpointLoaderSimple" | "ImageOnlyCheckpointLoader" | "unCLIPCheckpointLoader" => {
            &[Named("ckpt_name")]
        }
        "CheckpointLoader" => &[Named("config_name"), Named("ckpt_name")],
        "UNETLoader" => &[Named("unet_name"), Named("weight_dtype")],
        "UnetLoaderGGUF" => &[Named("unet_name")],
        "DiffusersLoader" => &[Named("model_path")],
        "LoraLoader" => &[
            Named("lora_name"),
            Named("strength_model"),
            Named("strength_clip"),
        ],
        "LoraLoaderModelOnly" => &[Named("lora_name"), Named("strength_model")],
        "VAELoader" => &[Named("vae_name")],
        "CLIPLoader" => &[Named("clip_name"), Named("type")],
        "DualCLIPLoader" => &[Named("clip_name1"), Named("clip_name2"), Named("type")],
        "UpscaleModelLoader" => &[Named("model_name")],
        "ControlNetLoader" => &[Named("control_net_name")],
        "CLIPTextEncode" => &[Named("text")],
        "CLIPTextEncodeSDXL" => SDXL_TEXT_ENCODE,
        "CLIPTextEncodeSDXLRefiner" => &[
            Named("ascore"),
            Named("width"),
            Named("height"),
            Named("text"),
        ],
        "CLIPTextEncodeFlux" => &[Named("clip_l"), Named("t5xxl"), Named("guidance")],
        "EmptyLatentImage" | "EmptySD3LatentImage" => LATENT_IMAGE,
        "EmptyHunyuanLatentVideo" | "EmptyMochiLatentVideo" | "EmptyLTXVLatentVideo" => {
            LATENT_VIDEO
        }
        "LatentUpscale" => &[
            Named("upscale_method"),
            Named("width"),
            Named("height"),
            Named("crop"),
        ],
        "PrimitiveNode" => &[Named("value"), Control],
        "PrimitiveInt" | "PrimitiveFloat" | "PrimitiveString" | "PrimitiveStringMultiline"
        | "PrimitiveBoolean" => &[Named("value")],
        _ => return None,
    };
    Some(schema)
}

fn is_control_word(value: &Value) -> bool {
    value.as_str().is_some_and(|s| CONTROL_WORDS.contains(&s))
}

/// Map a node's `widgets_values` onto named literal inputs.
///
/// - Known kinds use [`widget_schema`].
/// - Object-shaped `widgets_values` (used by several custom node packs) are
///   taken as named values directly.
/// - Unknown kinds with an array expose positional `widget_N` names.
pub fn map_widget_values(kind: &str, values: &Value) -> Vec<(String, Value)> {
    match values {
        Value::Object(fields) => fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        Value::Array(items) => match widget_schema(kind) {
            Some(schema) => map_with_schema(schema, items),
            None => items
                .iter()
                .enumerate()
                .map(|(i, value)| (format!("widget_{i}"), value.clone()))
                .collect(),
        },
        _ => Vec::new(),
    }
}

fn map_with_schema(schema: &[WidgetField], items: &[Value]) -> Vec<(String, Value)> {
    let mut mapped = Vec::with_capacity(schema.len());
    let mut values = items.iter().peekable();

    for field in schema {
        let Some(value) = values.peek() else {
            break;
        };
        match field {
            Control => {
                if is_control_word(value) {
                    values.next();
                }
            }
            Named(name) => {
                mapped.push((name.to_string(), (*value).clone()));
                values.next();
            }
        }
    }

    mapped
}
