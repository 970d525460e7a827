use crate::error::{Board2PdfError, Result};
use crate::plotter::LayerCatalog;
use crate::types::Rgb;
use serde_json::{Map, Value};

pub type RawSettings = Map<String, Value>;

/// Which side's footprint property popups the top layer of a template carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopupPolicy {
    #[default]
    Both,
    Front,
    Back,
    None,
}

impl PopupPolicy {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "Front Layer" | "front" => PopupPolicy::Front,
            "Back Layer" | "back" => PopupPolicy::Back,
            "None" | "none" => PopupPolicy::None,
            _ => PopupPolicy::Both,
        }
    }

    /// `(front_popups, back_popups)`
    pub fn flags(self) -> (bool, bool) {
        match self {
            PopupPolicy::Both => (true, true),
            PopupPolicy::Front => (true, false),
            PopupPolicy::Back => (false, true),
            PopupPolicy::None => (false, false),
        }
    }
}

/// Post-merge geometry policy of a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleOrCrop {
    None,
    /// Crop the merged page to its content plus `whitespace` points.
    Crop { whitespace: f32 },
    /// Crop the non-frame content, then fit it into the frame page leaving
    /// `whitespace` points on every side.
    ScaleToFit { whitespace: f32 },
    /// Enlarge the page by `factor`; the frame keeps its size and is centred.
    ScaleBy { factor: f32 },
}

impl ScaleOrCrop {
    /// Factor for the merge stage. `None` means the unscaled, annotation
    /// preserving path; a factor of exactly 1.0 is treated the same.
    pub fn merge_factor(self) -> Option<f32> {
        match self {
            ScaleOrCrop::ScaleBy { factor } if factor != 1.0 => Some(factor),
            _ => None,
        }
    }

    pub fn needs_crop_utility(self) -> bool {
        matches!(self, ScaleOrCrop::Crop { .. } | ScaleOrCrop::ScaleToFit { .. })
    }
}

/// One enabled layer of a template, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub name: String,
    pub color: Rgb,
    /// 0..=100 percent.
    pub transparency: u8,
    pub with_frame: bool,
    pub negative: bool,
    pub plot_footprint_values: bool,
    pub plot_reference_designators: bool,
    pub front_popups: bool,
    pub back_popups: bool,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: Rgb::BLACK,
            transparency: 0,
            with_frame: false,
            negative: false,
            plot_footprint_values: true,
            plot_reference_designators: true,
            front_popups: false,
            back_popups: false,
        }
    }

    pub fn has_color(&self) -> bool {
        !self.color.is_black()
    }

    pub fn has_transparency(&self) -> bool {
        self.transparency != 0
    }

    pub fn needs_colorize(&self) -> bool {
        self.has_color() || self.has_transparency()
    }

    pub fn opacity(&self) -> f32 {
        1.0 - self.transparency as f32 / 100.0
    }

    pub fn has_popups(&self) -> bool {
        self.front_popups || self.back_popups
    }

    /// Layer name as used in file names (`F.Cu` -> `F_Cu`).
    pub fn file_token(&self) -> String {
        self.name.replace('.', "_")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldValue {
    Color(Rgb),
    Percent(u8),
    Flag(bool),
}

struct LayerField {
    key: &'static str,
    default: FieldValue,
    convert: fn(&Value) -> Option<FieldValue>,
    apply: fn(&mut LayerInfo, FieldValue),
}

/// Per-layer settings live in per-key maps (`layers_negative = { "F.Cu" = "true" }`).
/// Every historical settings shape goes through this one table.
const LAYER_FIELDS: [LayerField; 5] = [
    LayerField {
        key: "layers",
        default: FieldValue::Color(Rgb::BLACK),
        convert: color_value,
        apply: apply_color,
    },
    LayerField {
        key: "layers_transparency",
        default: FieldValue::Percent(0),
        convert: percent_value,
        apply: apply_transparency,
    },
    LayerField {
        key: "layers_negative",
        default: FieldValue::Flag(false),
        convert: flag_value,
        apply: apply_negative,
    },
    LayerField {
        key: "layers_footprint_values",
        default: FieldValue::Flag(true),
        convert: flag_value,
        apply: apply_footprint_values,
    },
    LayerField {
        key: "layers_reference_designators",
        default: FieldValue::Flag(true),
        convert: flag_value,
        apply: apply_reference_designators,
    },
];

fn apply_color(info: &mut LayerInfo, value: FieldValue) {
    if let FieldValue::Color(c) = value {
        info.color = c;
    }
}

fn apply_transparency(info: &mut LayerInfo, value: FieldValue) {
    if let FieldValue::Percent(p) = value {
        info.transparency = p;
    }
}

fn apply_negative(info: &mut LayerInfo, value: FieldValue) {
    if let FieldValue::Flag(f) = value {
        info.negative = f;
    }
}

fn apply_footprint_values(info: &mut LayerInfo, value: FieldValue) {
    if let FieldValue::Flag(f) = value {
        info.plot_footprint_values = f;
    }
}

fn apply_reference_designators(info: &mut LayerInfo, value: FieldValue) {
    if let FieldValue::Flag(f) = value {
        info.plot_reference_designators = f;
    }
}

fn color_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::String(s) => Rgb::from_hex(s).map(FieldValue::Color),
        Value::Array(items) if items.len() == 3 => {
            let mut out = [0u8; 3];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = u8::try_from(item.as_u64()?).ok()?;
            }
            Some(FieldValue::Color(Rgb::from_u8(out[0], out[1], out[2])))
        }
        _ => None,
    }
}

fn percent_value(value: &Value) -> Option<FieldValue> {
    let number = match value {
        Value::String(s) if s.trim().is_empty() => 0,
        Value::String(s) => s.trim().parse::<f64>().ok()?.round() as i64,
        Value::Number(n) => n.as_f64()?.round() as i64,
        Value::Null => 0,
        _ => return None,
    };
    if !(0..=100).contains(&number) {
        return None;
    }
    Some(FieldValue::Percent(number as u8))
}

fn flag_value(value: &Value) -> Option<FieldValue> {
    value_as_flag(value).map(FieldValue::Flag)
}

fn value_as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.trim().eq_ignore_ascii_case("true")),
        Value::Number(n) => Some(n.as_f64().unwrap_or(0.0) != 0.0),
        Value::Null => Some(false),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_f32(value: &Value) -> Option<f32> {
    match value {
        Value::String(s) => s.trim().parse::<f32>().ok(),
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        _ => None,
    }
}

/// Resolves one layer's settings. `popups` is the policy this layer carries,
/// which is [`PopupPolicy::None`] for everything but the top layer.
pub fn parse_layer(
    layer_name: &str,
    raw: &RawSettings,
    frame_layer: Option<&str>,
    popups: PopupPolicy,
) -> Result<LayerInfo> {
    let mut info = LayerInfo::new(layer_name);
    for field in &LAYER_FIELDS {
        let stored = raw
            .get(field.key)
            .and_then(Value::as_object)
            .and_then(|per_layer| per_layer.get(layer_name));
        let value = match stored {
            Some(v) => (field.convert)(v).ok_or_else(|| {
                Board2PdfError::Config(format!(
                    "invalid value {} for {}.{}",
                    v, field.key, layer_name
                ))
            })?,
            None => field.default,
        };
        (field.apply)(&mut info, value);
    }
    info.with_frame = frame_layer == Some(layer_name);
    let (front, back) = popups.flags();
    info.front_popups = front;
    info.back_popups = back;
    Ok(info)
}

/// A validated export template. `layers` is in paint order: index 0 is drawn
/// first (bottom), the last entry ends up on top.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub mirrored: bool,
    pub tented: bool,
    pub popups: PopupPolicy,
    pub scale_or_crop: ScaleOrCrop,
    layers: Vec<LayerInfo>,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        mirrored: bool,
        tented: bool,
        popups: PopupPolicy,
        scale_or_crop: ScaleOrCrop,
        layers: Vec<LayerInfo>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Board2PdfError::Config("template name cannot be empty".to_string()));
        }
        if layers.is_empty() {
            return Err(Board2PdfError::Config(format!(
                "template {name} has no enabled layers"
            )));
        }
        let frames: Vec<&str> = layers
            .iter()
            .filter(|l| l.with_frame)
            .map(|l| l.name.as_str())
            .collect();
        if frames.len() > 1 {
            return Err(Board2PdfError::Config(format!(
                "template {name} marks more than one frame layer: {}",
                frames.join(", ")
            )));
        }
        let popup_layers = layers.iter().filter(|l| l.has_popups()).count();
        if popup_layers > 1 {
            return Err(Board2PdfError::Config(format!(
                "template {name} has popups on {popup_layers} layers, at most one is allowed"
            )));
        }
        for (idx, layer) in layers.iter().enumerate() {
            if layers[..idx].iter().any(|l| l.name == layer.name) {
                return Err(Board2PdfError::Config(format!(
                    "template {name} enables layer {} twice",
                    layer.name
                )));
            }
            if layer.transparency > 100 {
                return Err(Board2PdfError::Config(format!(
                    "layer {} of template {name} has transparency {} outside 0..=100",
                    layer.name, layer.transparency
                )));
            }
        }
        Ok(Self {
            name,
            mirrored,
            tented,
            popups,
            scale_or_crop,
            layers,
        })
    }

    /// Layers bottom-first.
    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn frame_layer(&self) -> Option<&LayerInfo> {
        self.layers.iter().find(|l| l.with_frame)
    }

    pub fn uses_popups(&self) -> bool {
        self.layers.iter().any(LayerInfo::has_popups)
    }

    pub fn has_transparency(&self) -> bool {
        self.layers.iter().any(LayerInfo::has_transparency)
    }

    /// Progress steps this template contributes: one plot per layer plus
    /// one colorize per recoloured layer.
    pub fn steps(&self) -> usize {
        self.layers.len() + self.layers.iter().filter(|l| l.needs_colorize()).count()
    }

    /// `{base}_{name}` with spaces and path-hostile characters replaced.
    pub fn output_stem(&self, base: &str) -> String {
        format!("{}_{}", base, sanitize_file_component(&self.name))
    }
}

pub fn sanitize_file_component(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn enabled_layer_names(raw: &RawSettings) -> Result<Vec<String>> {
    let names: Vec<String> = match raw.get("enabled_layers") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    Board2PdfError::Config(format!("enabled_layers entry {v} is not a layer name"))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(Board2PdfError::Config(format!(
                "enabled_layers must be a comma separated string or a list, got {other}"
            )));
        }
    };
    Ok(names.into_iter().filter(|n| !n.is_empty()).collect())
}

fn frame_layer_name(raw: &RawSettings, template: &str) -> Result<Option<String>> {
    match raw.get("frame") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() || s == "None" => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Array(items)) => match items.as_slice() {
            [] => Ok(None),
            [single] => Ok(single.as_str().map(|s| s.trim().to_string())),
            _ => Err(Board2PdfError::Config(format!(
                "template {template} marks more than one frame layer: {}",
                Value::Array(items.clone())
            ))),
        },
        Some(other) => Err(Board2PdfError::Config(format!(
            "frame of template {template} must be a layer name, got {other}"
        ))),
    }
}

fn template_flag(raw: &RawSettings, key: &str) -> Result<bool> {
    match raw.get(key) {
        None => Ok(false),
        Some(v) => value_as_flag(v)
            .ok_or_else(|| Board2PdfError::Config(format!("{key} must be a boolean, got {v}"))),
    }
}

fn template_number(raw: &RawSettings, key: &str, default: f32) -> Result<f32> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(default),
        Some(v) => value_as_f32(v)
            .filter(|n| n.is_finite())
            .ok_or_else(|| Board2PdfError::Config(format!("{key} must be a number, got {v}"))),
    }
}

fn scale_or_crop(raw: &RawSettings, template: &str) -> Result<ScaleOrCrop> {
    let method = raw
        .get("scaling_method")
        .and_then(value_as_text)
        .unwrap_or_else(|| "0".to_string());
    let crop_whitespace = template_number(raw, "crop_whitespace", 10.0)?;
    let scale_whitespace = template_number(raw, "scale_whitespace", 30.0)?;
    let factor = template_number(raw, "scaling_factor", 3.0)?;
    let policy = match method.trim() {
        "" | "0" => ScaleOrCrop::None,
        "1" => ScaleOrCrop::Crop {
            whitespace: crop_whitespace,
        },
        "2" => ScaleOrCrop::ScaleToFit {
            whitespace: scale_whitespace,
        },
        "3" => ScaleOrCrop::ScaleBy { factor },
        other => {
            return Err(Board2PdfError::Config(format!(
                "template {template} has unknown scaling_method {other}"
            )));
        }
    };
    match policy {
        ScaleOrCrop::Crop { whitespace } | ScaleOrCrop::ScaleToFit { whitespace }
            if whitespace < 0.0 =>
        {
            Err(Board2PdfError::Config(format!(
                "template {template} has negative whitespace {whitespace}"
            )))
        }
        ScaleOrCrop::ScaleBy { factor } if factor < 1.0 => Err(Board2PdfError::Config(format!(
            "template {template} has scaling_factor {factor}, it must be at least 1.0"
        ))),
        _ => Ok(policy),
    }
}

/// Builds a [`Template`] from its persisted settings map.
///
/// The persisted `enabled_layers` list is top-first; the first entry is the
/// layer drawn last and the only one that carries popups.
pub fn parse_template(name: &str, raw: &RawSettings, catalog: &LayerCatalog) -> Result<Template> {
    let names = enabled_layer_names(raw)?;
    let frame = frame_layer_name(raw, name)?;
    let popups = PopupPolicy::parse(raw.get("popups").and_then(Value::as_str).unwrap_or(""));

    if let Some(frame) = frame.as_deref() {
        if !names.iter().any(|n| n == frame) {
            log::warn!("template {name}: frame layer {frame} is not enabled, plotting without a frame");
        }
    }

    let mut layers = Vec::with_capacity(names.len());
    for (idx, layer_name) in names.iter().enumerate() {
        if !catalog.contains(layer_name) {
            return Err(Board2PdfError::Config(format!(
                "template {name} references unknown layer {layer_name}"
            )));
        }
        let layer_popups = if idx == 0 { popups } else { PopupPolicy::None };
        layers.push(parse_layer(layer_name, raw, frame.as_deref(), layer_popups)?);
    }
    layers.reverse();

    let template = Template::new(
        name,
        template_flag(raw, "mirrored")?,
        template_flag(raw, "tented")?,
        popups,
        scale_or_crop(raw, name)?,
        layers,
    )?;
    log::debug!(
        "parsed template {name}: {} layers, policy {:?}",
        template.layers.len(),
        template.scale_or_crop
    );
    Ok(template)
}
